//! Mount mode policy.
//!
//! The `toolforge.org/mount-storage` label defaults to `all`. Any value other
//! than `all` or `none` is rejected.

use std::fmt;

use super::{ValidationContext, ValidationResult};
use crate::config::{MOUNT_ALL, MOUNT_NONE, MOUNT_STORAGE_LABEL};
use crate::webhooks::error::PolicyViolation;
use crate::webhooks::inspect;

/// Which of the managed volumes a pod asked for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MountMode {
    #[default]
    All,
    None,
}

impl MountMode {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            MOUNT_ALL => Some(MountMode::All),
            MOUNT_NONE => Some(MountMode::None),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MountMode::All => MOUNT_ALL,
            MountMode::None => MOUNT_NONE,
        }
    }
}

impl fmt::Display for MountMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult<MountMode> {
    let value = inspect::label_or_default(ctx.pod, MOUNT_STORAGE_LABEL, MOUNT_ALL);
    MountMode::parse(value).ok_or_else(|| PolicyViolation::invalid_mount_mode(value))
}
