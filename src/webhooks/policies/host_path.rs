//! hostPath policy.
//!
//! Tools must never get arbitrary host filesystem access. The only hostPath
//! volume a pod may already declare is the one this webhook injects for the
//! tool homes, matched on both name and path.

use super::{ValidationContext, ValidationResult};
use crate::config::{PERMITTED_HOST_PATH, PERMITTED_HOST_PATH_NAME};
use crate::webhooks::error::PolicyViolation;
use crate::webhooks::inspect;

pub fn validate(ctx: &ValidationContext<'_>) -> ValidationResult {
    for (index, volume) in inspect::volumes(ctx.pod).iter().enumerate() {
        let Some(host_path) = &volume.host_path else {
            continue;
        };
        if volume.name != PERMITTED_HOST_PATH_NAME || host_path.path != PERMITTED_HOST_PATH {
            return Err(PolicyViolation::ForeignHostPath {
                index,
                name: volume.name.clone(),
                path: host_path.path.clone(),
            });
        }
    }
    Ok(())
}
