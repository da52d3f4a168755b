//! Admission policies for tool pods.
//!
//! Policies run in a fixed order and the first violation wins:
//! - Mount mode: the `toolforge.org/mount-storage` label must be `all` or `none`
//! - Namespace: only tool namespaces get tool volumes
//! - hostPath: pods may not bring their own hostPath volumes

pub mod host_path;
pub mod mount_mode;
pub mod namespace;

use k8s_openapi::api::core::v1::Pod;

use super::error::PolicyViolation;
use super::inspect;

pub use mount_mode::MountMode;

/// Result of a validation check
pub type ValidationResult<T = ()> = Result<T, PolicyViolation>;

/// Context for validation
pub struct ValidationContext<'a> {
    /// The pod being admitted
    pub pod: &'a Pod,
    /// Namespace from the admission request (empty when absent)
    pub namespace: &'a str,
}

/// A pod that passed every policy, with what the patch builder needs to know.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidatedPod {
    pub mount_mode: MountMode,
    /// Tool name, i.e. the namespace without its `tool-` prefix
    pub tenant: String,
    /// The pod declares no volumes, so `/spec/volumes` must be created first
    pub needs_volume_init: bool,
}

/// Run all validation policies
pub fn validate_all(ctx: &ValidationContext<'_>) -> ValidationResult<ValidatedPod> {
    let mount_mode = mount_mode::validate(ctx)?;
    let tenant = namespace::validate(ctx)?;
    host_path::validate(ctx)?;

    Ok(ValidatedPod {
        mount_mode,
        tenant: tenant.to_string(),
        needs_volume_init: inspect::volumes(ctx.pod).is_empty(),
    })
}
