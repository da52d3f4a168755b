//! volume-admission library crate
//!
//! Mutating admission webhook that mounts the Toolforge shared storage into
//! tool pods, sets their home directory variables and pins them to
//! NFS-capable nodes.

pub mod config;
pub mod health;
pub mod webhooks;

pub use config::{Config, ConfigError, HostPathType, VolumeDescriptor, VolumePolicy};
pub use health::HealthState;
pub use webhooks::{AdmissionEngine, Decision, WebhookError, WebhookState};
