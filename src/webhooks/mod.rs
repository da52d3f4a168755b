//! Mutating admission webhook for tool pods.
//!
//! A review flows one way through the submodules:
//! - `inspect`: read-only queries over the decoded Pod
//! - `policies`: mount mode, namespace and hostPath rules
//! - `patch`: the ordered JSON Patch that mounts the tool storage
//! - `engine`: ties the above together into an admission response

pub mod engine;
pub mod error;
pub mod inspect;
pub mod patch;
pub mod policies;
mod server;

pub use engine::{AdmissionEngine, Admitted, Decision};
pub use error::{AdmissionError, PolicyViolation, WebhookError};
pub use patch::{PatchOp, PatchOperation, PatchValue};
pub use policies::{MountMode, ValidatedPod};
pub use server::{
    WebhookState, create_webhook_router, run_webhook_server, run_webhook_server_insecure,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
