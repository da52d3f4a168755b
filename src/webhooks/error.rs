//! Error types for admission decisions and the webhook server.

use thiserror::Error;

use crate::config::MOUNT_STORAGE_LABEL;

/// A pod that breaks one of the admission rules.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PolicyViolation {
    /// The mount-storage label holds something other than `all` or `none`
    #[error("Invalid value {value:?} for {label} label")]
    InvalidMountMode { label: String, value: String },

    /// The namespace does not belong to a tool
    #[error("Only tools can have tool volumes mounted to them (namespace {namespace:?})")]
    NonTenantNamespace { namespace: String },

    /// The pod declares a hostPath volume of its own
    #[error(
        "No hostPath volumes allowed, got one under /spec/volumes/{index} Name:{name} HostPath:{path}"
    )]
    ForeignHostPath {
        index: usize,
        name: String,
        path: String,
    },
}

impl PolicyViolation {
    pub fn invalid_mount_mode(value: impl Into<String>) -> Self {
        PolicyViolation::InvalidMountMode {
            label: MOUNT_STORAGE_LABEL.to_string(),
            value: value.into(),
        }
    }

    /// Short machine-readable reason, used in messages and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            PolicyViolation::InvalidMountMode { .. } => "InvalidMountMode",
            PolicyViolation::NonTenantNamespace { .. } => "NonTenantNamespace",
            PolicyViolation::ForeignHostPath { .. } => "ForeignHostPath",
        }
    }

    /// Whether the rejection only means "not ours to mutate".
    pub fn is_informational(&self) -> bool {
        matches!(self, PolicyViolation::NonTenantNamespace { .. })
    }
}

/// Every way a single admission review can fail.
#[derive(Error, Debug)]
pub enum AdmissionError {
    /// The request object could not be read as a Pod
    #[error("{0}")]
    Decode(String),

    #[error(transparent)]
    Policy(#[from] PolicyViolation),

    /// The patch built for an allowed pod could not be serialized
    #[error("patch serialization error: {0}")]
    Encoding(String),
}

impl AdmissionError {
    pub fn reason(&self) -> &'static str {
        match self {
            AdmissionError::Decode(_) => "DecodeError",
            AdmissionError::Policy(violation) => violation.reason(),
            AdmissionError::Encoding(_) => "EncodingError",
        }
    }
}

impl From<serde_json::Error> for AdmissionError {
    fn from(e: serde_json::Error) -> Self {
        AdmissionError::Encoding(e.to_string())
    }
}

/// Errors that can occur when running the webhook server
#[derive(Error, Debug)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),

    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}
