//! Admission decision engine.
//!
//! Drives a single review through `Decode -> Validate -> Build -> Respond`.
//! The engine holds nothing but the read-only volume policy, so one instance
//! serves any number of concurrent requests.

use std::sync::Arc;

use k8s_openapi::api::core::v1::Pod;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, Operation};
use tracing::{debug, info, warn};

use super::error::{AdmissionError, PolicyViolation};
use super::patch::{self, PatchBuilder, PatchOperation};
use super::policies::{MountMode, ValidationContext, validate_all};
use crate::config::VolumePolicy;

/// Outcome of the admission rules for one pod.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Deny(PolicyViolation),
    Allow {
        mount_mode: MountMode,
        patch: Vec<PatchOperation>,
    },
}

impl Decision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Decision::Allow { .. })
    }
}

/// An allowed review, ready to be sent back.
#[derive(Debug)]
pub struct Admitted {
    pub response: AdmissionResponse,
    pub patch_operations: usize,
}

#[derive(Clone, Debug)]
pub struct AdmissionEngine {
    policy: Arc<VolumePolicy>,
}

impl AdmissionEngine {
    pub fn new(policy: Arc<VolumePolicy>) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &VolumePolicy {
        &self.policy
    }

    /// Apply the admission rules to an already decoded pod.
    pub fn decide(&self, namespace: &str, pod: &Pod) -> Decision {
        let ctx = ValidationContext { pod, namespace };
        match validate_all(&ctx) {
            Ok(validated) => Decision::Allow {
                mount_mode: validated.mount_mode,
                patch: PatchBuilder::new(&self.policy, &validated, pod).build(),
            },
            Err(violation) => Decision::Deny(violation),
        }
    }

    /// Review an admission request. `Err` always means the request is denied.
    pub fn review(
        &self,
        request: &AdmissionRequest<DynamicObject>,
    ) -> Result<Admitted, AdmissionError> {
        let uid = &request.uid;

        if !matches!(request.operation, Operation::Create | Operation::Update) {
            debug!(uid = %uid, operation = ?request.operation, "Not a pod write, allowing unchanged");
            return Ok(Admitted {
                response: AdmissionResponse::from(request),
                patch_operations: 0,
            });
        }

        let pod = decode_pod(request)?;
        let namespace = request.namespace.as_deref().unwrap_or_default();
        debug!(
            uid = %uid,
            namespace = %namespace,
            name = %request.name,
            pod = ?pod.metadata.name,
            operation = ?request.operation,
            "Processing admission request"
        );

        let (mount_mode, operations) = match self.decide(namespace, &pod) {
            Decision::Allow { mount_mode, patch } => (mount_mode, patch),
            Decision::Deny(violation) => {
                if violation.is_informational() {
                    warn!(uid = %uid, namespace = %namespace, "Skipping non-tool namespace");
                }
                return Err(violation.into());
            }
        };

        let mut response = AdmissionResponse::from(request);
        if !operations.is_empty() {
            response = response
                .with_patch(patch::to_json_patch(&operations)?)
                .map_err(|e| AdmissionError::Encoding(e.to_string()))?;
        }
        response.result.message = match mount_mode {
            MountMode::All => "Volumes mounted",
            MountMode::None => "No volumes requested",
        }
        .to_string();

        info!(
            uid = %uid,
            namespace = %namespace,
            mount_mode = %mount_mode,
            patch_ops = operations.len(),
            "Admission request allowed"
        );
        Ok(Admitted {
            response,
            patch_operations: operations.len(),
        })
    }

    /// Review a request and fold any failure into a denial.
    pub fn respond(&self, request: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        match self.review(request) {
            Ok(admitted) => admitted.response,
            Err(e) => deny(request, &e),
        }
    }
}

/// Decode the request object as a Pod.
pub fn decode_pod(request: &AdmissionRequest<DynamicObject>) -> Result<Pod, AdmissionError> {
    let object = request
        .object
        .as_ref()
        .ok_or_else(|| AdmissionError::Decode("Missing object in request".to_string()))?;
    serde_json::to_value(object)
        .and_then(serde_json::from_value)
        .map_err(|e| AdmissionError::Decode(e.to_string()))
}

/// Create a denial response with reason embedded in message.
/// kube-rs deny() only sets status.message, so we format as "[reason] message"
pub fn deny(request: &AdmissionRequest<DynamicObject>, error: &AdmissionError) -> AdmissionResponse {
    let message = format!("[{}] {}", error.reason(), error);
    if matches!(
        error,
        AdmissionError::Policy(PolicyViolation::ForeignHostPath { .. })
    ) {
        warn!(uid = %request.uid, message = %message, "Admission request denied");
    } else {
        info!(uid = %request.uid, message = %message, "Admission request denied");
    }
    AdmissionResponse::from(request).deny(message)
}
