//! Admission webhook server.
//!
//! Provides HTTP endpoints for the Pod mutating admission webhook.
//!
//! To enable the webhook:
//! 1. Deploy cert-manager for TLS certificates
//! 2. Create a MutatingWebhookConfiguration for pods pointing at `/mutate-pod`
//! 3. Mount the TLS certificate secret to the webhook pod at /etc/webhook/certs/

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::post};
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use serde_json::Value;
use tracing::{error, info, warn};

use super::engine::{AdmissionEngine, deny};
use super::error::{AdmissionError, WebhookError};
use crate::health::HealthState;

/// Shared state for webhook handlers
pub struct WebhookState {
    pub engine: AdmissionEngine,
    pub health: Arc<HealthState>,
}

impl WebhookState {
    pub fn new(engine: AdmissionEngine, health: Arc<HealthState>) -> Self {
        Self { engine, health }
    }
}

/// Create the webhook router
///
/// `/` is kept alongside `/mutate-pod` for webhook configurations that post to
/// the service root.
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route("/mutate-pod", post(mutate_pod))
        .route("/", post(mutate_pod))
        .with_state(state)
}

/// Pod mutating admission webhook handler
///
/// The review is decoded here rather than by the extractor, so a pod that
/// does not deserialize still gets an AdmissionReview back.
async fn mutate_pod(
    State(state): State<Arc<WebhookState>>,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    let started = Instant::now();
    let uid = body
        .pointer("/request/uid")
        .and_then(Value::as_str)
        .map(str::to_string);

    let review: AdmissionReview<DynamicObject> = match serde_json::from_value(body) {
        Ok(review) => review,
        Err(e) => {
            let error = AdmissionError::Decode(e.to_string());
            state.health.metrics.record_denied(error.reason());
            let Some(uid) = uid else {
                error!(error = %e, "Failed to decode AdmissionReview without uid");
                return (
                    StatusCode::BAD_REQUEST,
                    Json(
                        AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                            .into_review(),
                    ),
                );
            };
            warn!(uid = %uid, error = %e, "Failed to decode admission request");
            let mut response =
                AdmissionResponse::invalid(format!("[{}] {}", error.reason(), error));
            response.uid = uid;
            state
                .health
                .metrics
                .observe_review(started.elapsed().as_secs_f64());
            return (StatusCode::OK, Json(response.into_review()));
        }
    };

    let request: AdmissionRequest<DynamicObject> = match review.try_into() {
        Ok(req) => req,
        Err(e) => {
            error!(error = %e, "Failed to extract admission request");
            state.health.metrics.record_denied("InvalidReview");
            return (
                StatusCode::BAD_REQUEST,
                Json(
                    AdmissionResponse::invalid(format!("Invalid AdmissionReview: {}", e))
                        .into_review(),
                ),
            );
        }
    };

    let response = match state.engine.review(&request) {
        Ok(admitted) => {
            state.health.metrics.record_allowed(admitted.patch_operations);
            admitted.response
        }
        Err(e) => {
            state.health.metrics.record_denied(e.reason());
            deny(&request, &e)
        }
    };
    state
        .health
        .metrics
        .observe_review(started.elapsed().as_secs_f64());

    (StatusCode::OK, Json(response.into_review()))
}

/// Run the webhook server with TLS
///
/// TLS certificates are loaded from the paths specified.
///
/// # Arguments
/// * `state` - Engine and health state shared by all requests
/// * `port` - Port to bind on 0.0.0.0
/// * `cert_path` - Path to TLS certificate file (PEM format)
/// * `key_path` - Path to TLS private key file (PEM format)
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    port: u16,
    cert_path: &Path,
    key_path: &Path,
) -> Result<(), WebhookError> {
    use axum_server::tls_rustls::RustlsConfig;

    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}

/// Run the webhook server over plain HTTP, for local development.
pub async fn run_webhook_server_insecure(
    state: Arc<WebhookState>,
    port: u16,
) -> Result<(), WebhookError> {
    let app = create_webhook_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    warn!(port, "Webhook server listening WITHOUT TLS");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;
    axum::serve(listener, app)
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    Ok(())
}
