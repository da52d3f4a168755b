//! volume-admission - mutating admission webhook for Toolforge tool pods.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Loads the configuration and the volume policy
//! - Starts the health server and the webhook server

use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing::{error, info};

use volume_admission::health::{HealthState, run_health_server};
use volume_admission::webhooks::{
    AdmissionEngine, WebhookState, run_webhook_server, run_webhook_server_insecure,
};
use volume_admission::{Config, WebhookError};

/// Grace period for in-flight admission reviews to complete during shutdown
const SHUTDOWN_GRACE_PERIOD_SECS: u64 = 5;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("volume_admission=info".parse()?),
        )
        .json()
        .init();

    info!("Starting volume-admission");

    let config = Config::from_env()?;
    let policy = Arc::new(config.volume_policy()?);
    info!(
        volumes = ?policy.iter().map(|v| v.name.as_str()).collect::<Vec<_>>(),
        source = ?config.volumes_config,
        "Loaded volume policy"
    );

    let health_state = Arc::new(HealthState::new());

    // Start health server immediately so liveness works while TLS loads
    let health_handle = {
        let health_state = health_state.clone();
        let port = config.health_port;
        tokio::spawn(async move {
            if let Err(e) = run_health_server(health_state, port).await {
                error!("Health server error: {}", e);
            }
        })
    };

    let webhook_state = Arc::new(WebhookState::new(
        AdmissionEngine::new(policy),
        health_state.clone(),
    ));
    let webhook_handle = {
        let config = config.clone();
        tokio::spawn(async move {
            let result: Result<(), WebhookError> = if config.insecure {
                run_webhook_server_insecure(webhook_state, config.webhook_port).await
            } else {
                run_webhook_server(
                    webhook_state,
                    config.webhook_port,
                    &config.cert_path,
                    &config.key_path,
                )
                .await
            };
            if let Err(e) = result {
                error!("Webhook server error: {}", e);
            }
        })
    };

    // The engine is stateless, so we can serve as soon as the listener is up
    health_state.set_ready(true).await;

    tokio::select! {
        result = webhook_handle => {
            if let Err(e) = result {
                error!("Webhook server task panicked: {}", e);
            }
        }
        result = health_handle => {
            if let Err(e) = result {
                error!("Health server task panicked: {}", e);
            }
        }
        // Handle graceful shutdown on SIGTERM or SIGINT
        _ = shutdown_signal() => {
            info!("Received shutdown signal, initiating graceful shutdown...");

            // Mark as not ready so the Service stops routing reviews to us
            health_state.set_ready(false).await;
            info!("Marked webhook as not ready");

            info!(
                "Waiting {}s for in-flight admission reviews to complete...",
                SHUTDOWN_GRACE_PERIOD_SECS
            );
            tokio::time::sleep(Duration::from_secs(SHUTDOWN_GRACE_PERIOD_SECS)).await;

            info!("Grace period complete, shutting down");
        }
    }

    info!("volume-admission stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
