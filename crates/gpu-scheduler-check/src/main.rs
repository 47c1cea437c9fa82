//! GPU Check - status sidecar for scheduled GPU pods
//!
//! Logs the pod's node and device placement every interval and maintains a
//! liveness marker file.

use gpu_scheduler_check::{devices, CheckConfig, DeviceState, KubePodAnnotations, Reporter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Resolves on Ctrl-C or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received Ctrl-C, shutting down"),
        () = terminate => tracing::info!("Received SIGTERM, shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GPU check");

    let config = CheckConfig::from_env();
    tracing::info!(
        node = %config.node_name,
        pod = %config.pod.pod_name,
        namespace = %config.pod.pod_namespace,
        interval_secs = config.interval.as_secs(),
        "Loaded check configuration"
    );

    // Only reach for the API server when the environment has no device list.
    let env_devices = std::env::var(devices::CUDA_VISIBLE_DEVICES)
        .ok()
        .filter(|v| !v.is_empty());
    let device_state = match env_devices {
        Some(list) => DeviceState::from_environment(list),
        None => match kube::Client::try_default().await {
            Ok(client) => devices::resolve(&config, None, &KubePodAnnotations::new(client)).await,
            Err(e) => {
                tracing::warn!(error = %e, "Kubernetes client unavailable, devices not resolved");
                DeviceState::unset()
            }
        },
    };
    tracing::info!(
        devices = %device_state,
        source = ?device_state.source(),
        "Device assignment"
    );

    let reporter = Reporter::new(config, device_state);
    reporter.run(shutdown_signal()).await;

    Ok(())
}
