//! GPU Scheduler - annotation-driven pod placement service
//!
//! Watches unscheduled pods, binds the ones that opt in to the node their
//! mapping annotation names, and serves health endpoints for the kubelet.
//!
//! # HTTP Endpoints
//!
//! - `GET /health` - Health check
//! - `GET /ready` - Readiness check (ready while the pod watch is streaming)

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use gpu_scheduler::{
    KubeBinder, KubeClusterView, KubePodEvents, SchedulerConfig, SchedulingPipeline, WatchLoop,
    WatchState,
};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    watch_state: watch::Receiver<WatchState>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
}

#[derive(Serialize)]
struct ReadyResponse {
    ready: bool,
    watch: WatchState,
}

async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse {
        status: "healthy",
        service: "gpu-scheduler",
    })
}

async fn ready_handler(State(state): State<AppState>) -> impl IntoResponse {
    let watch = *state.watch_state.borrow();
    let code = if watch.is_streaming() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(ReadyResponse {
            ready: watch.is_streaming(),
            watch,
        }),
    )
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/ready", get(ready_handler))
        .with_state(state)
}

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
                .unwrap_or_else(|_| "info,gpu_scheduler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting GPU Scheduler");

    let config = SchedulerConfig::from_env();
    tracing::info!(
        scheduler_name = %config.scheduler_name,
        annotation = %config.annotation_key,
        watch_timeout_secs = config.watch_timeout_secs,
        retry_delay_secs = config.retry_delay.as_secs(),
        "Loaded scheduler configuration"
    );

    // In-cluster config first, then the local kubeconfig. Failure here is fatal.
    let client = kube::Client::try_default().await?;
    tracing::info!("Connected to Kubernetes cluster");

    let pipeline = SchedulingPipeline::new(
        &config.annotation_key,
        KubeClusterView::new(client.clone()),
        KubeBinder::new(client.clone()),
    );
    let events = KubePodEvents::new(client, config.watch_timeout_secs);
    let watch_loop = WatchLoop::new(events, pipeline, &config);
    let state = AppState {
        watch_state: watch_loop.state(),
    };

    let shutdown = CancellationToken::new();
    let loop_shutdown = shutdown.clone();
    let scheduler = tokio::spawn(async move { watch_loop.run(loop_shutdown).await });

    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal_shutdown.cancel();
    });

    let app = create_router(state);
    tracing::info!(listen_addr = %config.listen_addr, "Starting HTTP server");
    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    let server_shutdown = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
        .await?;

    let stats = scheduler.await?;
    tracing::info!(
        decisions = stats.decisions,
        scheduled = stats.scheduled,
        abandoned = stats.abandoned,
        "GPU scheduler shut down"
    );

    Ok(())
}
