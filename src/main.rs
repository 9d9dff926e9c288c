//! File conversion server
//!
//! Accepts multipart uploads on `POST /convert`, converts them with an
//! external tool chosen by file type, and streams the result back.
//!
//! ## Architecture
//!
//! - **HTTP**: axum (`/healthz`, `/convert`)
//! - **Storage**: `{base}/uploads` and `{base}/outputs`
//! - **Converters**: ImageMagick, ffmpeg, LibreOffice (headless)
//! - **Telemetry**: OpenTelemetry OTLP export
//!
//! See [`convert_server::config::Config`] for the environment variables.

use anyhow::{Context, Result};
use convert_server::{
    api,
    config::Config,
    reaper,
    router::ConversionRouter,
    runner::SystemRunner,
    telemetry,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env().context("Failed to load configuration")?;

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .with(config.log_json.then(|| tracing_subscriber::fmt::layer().json()))
        .with((!config.log_json).then(tracing_subscriber::fmt::layer))
        .init();

    // Initialize OpenTelemetry
    if let Some(endpoint) = config.otel_endpoint.as_deref() {
        if let Err(e) = telemetry::init_telemetry(endpoint) {
            warn!("Failed to initialize telemetry: {}", e);
        }
    }

    info!(version = env!("CARGO_PKG_VERSION"), "Starting conversion server");
    info!(
        base_dir = %config.base_dir.display(),
        max_upload_bytes = config.max_upload_bytes,
        timeout_secs = config.conversion_timeout.as_secs(),
        concurrency = config.max_concurrent_conversions,
        "Configuration loaded"
    );

    let router = ConversionRouter::new(config.clone(), Arc::new(SystemRunner::new()))
        .context("Failed to prepare storage")?;

    let reaper = config.retention.map(|retention| {
        reaper::spawn(vec![config.uploads_dir(), config.outputs_dir()], retention)
    });

    let app = api::routes(Arc::new(router));
    let addr = config.bind_address();
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!(%addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    if let Some(handle) = reaper {
        handle.abort();
    }
    telemetry::shutdown_telemetry();

    info!("Conversion server shutdown complete");
    Ok(())
}

/// Resolves when SIGINT (Ctrl-C) or SIGTERM is received.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut s) => {
                s.recv().await;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("Received shutdown signal, draining requests...");
}
