mod api;
mod asset_placement;
mod config;
mod model_store;
mod qr_generator;
mod upload;

use anyhow::{Context, Result};
use api::AppState;
use asset_placement::{AssetPlacement, LocalPlacement, S3Placement};
use config::{Config, PlacementMode};
use model_store::ModelStore;
use qr_generator::QrGenerator;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use upload::UploadOrchestrator;

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting model registry service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Spool and registry directories must exist before the first request
    tokio::fs::create_dir_all(&config.storage.spool_dir)
        .await
        .context("Failed to create spool directory")?;
    if let Some(parent) = PathBuf::from(&config.storage.data_file).parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .context("Failed to create data directory")?;
    }

    // Initialize components
    let store = Arc::new(ModelStore::new(&config.storage.data_file));

    // Placement strategy is chosen once here, never per request
    let placement: Arc<dyn AssetPlacement> = match config.storage.placement {
        PlacementMode::Local => Arc::new(LocalPlacement::new(&config.storage)),
        PlacementMode::S3 => Arc::new(
            S3Placement::new(&config.s3)
                .await
                .context("Failed to initialize S3 placement")?,
        ),
    };

    let qr = QrGenerator::new(config.server.base_url.clone(), placement.clone());
    let orchestrator = Arc::new(UploadOrchestrator::new(store.clone(), placement, qr));

    let state = AppState {
        store,
        orchestrator,
        uploads_dir: PathBuf::from(&config.storage.uploads_dir),
        qr_codes_dir: PathBuf::from(&config.storage.qr_codes_dir),
        spool_dir: PathBuf::from(&config.storage.spool_dir),
        service_name: config.service.name.clone(),
    };

    // Spawn API server task
    let server_config = config.server.clone();
    let api_handle = tokio::spawn(async move {
        if let Err(e) = api::start_api_server(state, &server_config).await {
            error!(error = %e, "API server error");
        }
    });

    info!("Model registry service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down model registry service");

    api_handle.abort();

    info!("Model registry service stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt::layer().json())
        .init();
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    let builder = metrics_exporter_prometheus::PrometheusBuilder::new();

    builder
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
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
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        }
        _ = terminate => {
            info!("Received SIGTERM signal");
        }
    }
}
