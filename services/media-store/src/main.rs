use anyhow::{Context, Result};
use media_store::api::{start_api_server, AppState};
use media_store::thumbnail::{FfmpegExtractor, ThumbnailGenerator, ThumbnailWorker};
use media_store::{store, Config, VideoWatcher};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        "Starting media store service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    let store = store::connect(&config.storage)
        .await
        .context("Failed to initialize blob store")?;

    info!(
        storage = if store.is_some() { "LOADED" } else { "NOT LOADED" },
        "Storage connection"
    );

    let shutdown = CancellationToken::new();
    let mut tasks = Vec::new();

    // Spawn thumbnail worker and watcher
    let (thumb_tx, thumb_rx) = mpsc::channel(config.thumbnail.queue_capacity.max(1));
    let notifier = match store {
        Some(ref store) if config.thumbnail.enabled => {
            let generator = Arc::new(ThumbnailGenerator::new(
                store.clone(),
                Arc::new(FfmpegExtractor::new(&config.thumbnail)),
                &config.storage,
            ));
            let worker = ThumbnailWorker::new(generator, config.thumbnail.concurrency);
            tasks.push(tokio::spawn(worker.run(thumb_rx, shutdown.clone())));

            if let Some(interval) = config.watch_interval() {
                let watcher = VideoWatcher::new(
                    store.clone(),
                    config.storage.videos_container.clone(),
                    interval,
                    config.thumbnail.backfill,
                );
                tasks.push(tokio::spawn(watcher.run(thumb_tx.clone(), shutdown.clone())));
            }

            Some(thumb_tx)
        }
        _ => {
            warn!("Thumbnail generation disabled");
            None
        }
    };

    // Spawn API server task
    let api_state = AppState::new(store, &config.storage, notifier);
    let api_config = config.api.clone();
    let api_shutdown = shutdown.clone();
    tasks.push(tokio::spawn(async move {
        if let Err(e) = start_api_server(api_state, &api_config, api_shutdown).await {
            error!(error = %e, "API server error");
        }
    }));

    info!("Media store service started successfully");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down media store service");
    shutdown.cancel();

    let drain = join_tasks(tasks);
    if tokio::time::timeout(Duration::from_secs(30), drain).await.is_err() {
        warn!("Background tasks did not stop within 30s");
    }

    info!("Media store service stopped");

    Ok(())
}

async fn join_tasks(tasks: Vec<tokio::task::JoinHandle<()>>) {
    for task in tasks {
        if let Err(e) = task.await {
            error!(error = %e, "Background task panicked");
        }
    }
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(log_level));

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
