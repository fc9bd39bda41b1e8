use anyhow::{bail, Context, Result};
use cambackup_uploader::config::{Config, LoggingConfig};
use cambackup_uploader::{
    run_listener, watch, EventRouter, FileFilter, FilePipeline, ObjectStore, S3Store,
    StabilityDetector, StoreError, TransferConfig, UploadExecutor,
};
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.logging);

    config.validate().context("Invalid configuration")?;

    if config.metrics.enabled {
        init_metrics(config.metrics.port)?;
    }

    let root = config.watch.root.clone();
    if !root.exists() {
        error!(path = %root.display(), "Watch directory does not exist");
        bail!("Watch directory {} does not exist", root.display());
    }
    if !root.is_dir() {
        error!(path = %root.display(), "Watch path is not a directory");
        bail!("Watch path {} is not a directory", root.display());
    }
    // notify reports resolved paths on some platforms
    let root = root
        .canonicalize()
        .with_context(|| format!("Failed to resolve watch directory {}", root.display()))?;

    let store = Arc::new(S3Store::new(&config.s3).await);

    match store.head_bucket().await {
        Ok(()) => info!(bucket = %store.bucket(), "Bucket is accessible"),
        Err(StoreError::NoSuchBucket(bucket)) => {
            error!(bucket = %bucket, "Bucket does not exist");
            bail!("Bucket {} does not exist", bucket);
        }
        Err(e) => {
            error!(bucket = %store.bucket(), error = %e, "Cannot access bucket");
            return Err(e).context("Failed to access S3 bucket");
        }
    }

    info!(
        bucket = %config.s3.bucket,
        destination = %format!("s3://{}/{}", config.s3.bucket, config.s3.prefix),
        watching = %root.display(),
        "Starting camera backup monitor"
    );

    let shutdown = CancellationToken::new();

    let executor = UploadExecutor::new(
        store.clone(),
        config.s3.bucket.clone(),
        TransferConfig::from(&config.s3),
        config.upload.max_attempts,
    );
    let pipeline = FilePipeline::new(
        StabilityDetector::new(&config.stabilization),
        executor,
        root.clone(),
        config.s3.prefix.clone(),
    );
    let router = Arc::new(EventRouter::new(
        FileFilter::from_config(&config.watch),
        pipeline,
        shutdown.clone(),
    ));

    let (watcher, events) = watch(&root).context("Failed to start directory watcher")?;

    let listener_handle = tokio::spawn(run_listener(events, router.clone(), shutdown.clone()));

    info!("Monitor started, press Ctrl+C to stop");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Stopping monitor");

    shutdown.cancel();
    drop(watcher);

    if let Err(e) = listener_handle.await {
        error!(error = %e, "Listener task failed");
    }

    router.drain().await;

    info!("Monitor stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let registry = tracing_subscriber::registry().with(env_filter);

    if logging.format == "json" {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().with_target(false)).init();
    }
}

/// Initialize Prometheus metrics exporter
fn init_metrics(port: u16) -> Result<()> {
    metrics_exporter_prometheus::PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
        .context("Failed to install Prometheus metrics exporter")?;

    info!(port = port, "Prometheus metrics exporter started");

    Ok(())
}

/// Wait for shutdown signal (SIGINT or SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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
