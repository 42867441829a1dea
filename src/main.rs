use album_pipeline::{Config, InMemoryTable, LogMailer, Notification, Pipeline};
use anyhow::{Context, Result};
use futures::StreamExt;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio_stream::wrappers::LinesStream;
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration; missing mail settings fail here, before any event
    // is processed.
    let config = Config::load().context("Failed to load configuration")?;

    // Initialize logging
    init_tracing(&config.service.log_level);

    info!(
        service = %config.service.name,
        table = %config.table.name,
        "Starting album pipeline service"
    );

    // Initialize metrics
    init_metrics(config.service.metrics_port)?;

    // Build the pipeline components
    let table = Arc::new(InMemoryTable::new(&config.table.name));
    let mailer = Arc::new(LogMailer::new(&config.mail.region));
    let pipeline = Arc::new(
        Pipeline::start(&config, table, mailer).context("Failed to start pipeline")?,
    );

    // Feed object-store notifications from stdin, one JSON envelope per line
    let feeder_pipeline = pipeline.clone();
    let feeder = tokio::spawn(async move {
        let stdin = BufReader::new(tokio::io::stdin());
        let mut lines = LinesStream::new(stdin.lines());

        while let Some(line) = lines.next().await {
            let line = match line {
                Ok(line) if !line.trim().is_empty() => line,
                Ok(_) => continue,
                Err(e) => {
                    error!(error = %e, "Failed to read from stdin");
                    break;
                }
            };

            match serde_json::from_str::<Notification>(&line) {
                Ok(notification) => {
                    if let Err(e) = feeder_pipeline.publish_notification(&notification) {
                        error!(error = %e, "Failed to publish notification");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Ignoring unparseable notification line");
                }
            }
        }
    });

    info!("Album pipeline started, reading notifications from stdin");

    // Wait for shutdown signal
    shutdown_signal().await;

    info!("Shutting down album pipeline");

    feeder.abort();
    let _ = feeder.await;
    if let Ok(pipeline) = Arc::try_unwrap(pipeline) {
        pipeline.shutdown();
    }

    info!("Album pipeline stopped");

    Ok(())
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

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
