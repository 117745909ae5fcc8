//! Portal service entry point.

use anyhow::Context;
use hotspot_service::dev::{DevPaymentGateway, DevProvisioner};
use hotspot_service::{Config, PortalApp, metrics, spawn_sweeper};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let metrics_addr: SocketAddr = config
        .metrics_addr
        .parse()
        .context("invalid HOTSPOT_METRICS_ADDR")?;
    PrometheusBuilder::new()
        .with_http_listener(metrics_addr)
        .install()
        .context("failed to start metrics exporter")?;
    metrics::register_metrics();

    let app = PortalApp::new(
        config.clone(),
        Arc::new(DevPaymentGateway::new()),
        Arc::new(DevProvisioner::new()),
    )
    .await
    .context("failed to initialize application")?;
    tracing::info!(store = ?config.store, "portal service started");

    let (shutdown_tx, _) = broadcast::channel(1);
    let sweeper_handle = spawn_sweeper(
        app.sweeper(),
        config.sweep_interval(),
        shutdown_tx.subscribe(),
    );

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    tracing::info!("shutdown signal received");

    let _ = shutdown_tx.send(());
    sweeper_handle.await.context("sweeper task panicked")?;

    tracing::info!("portal service stopped");
    Ok(())
}
