mod bootstrap;
mod health;
mod retention;

use std::time::Duration;

use anyhow::Result;
use rapport_core::config::{AppConfig, LoadOptions};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

fn init_logging(config: &AppConfig) {
    use rapport_core::config::LogFormat::*;

    let filter =
        EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_target(false).with_env_filter(filter);

    match config.logging.format {
        Compact => builder.compact().init(),
        Pretty => builder.pretty().init(),
        Json => builder.json().init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let health_task = health::spawn(
        &app.config.server.bind_address,
        app.config.server.health_check_port,
        health::HealthState::new(app.db_pool.clone(), app.runtime.registry().clone()),
        shutdown_rx.clone(),
    )
    .await?;
    let retention_task = retention::spawn(
        app.runtime.clone(),
        app.config.bus.retention_days,
        Duration::from_secs(app.config.bus.retention_sweep_secs),
        shutdown_rx,
    );

    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        "rapport-server started"
    );
    tokio::signal::ctrl_c().await?;
    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        "rapport-server stopping"
    );

    // Receivers may already be gone if a task exited early.
    let _ = shutdown_tx.send(true);
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    let drained = tokio::time::timeout(grace, async {
        let _ = health_task.await;
        let _ = retention_task.await;
    })
    .await;
    if drained.is_err() {
        tracing::warn!(
            event_name = "system.server.shutdown_timeout",
            correlation_id = "shutdown",
            grace_secs = grace.as_secs(),
            "background tasks did not stop within the grace period"
        );
    }

    app.db_pool.close().await;
    Ok(())
}
