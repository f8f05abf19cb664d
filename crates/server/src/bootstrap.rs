use std::sync::Arc;

use rapport_agent::{AgentRuntime, LoggingExecutor, RegistryError, RuntimeRepositories};
use rapport_core::config::{AppConfig, ConfigError, LoadOptions};
use rapport_db::{connect_with_settings, migrations, DbPool};
use thiserror::Error;
use tracing::info;

pub struct Application {
    pub config: AppConfig,
    pub db_pool: DbPool,
    pub runtime: Arc<AgentRuntime>,
}

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database connection failed: {0}")]
    DatabaseConnect(#[source] sqlx::Error),
    #[error("database migration failed: {0}")]
    Migration(#[source] sqlx::migrate::MigrateError),
    #[error("agent registration failed: {0}")]
    Registry(#[from] RegistryError),
}

#[cfg_attr(not(test), allow(dead_code))]
pub async fn bootstrap(options: LoadOptions) -> Result<Application, BootstrapError> {
    let config = AppConfig::load(options)?;
    bootstrap_with_config(config).await
}

pub async fn bootstrap_with_config(config: AppConfig) -> Result<Application, BootstrapError> {
    info!(
        event_name = "system.bootstrap.start",
        correlation_id = "bootstrap",
        "starting application bootstrap"
    );

    let db_pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(BootstrapError::DatabaseConnect)?;
    info!(
        event_name = "system.bootstrap.database_connected",
        correlation_id = "bootstrap",
        "database connection established"
    );

    migrations::run_pending(&db_pool).await.map_err(BootstrapError::Migration)?;
    info!(
        event_name = "system.bootstrap.migrations_applied",
        correlation_id = "bootstrap",
        "database migrations applied"
    );

    let runtime = AgentRuntime::new(
        RuntimeRepositories::sql(db_pool.clone()),
        Arc::new(LoggingExecutor),
        &config,
    );
    runtime.register_default_agents().await?;
    info!(
        event_name = "system.bootstrap.agents_registered",
        correlation_id = "bootstrap",
        agents = ?runtime.registry().agents().await,
        "default agents registered"
    );

    Ok(Application { config, db_pool, runtime: Arc::new(runtime) })
}
