pub mod config;
pub mod doctor;
pub mod migrate;
pub mod pending;
pub mod purge;
pub mod stats;
pub mod why;

use std::future::Future;
use std::sync::Arc;

use rapport_agent::{AgentRuntime, LoggingExecutor, RuntimeRepositories};
use rapport_core::config::{AppConfig, LoadOptions};
use rapport_db::{connect_with_settings, migrations, DbPool};
use serde::Serialize;
use serde_json::Value;

#[derive(Debug, Clone)]
pub struct CommandResult {
    pub exit_code: u8,
    pub output: String,
}

#[derive(Debug, Serialize)]
struct CommandOutcome {
    command: String,
    status: String,
    error_class: Option<String>,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<Value>,
}

impl CommandResult {
    pub fn success(command: &str, message: impl Into<String>) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "ok".to_string(),
            error_class: None,
            message: message.into(),
            data: None,
        };
        Self { exit_code: 0, output: serialize_payload(payload) }
    }

    /// Success carrying a structured `data` body next to the message.
    pub fn success_with(command: &str, message: impl Into<String>, data: impl Serialize) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => {
                let payload = CommandOutcome {
                    command: command.to_string(),
                    status: "ok".to_string(),
                    error_class: None,
                    message: message.into(),
                    data: Some(data),
                };
                Self { exit_code: 0, output: serialize_payload(payload) }
            }
            Err(error) => Self::failure(command, "serialization", error.to_string(), 1),
        }
    }

    pub fn failure(
        command: &str,
        error_class: &str,
        message: impl Into<String>,
        exit_code: u8,
    ) -> Self {
        let payload = CommandOutcome {
            command: command.to_string(),
            status: "error".to_string(),
            error_class: Some(error_class.to_string()),
            message: message.into(),
            data: None,
        };
        Self { exit_code, output: serialize_payload(payload) }
    }
}

/// Classified failure raised inside a command's async body.
#[derive(Debug)]
pub struct CommandFailure {
    pub error_class: &'static str,
    pub message: String,
    pub exit_code: u8,
}

impl CommandFailure {
    pub fn new(error_class: &'static str, message: impl Into<String>, exit_code: u8) -> Self {
        Self { error_class, message: message.into(), exit_code }
    }

    pub fn query(message: impl Into<String>) -> Self {
        Self::new("query", message, 6)
    }

    fn into_result(self, command: &str) -> CommandResult {
        CommandResult::failure(command, self.error_class, self.message, self.exit_code)
    }
}

/// Loads config, spins a current-thread runtime and drives `task` on it.
/// Config problems exit with 2 and runtime construction problems with 3.
pub fn block_on_command<T, F, Fut>(command: &str, task: F) -> Result<T, CommandResult>
where
    F: FnOnce(AppConfig) -> Fut,
    Fut: Future<Output = Result<T, CommandFailure>>,
{
    let config = AppConfig::load(LoadOptions::default()).map_err(|error| {
        CommandResult::failure(
            command,
            "config_validation",
            format!("configuration issue: {error}"),
            2,
        )
    })?;

    let runtime =
        tokio::runtime::Builder::new_current_thread().enable_all().build().map_err(|error| {
            CommandResult::failure(
                command,
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            )
        })?;

    runtime.block_on(task(config)).map_err(|failure| failure.into_result(command))
}

/// Connects and migrates the configured database, exiting with 4 or 5.
pub async fn open_database(config: &AppConfig) -> Result<DbPool, CommandFailure> {
    let pool = connect_with_settings(
        &config.database.url,
        config.database.max_connections,
        config.database.timeout_secs,
    )
    .await
    .map_err(|error| CommandFailure::new("db_connectivity", error.to_string(), 4))?;

    migrations::run_pending(&pool)
        .await
        .map_err(|error| CommandFailure::new("migration", error.to_string(), 5))?;

    Ok(pool)
}

/// Agent runtime over the configured database. Agents are not registered:
/// operator commands read and maintain state without dispatching events.
pub async fn open_runtime(config: &AppConfig) -> Result<(AgentRuntime, DbPool), CommandFailure> {
    let pool = open_database(config).await?;
    let runtime = AgentRuntime::new(
        RuntimeRepositories::sql(pool.clone()),
        Arc::new(LoggingExecutor),
        config,
    );
    Ok((runtime, pool))
}

fn serialize_payload(payload: CommandOutcome) -> String {
    serde_json::to_string(&payload).unwrap_or_else(|error| {
        format!(
            "{{\"command\":\"unknown\",\"status\":\"error\",\"error_class\":\"serialization\",\"message\":\"{}\"}}",
            error.to_string().replace('\\', "\\\\").replace('"', "\\\"")
        )
    })
}
