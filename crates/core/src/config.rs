use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::workflow::WorkflowConfig;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub bus: BusConfig,
    pub workflow: WorkflowSettings,
    pub graph: GraphConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct BusConfig {
    pub handler_timeout_ms: u64,
    pub retention_days: u32,
    pub retention_sweep_secs: u64,
}

#[derive(Clone, Debug)]
pub struct WorkflowSettings {
    pub undo_window_secs: u64,
    pub auto_execute_low_risk: bool,
}

impl WorkflowSettings {
    pub fn engine_config(&self) -> WorkflowConfig {
        WorkflowConfig {
            undo_window_seconds: i64::try_from(self.undo_window_secs).unwrap_or(i64::MAX),
        }
    }
}

#[derive(Clone, Debug)]
pub struct GraphConfig {
    pub trace_limit: u32,
    pub default_depth: u32,
    pub max_depth: u32,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub handler_timeout_ms: Option<u64>,
    pub undo_window_secs: Option<u64>,
    pub auto_execute_low_risk: Option<bool>,
    pub health_check_port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://rapport.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            bus: BusConfig {
                handler_timeout_ms: 10_000,
                retention_days: 90,
                retention_sweep_secs: 3_600,
            },
            workflow: WorkflowSettings { undo_window_secs: 30, auto_execute_low_risk: false },
            graph: GraphConfig { trace_limit: 50, default_depth: 2, max_depth: 5 },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                health_check_port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("rapport.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(bus) = patch.bus {
            if let Some(handler_timeout_ms) = bus.handler_timeout_ms {
                self.bus.handler_timeout_ms = handler_timeout_ms;
            }
            if let Some(retention_days) = bus.retention_days {
                self.bus.retention_days = retention_days;
            }
            if let Some(retention_sweep_secs) = bus.retention_sweep_secs {
                self.bus.retention_sweep_secs = retention_sweep_secs;
            }
        }

        if let Some(workflow) = patch.workflow {
            if let Some(undo_window_secs) = workflow.undo_window_secs {
                self.workflow.undo_window_secs = undo_window_secs;
            }
            if let Some(auto_execute_low_risk) = workflow.auto_execute_low_risk {
                self.workflow.auto_execute_low_risk = auto_execute_low_risk;
            }
        }

        if let Some(graph) = patch.graph {
            if let Some(trace_limit) = graph.trace_limit {
                self.graph.trace_limit = trace_limit;
            }
            if let Some(default_depth) = graph.default_depth {
                self.graph.default_depth = default_depth;
            }
            if let Some(max_depth) = graph.max_depth {
                self.graph.max_depth = max_depth;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("RAPPORT_DATABASE_URL") {
            self.database.url = value;
        }
        override_from_env("RAPPORT_DATABASE_MAX_CONNECTIONS", &mut self.database.max_connections)?;
        override_from_env("RAPPORT_DATABASE_TIMEOUT_SECS", &mut self.database.timeout_secs)?;

        override_from_env("RAPPORT_BUS_HANDLER_TIMEOUT_MS", &mut self.bus.handler_timeout_ms)?;
        override_from_env("RAPPORT_BUS_RETENTION_DAYS", &mut self.bus.retention_days)?;
        override_from_env("RAPPORT_BUS_RETENTION_SWEEP_SECS", &mut self.bus.retention_sweep_secs)?;

        override_from_env(
            "RAPPORT_WORKFLOW_UNDO_WINDOW_SECS",
            &mut self.workflow.undo_window_secs,
        )?;
        override_from_env(
            "RAPPORT_WORKFLOW_AUTO_EXECUTE_LOW_RISK",
            &mut self.workflow.auto_execute_low_risk,
        )?;

        override_from_env("RAPPORT_GRAPH_TRACE_LIMIT", &mut self.graph.trace_limit)?;
        override_from_env("RAPPORT_GRAPH_DEFAULT_DEPTH", &mut self.graph.default_depth)?;
        override_from_env("RAPPORT_GRAPH_MAX_DEPTH", &mut self.graph.max_depth)?;

        if let Some(value) = read_env("RAPPORT_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        override_from_env(
            "RAPPORT_SERVER_HEALTH_CHECK_PORT",
            &mut self.server.health_check_port,
        )?;
        override_from_env(
            "RAPPORT_SERVER_GRACEFUL_SHUTDOWN_SECS",
            &mut self.server.graceful_shutdown_secs,
        )?;

        if let Some(value) =
            read_env("RAPPORT_LOGGING_LEVEL").or_else(|| read_env("RAPPORT_LOG_LEVEL"))
        {
            self.logging.level = value;
        }
        if let Some(value) =
            read_env("RAPPORT_LOGGING_FORMAT").or_else(|| read_env("RAPPORT_LOG_FORMAT"))
        {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(handler_timeout_ms) = overrides.handler_timeout_ms {
            self.bus.handler_timeout_ms = handler_timeout_ms;
        }
        if let Some(undo_window_secs) = overrides.undo_window_secs {
            self.workflow.undo_window_secs = undo_window_secs;
        }
        if let Some(auto_execute_low_risk) = overrides.auto_execute_low_risk {
            self.workflow.auto_execute_low_risk = auto_execute_low_risk;
        }
        if let Some(health_check_port) = overrides.health_check_port {
            self.server.health_check_port = health_check_port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_bus(&self.bus)?;
        validate_workflow(&self.workflow)?;
        validate_graph(&self.graph)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("rapport.toml"), PathBuf::from("config/rapport.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

const MAX_RETENTION_DAYS: u32 = 36_500;

fn validate_bus(bus: &BusConfig) -> Result<(), ConfigError> {
    if bus.handler_timeout_ms == 0 || bus.handler_timeout_ms > 300_000 {
        return Err(ConfigError::Validation(
            "bus.handler_timeout_ms must be in range 1..=300000".to_string(),
        ));
    }

    if bus.retention_days == 0 || bus.retention_days > MAX_RETENTION_DAYS {
        return Err(ConfigError::Validation(format!(
            "bus.retention_days must be in range 1..={MAX_RETENTION_DAYS}"
        )));
    }

    if bus.retention_sweep_secs == 0 {
        return Err(ConfigError::Validation(
            "bus.retention_sweep_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_workflow(workflow: &WorkflowSettings) -> Result<(), ConfigError> {
    if workflow.undo_window_secs > 3_600 {
        return Err(ConfigError::Validation(
            "workflow.undo_window_secs must be at most 3600".to_string(),
        ));
    }

    Ok(())
}

fn validate_graph(graph: &GraphConfig) -> Result<(), ConfigError> {
    if graph.trace_limit == 0 || graph.trace_limit > 1_000 {
        return Err(ConfigError::Validation(
            "graph.trace_limit must be in range 1..=1000".to_string(),
        ));
    }

    if graph.max_depth == 0 || graph.max_depth > 10 {
        return Err(ConfigError::Validation("graph.max_depth must be in range 1..=10".to_string()));
    }

    if graph.default_depth > graph.max_depth {
        return Err(ConfigError::Validation(
            "graph.default_depth must not exceed graph.max_depth".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.health_check_port == 0 {
        return Err(ConfigError::Validation(
            "server.health_check_port must be greater than zero".to_string(),
        ));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

/// Parses `key` into `target` when set; a malformed value is an error rather
/// than silently falling back to the file or default value.
fn override_from_env<T: std::str::FromStr>(key: &str, target: &mut T) -> Result<(), ConfigError> {
    let Some(value) = read_env(key) else {
        return Ok(());
    };
    let parsed = value.trim().parse::<T>();
    *target = parsed.map_err(|_| ConfigError::InvalidEnvOverride { key: key.to_string(), value })?;
    Ok(())
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    bus: Option<BusPatch>,
    workflow: Option<WorkflowPatch>,
    graph: Option<GraphPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct BusPatch {
    handler_timeout_ms: Option<u64>,
    retention_days: Option<u32>,
    retention_sweep_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkflowPatch {
    undo_window_secs: Option<u64>,
    auto_execute_low_risk: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
struct GraphPatch {
    trace_limit: Option<u32>,
    default_depth: Option<u32>,
    max_depth: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
