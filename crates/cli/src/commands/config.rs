use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rapport_core::config::{AppConfig, LoadOptions};
use toml::Value;

struct ConfigField {
    key: &'static str,
    value: String,
    env_keys: &'static [&'static str],
}

fn field(
    key: &'static str,
    value: impl ToString,
    env_keys: &'static [&'static str],
) -> ConfigField {
    ConfigField { key, value: value.to_string(), env_keys }
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for field in effective_fields(&config) {
        let source = field_source(
            field.key,
            field.env_keys,
            config_file_doc.as_ref(),
            config_file_path.as_deref(),
        );
        lines.push(render_line(field.key, &field.value, source));
    }

    lines.join("\n")
}

fn effective_fields(config: &AppConfig) -> Vec<ConfigField> {
    vec![
        field("database.url", &config.database.url, &["RAPPORT_DATABASE_URL"]),
        field(
            "database.max_connections",
            config.database.max_connections,
            &["RAPPORT_DATABASE_MAX_CONNECTIONS"],
        ),
        field(
            "database.timeout_secs",
            config.database.timeout_secs,
            &["RAPPORT_DATABASE_TIMEOUT_SECS"],
        ),
        field(
            "bus.handler_timeout_ms",
            config.bus.handler_timeout_ms,
            &["RAPPORT_BUS_HANDLER_TIMEOUT_MS"],
        ),
        field("bus.retention_days", config.bus.retention_days, &["RAPPORT_BUS_RETENTION_DAYS"]),
        field(
            "bus.retention_sweep_secs",
            config.bus.retention_sweep_secs,
            &["RAPPORT_BUS_RETENTION_SWEEP_SECS"],
        ),
        field(
            "workflow.undo_window_secs",
            config.workflow.undo_window_secs,
            &["RAPPORT_WORKFLOW_UNDO_WINDOW_SECS"],
        ),
        field(
            "workflow.auto_execute_low_risk",
            config.workflow.auto_execute_low_risk,
            &["RAPPORT_WORKFLOW_AUTO_EXECUTE_LOW_RISK"],
        ),
        field("graph.trace_limit", config.graph.trace_limit, &["RAPPORT_GRAPH_TRACE_LIMIT"]),
        field(
            "graph.default_depth",
            config.graph.default_depth,
            &["RAPPORT_GRAPH_DEFAULT_DEPTH"],
        ),
        field("graph.max_depth", config.graph.max_depth, &["RAPPORT_GRAPH_MAX_DEPTH"]),
        field(
            "server.bind_address",
            &config.server.bind_address,
            &["RAPPORT_SERVER_BIND_ADDRESS"],
        ),
        field(
            "server.health_check_port",
            config.server.health_check_port,
            &["RAPPORT_SERVER_HEALTH_CHECK_PORT"],
        ),
        field(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            &["RAPPORT_SERVER_GRACEFUL_SHUTDOWN_SECS"],
        ),
        field(
            "logging.level",
            &config.logging.level,
            &["RAPPORT_LOGGING_LEVEL", "RAPPORT_LOG_LEVEL"],
        ),
        field(
            "logging.format",
            format!("{:?}", config.logging.format).to_lowercase(),
            &["RAPPORT_LOGGING_FORMAT", "RAPPORT_LOG_FORMAT"],
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    ["rapport.toml", "config/rapport.toml"]
        .into_iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_keys: &[&str],
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_keys.iter().find(|key| env::var_os(key).is_some()) {
        return format!("env ({env_key})");
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}
