use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use cadence_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];

    let mut push = |key: &str, value: &str, env_key: &str| {
        lines.push(render_line(
            key,
            value,
            field_source(key, Some(env_key), config_file_doc.as_ref(), config_file_path.as_deref()),
        ));
    };

    push("database.url", &config.database.url, "CADENCE_DATABASE_URL");
    push(
        "database.max_connections",
        &config.database.max_connections.to_string(),
        "CADENCE_DATABASE_MAX_CONNECTIONS",
    );
    push(
        "database.timeout_secs",
        &config.database.timeout_secs.to_string(),
        "CADENCE_DATABASE_TIMEOUT_SECS",
    );

    push("providers.sms_url", &config.providers.sms_url, "CADENCE_PROVIDERS_SMS_URL");
    push("providers.ai_sms_url", &config.providers.ai_sms_url, "CADENCE_PROVIDERS_AI_SMS_URL");
    push("providers.call_url", &config.providers.call_url, "CADENCE_PROVIDERS_CALL_URL");
    push("providers.billing_url", &config.providers.billing_url, "CADENCE_PROVIDERS_BILLING_URL");
    let api_token = config
        .providers
        .api_token
        .as_ref()
        .map(|token| redact_token(token.expose_secret()))
        .unwrap_or_else(|| "<unset>".to_string());
    push("providers.api_token", &api_token, "CADENCE_PROVIDERS_API_TOKEN");

    push("server.bind_address", &config.server.bind_address, "CADENCE_SERVER_BIND_ADDRESS");
    push("server.port", &config.server.port.to_string(), "CADENCE_SERVER_PORT");
    push(
        "server.health_check_port",
        &config.server.health_check_port.to_string(),
        "CADENCE_SERVER_HEALTH_CHECK_PORT",
    );

    push(
        "engine.tick_interval_secs",
        &config.engine.tick_interval_secs.to_string(),
        "CADENCE_ENGINE_TICK_INTERVAL_SECS",
    );
    push(
        "engine.calling_window_start_hour",
        &config.engine.calling_window_start_hour.to_string(),
        "CADENCE_ENGINE_CALLING_WINDOW_START_HOUR",
    );
    push(
        "engine.calling_window_end_hour",
        &config.engine.calling_window_end_hour.to_string(),
        "CADENCE_ENGINE_CALLING_WINDOW_END_HOUR",
    );
    push(
        "engine.utc_offset_hours",
        &config.engine.utc_offset_hours.to_string(),
        "CADENCE_ENGINE_UTC_OFFSET_HOURS",
    );

    push("logging.level", &config.logging.level, "CADENCE_LOG_LEVEL");
    push("logging.format", &format!("{:?}", config.logging.format), "CADENCE_LOG_FORMAT");

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("cadence.toml");
    root.exists().then_some(root)
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
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

fn redact_token(token: &str) -> String {
    let trimmed = token.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }

    if let Some((prefix, _)) = trimmed.split_once('-') {
        return format!("{prefix}-***");
    }

    "<redacted>".to_string()
}
