use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub providers: ProvidersConfig,
    pub server: ServerConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ProvidersConfig {
    pub sms_url: String,
    pub ai_sms_url: String,
    pub call_url: String,
    pub billing_url: String,
    pub api_token: Option<SecretString>,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub health_check_port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// Interval between autonomous ticks when the internal scheduler is on.
    pub tick_interval_secs: u64,
    pub calling_window_start_hour: u32,
    pub calling_window_end_hour: u32,
    pub utc_offset_hours: i32,
    pub execute_batch_size: u32,
    pub action_expiry_hours: u32,
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
    pub sms_url: Option<String>,
    pub ai_sms_url: Option<String>,
    pub call_url: Option<String>,
    pub billing_url: Option<String>,
    pub provider_api_token: Option<String>,
    pub tick_interval_secs: Option<u64>,
    pub utc_offset_hours: Option<i32>,
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
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://cadence.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            providers: ProvidersConfig {
                sms_url: "http://localhost:9901/sms".to_string(),
                ai_sms_url: "http://localhost:9901/ai-sms".to_string(),
                call_url: "http://localhost:9901/call".to_string(),
                billing_url: "http://localhost:9901/billing".to_string(),
                api_token: None,
                timeout_secs: 15,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8090,
                health_check_port: 8091,
                graceful_shutdown_secs: 15,
            },
            engine: EngineConfig {
                tick_interval_secs: 300,
                calling_window_start_hour: 9,
                calling_window_end_hour: 17,
                utc_offset_hours: 0,
                execute_batch_size: 10,
                action_expiry_hours: 24,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("cadence.toml"));
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

        if let Some(providers) = patch.providers {
            if let Some(sms_url) = providers.sms_url {
                self.providers.sms_url = sms_url;
            }
            if let Some(ai_sms_url) = providers.ai_sms_url {
                self.providers.ai_sms_url = ai_sms_url;
            }
            if let Some(call_url) = providers.call_url {
                self.providers.call_url = call_url;
            }
            if let Some(billing_url) = providers.billing_url {
                self.providers.billing_url = billing_url;
            }
            if let Some(api_token_value) = providers.api_token {
                self.providers.api_token = Some(secret_value(api_token_value));
            }
            if let Some(timeout_secs) = providers.timeout_secs {
                self.providers.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(health_check_port) = server.health_check_port {
                self.server.health_check_port = health_check_port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(engine) = patch.engine {
            if let Some(tick_interval_secs) = engine.tick_interval_secs {
                self.engine.tick_interval_secs = tick_interval_secs;
            }
            if let Some(start) = engine.calling_window_start_hour {
                self.engine.calling_window_start_hour = start;
            }
            if let Some(end) = engine.calling_window_end_hour {
                self.engine.calling_window_end_hour = end;
            }
            if let Some(offset) = engine.utc_offset_hours {
                self.engine.utc_offset_hours = offset;
            }
            if let Some(batch) = engine.execute_batch_size {
                self.engine.execute_batch_size = batch;
            }
            if let Some(expiry) = engine.action_expiry_hours {
                self.engine.action_expiry_hours = expiry;
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
        if let Some(value) = read_env("CADENCE_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("CADENCE_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("CADENCE_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("CADENCE_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CADENCE_PROVIDERS_SMS_URL") {
            self.providers.sms_url = value;
        }
        if let Some(value) = read_env("CADENCE_PROVIDERS_AI_SMS_URL") {
            self.providers.ai_sms_url = value;
        }
        if let Some(value) = read_env("CADENCE_PROVIDERS_CALL_URL") {
            self.providers.call_url = value;
        }
        if let Some(value) = read_env("CADENCE_PROVIDERS_BILLING_URL") {
            self.providers.billing_url = value;
        }
        if let Some(value) = read_env("CADENCE_PROVIDERS_API_TOKEN") {
            self.providers.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("CADENCE_PROVIDERS_TIMEOUT_SECS") {
            self.providers.timeout_secs = parse_u64("CADENCE_PROVIDERS_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("CADENCE_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("CADENCE_SERVER_PORT") {
            self.server.port = parse_u16("CADENCE_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("CADENCE_SERVER_HEALTH_CHECK_PORT") {
            self.server.health_check_port = parse_u16("CADENCE_SERVER_HEALTH_CHECK_PORT", &value)?;
        }

        if let Some(value) = read_env("CADENCE_ENGINE_TICK_INTERVAL_SECS") {
            self.engine.tick_interval_secs = parse_u64("CADENCE_ENGINE_TICK_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = read_env("CADENCE_ENGINE_UTC_OFFSET_HOURS") {
            self.engine.utc_offset_hours = parse_i32("CADENCE_ENGINE_UTC_OFFSET_HOURS", &value)?;
        }

        if let Some(value) = read_env("CADENCE_LOG_LEVEL") {
            self.logging.level = value;
        }
        if let Some(value) = read_env("CADENCE_LOG_FORMAT") {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(url) = overrides.database_url {
            self.database.url = url;
        }
        if let Some(level) = overrides.log_level {
            self.logging.level = level;
        }
        if let Some(url) = overrides.sms_url {
            self.providers.sms_url = url;
        }
        if let Some(url) = overrides.ai_sms_url {
            self.providers.ai_sms_url = url;
        }
        if let Some(url) = overrides.call_url {
            self.providers.call_url = url;
        }
        if let Some(url) = overrides.billing_url {
            self.providers.billing_url = url;
        }
        if let Some(token) = overrides.provider_api_token {
            self.providers.api_token = Some(secret_value(token));
        }
        if let Some(interval) = overrides.tick_interval_secs {
            self.engine.tick_interval_secs = interval;
        }
        if let Some(offset) = overrides.utc_offset_hours {
            self.engine.utc_offset_hours = offset;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Validation("database.url must not be empty".to_string()));
        }
        if self.engine.calling_window_end_hour > 24 {
            return Err(ConfigError::Validation(
                "engine.calling_window_end_hour must be at most 24".to_string(),
            ));
        }
        if self.engine.calling_window_start_hour >= self.engine.calling_window_end_hour {
            return Err(ConfigError::Validation(format!(
                "engine calling window is empty: start {} >= end {}",
                self.engine.calling_window_start_hour, self.engine.calling_window_end_hour
            )));
        }
        if !(-12..=14).contains(&self.engine.utc_offset_hours) {
            return Err(ConfigError::Validation(format!(
                "engine.utc_offset_hours out of range: {}",
                self.engine.utc_offset_hours
            )));
        }
        if self.engine.execute_batch_size == 0 {
            return Err(ConfigError::Validation(
                "engine.execute_batch_size must be positive".to_string(),
            ));
        }
        for (key, url) in [
            ("providers.sms_url", &self.providers.sms_url),
            ("providers.ai_sms_url", &self.providers.ai_sms_url),
            ("providers.call_url", &self.providers.call_url),
            ("providers.billing_url", &self.providers.billing_url),
        ] {
            if url.trim().is_empty() {
                return Err(ConfigError::Validation(format!("{key} must not be empty")));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    providers: Option<ProvidersPatch>,
    server: Option<ServerPatch>,
    engine: Option<EnginePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ProvidersPatch {
    sms_url: Option<String>,
    ai_sms_url: Option<String>,
    call_url: Option<String>,
    billing_url: Option<String>,
    api_token: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    health_check_port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct EnginePatch {
    tick_interval_secs: Option<u64>,
    calling_window_start_hour: Option<u32>,
    calling_window_end_hour: Option<u32>,
    utc_offset_hours: Option<i32>,
    execute_batch_size: Option<u32>,
    action_expiry_hours: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

fn resolve_config_path(explicit: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit {
        return path.exists().then(|| path.to_path_buf());
    }
    let default = PathBuf::from("cadence.toml");
    default.exists().then_some(default)
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let contents = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;
    toml::from_str(&contents)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_i32(key: &str, value: &str) -> Result<i32, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}
