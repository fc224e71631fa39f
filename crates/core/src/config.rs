use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CRM_API_HOSTS: [&str; 2] =
    ["https://services.leadconnectorhq.com", "https://api.leadconnectorhq.com"];
pub const DEFAULT_CRM_API_VERSION: &str = "2021-07-28";

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub crm: CrmConfig,
    pub reconcile: ReconcileConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
    /// Largest webhook body read; bigger deliveries are acknowledged unread.
    pub max_body_bytes: u64,
}

/// Connection settings for the external CRM REST API.
#[derive(Clone, Debug)]
pub struct CrmConfig {
    pub api_token: Option<SecretString>,
    pub location_id: Option<String>,
    pub api_hosts: Vec<String>,
    pub api_version: String,
    pub request_timeout_ms: u64,
    pub assignment_retry_attempts: u32,
    pub assignment_retry_delay_ms: u64,
    pub pipeline_id: Option<String>,
    pub pipeline_stage_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct ReconcileConfig {
    pub transition_dedup_window_secs: u64,
    pub reannounce_dedup_window_secs: u64,
    pub initial_stage: String,
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
    pub server_port: Option<u16>,
    pub crm_api_token: Option<String>,
    pub crm_location_id: Option<String>,
    pub crm_api_hosts: Option<Vec<String>>,
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
                url: "sqlite://leadsync.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
                max_body_bytes: 2 * 1024 * 1024,
            },
            crm: CrmConfig {
                api_token: None,
                location_id: None,
                api_hosts: DEFAULT_CRM_API_HOSTS.iter().map(|host| host.to_string()).collect(),
                api_version: DEFAULT_CRM_API_VERSION.to_string(),
                request_timeout_ms: 8_000,
                assignment_retry_attempts: 4,
                assignment_retry_delay_ms: 800,
                pipeline_id: None,
                pipeline_stage_id: None,
            },
            reconcile: ReconcileConfig {
                transition_dedup_window_secs: 60,
                reannounce_dedup_window_secs: 180,
                initial_stage: "PROSPECCION".to_string(),
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

impl CrmConfig {
    pub fn has_api_token(&self) -> bool {
        self.api_token.as_ref().map(|token| !token.expose_secret().trim().is_empty()).unwrap_or(false)
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("leadsync.toml"));
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

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
            if let Some(max_body_bytes) = server.max_body_bytes {
                self.server.max_body_bytes = max_body_bytes;
            }
        }

        if let Some(crm) = patch.crm {
            if let Some(api_token) = crm.api_token {
                self.crm.api_token = Some(secret_value(api_token));
            }
            if let Some(location_id) = crm.location_id {
                self.crm.location_id = Some(location_id);
            }
            if let Some(api_hosts) = crm.api_hosts {
                self.crm.api_hosts = api_hosts;
            }
            if let Some(api_version) = crm.api_version {
                self.crm.api_version = api_version;
            }
            if let Some(request_timeout_ms) = crm.request_timeout_ms {
                self.crm.request_timeout_ms = request_timeout_ms;
            }
            if let Some(attempts) = crm.assignment_retry_attempts {
                self.crm.assignment_retry_attempts = attempts;
            }
            if let Some(delay_ms) = crm.assignment_retry_delay_ms {
                self.crm.assignment_retry_delay_ms = delay_ms;
            }
            if let Some(pipeline_id) = crm.pipeline_id {
                self.crm.pipeline_id = Some(pipeline_id);
            }
            if let Some(pipeline_stage_id) = crm.pipeline_stage_id {
                self.crm.pipeline_stage_id = Some(pipeline_stage_id);
            }
        }

        if let Some(reconcile) = patch.reconcile {
            if let Some(window) = reconcile.transition_dedup_window_secs {
                self.reconcile.transition_dedup_window_secs = window;
            }
            if let Some(window) = reconcile.reannounce_dedup_window_secs {
                self.reconcile.reannounce_dedup_window_secs = window;
            }
            if let Some(initial_stage) = reconcile.initial_stage {
                self.reconcile.initial_stage = initial_stage;
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
        if let Some(value) = read_env("LEADSYNC_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("LEADSYNC_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_u32("LEADSYNC_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("LEADSYNC_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("LEADSYNC_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("LEADSYNC_SERVER_PORT") {
            self.server.port = parse_u16("LEADSYNC_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("LEADSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_SERVER_MAX_BODY_BYTES") {
            self.server.max_body_bytes = parse_u64("LEADSYNC_SERVER_MAX_BODY_BYTES", &value)?;
        }

        if let Some(value) = read_env("LEADSYNC_CRM_API_TOKEN") {
            self.crm.api_token = Some(secret_value(value));
        }
        if let Some(value) = read_env("LEADSYNC_CRM_LOCATION_ID") {
            self.crm.location_id = Some(value);
        }
        if let Some(value) = read_env("LEADSYNC_CRM_API_HOSTS") {
            self.crm.api_hosts = split_list(&value);
        }
        if let Some(value) = read_env("LEADSYNC_CRM_API_VERSION") {
            self.crm.api_version = value;
        }
        if let Some(value) = read_env("LEADSYNC_CRM_REQUEST_TIMEOUT_MS") {
            self.crm.request_timeout_ms = parse_u64("LEADSYNC_CRM_REQUEST_TIMEOUT_MS", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_CRM_ASSIGNMENT_RETRY_ATTEMPTS") {
            self.crm.assignment_retry_attempts =
                parse_u32("LEADSYNC_CRM_ASSIGNMENT_RETRY_ATTEMPTS", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_CRM_ASSIGNMENT_RETRY_DELAY_MS") {
            self.crm.assignment_retry_delay_ms =
                parse_u64("LEADSYNC_CRM_ASSIGNMENT_RETRY_DELAY_MS", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_CRM_PIPELINE_ID") {
            self.crm.pipeline_id = Some(value);
        }
        if let Some(value) = read_env("LEADSYNC_CRM_PIPELINE_STAGE_ID") {
            self.crm.pipeline_stage_id = Some(value);
        }

        if let Some(value) = read_env("LEADSYNC_RECONCILE_TRANSITION_DEDUP_WINDOW_SECS") {
            self.reconcile.transition_dedup_window_secs =
                parse_u64("LEADSYNC_RECONCILE_TRANSITION_DEDUP_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_RECONCILE_REANNOUNCE_DEDUP_WINDOW_SECS") {
            self.reconcile.reannounce_dedup_window_secs =
                parse_u64("LEADSYNC_RECONCILE_REANNOUNCE_DEDUP_WINDOW_SECS", &value)?;
        }
        if let Some(value) = read_env("LEADSYNC_RECONCILE_INITIAL_STAGE") {
            self.reconcile.initial_stage = value;
        }

        let log_level =
            read_env("LEADSYNC_LOGGING_LEVEL").or_else(|| read_env("LEADSYNC_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("LEADSYNC_LOGGING_FORMAT").or_else(|| read_env("LEADSYNC_LOG_FORMAT"));
        if let Some(value) = log_format {
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
        if let Some(port) = overrides.server_port {
            self.server.port = port;
        }
        if let Some(api_token) = overrides.crm_api_token {
            self.crm.api_token = Some(secret_value(api_token));
        }
        if let Some(location_id) = overrides.crm_location_id {
            self.crm.location_id = Some(location_id);
        }
        if let Some(api_hosts) = overrides.crm_api_hosts {
            self.crm.api_hosts = api_hosts;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_crm(&self.crm)?;
        validate_reconcile(&self.reconcile)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("leadsync.toml"), PathBuf::from("config/leadsync.toml")]
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

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    if server.max_body_bytes == 0 {
        return Err(ConfigError::Validation(
            "server.max_body_bytes must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_crm(crm: &CrmConfig) -> Result<(), ConfigError> {
    if crm.api_hosts.is_empty() {
        return Err(ConfigError::Validation(
            "crm.api_hosts must list at least one host".to_string(),
        ));
    }
    if let Some(host) = crm
        .api_hosts
        .iter()
        .find(|host| !host.starts_with("http://") && !host.starts_with("https://"))
    {
        return Err(ConfigError::Validation(format!(
            "crm.api_hosts entry `{host}` must start with http:// or https://"
        )));
    }

    if crm.api_version.trim().is_empty() {
        return Err(ConfigError::Validation("crm.api_version must not be empty".to_string()));
    }

    if crm.request_timeout_ms == 0 || crm.request_timeout_ms > 60_000 {
        return Err(ConfigError::Validation(
            "crm.request_timeout_ms must be in range 1..=60000".to_string(),
        ));
    }

    if crm.assignment_retry_attempts == 0 || crm.assignment_retry_attempts > 10 {
        return Err(ConfigError::Validation(
            "crm.assignment_retry_attempts must be in range 1..=10".to_string(),
        ));
    }

    Ok(())
}

fn validate_reconcile(reconcile: &ReconcileConfig) -> Result<(), ConfigError> {
    if reconcile.transition_dedup_window_secs == 0 {
        return Err(ConfigError::Validation(
            "reconcile.transition_dedup_window_secs must be greater than zero".to_string(),
        ));
    }

    if reconcile.reannounce_dedup_window_secs < reconcile.transition_dedup_window_secs {
        return Err(ConfigError::Validation(
            "reconcile.reannounce_dedup_window_secs must not be shorter than the transition window"
                .to_string(),
        ));
    }

    if reconcile.initial_stage.trim().is_empty() {
        return Err(ConfigError::Validation(
            "reconcile.initial_stage must not be empty".to_string(),
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

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.trim_end_matches('/').to_string())
        .collect()
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    crm: Option<CrmPatch>,
    reconcile: Option<ReconcilePatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
    max_body_bytes: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct CrmPatch {
    api_token: Option<String>,
    location_id: Option<String>,
    api_hosts: Option<Vec<String>>,
    api_version: Option<String>,
    request_timeout_ms: Option<u64>,
    assignment_retry_attempts: Option<u32>,
    assignment_retry_delay_ms: Option<u64>,
    pipeline_id: Option<String>,
    pipeline_stage_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ReconcilePatch {
    transition_dedup_window_secs: Option<u64>,
    reannounce_dedup_window_secs: Option<u64>,
    initial_stage: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn defaults_are_valid_without_a_token() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        let config = AppConfig::load(LoadOptions::default())
            .map_err(|err| format!("config load failed: {err}"))?;

        ensure(!config.crm.has_api_token(), "no token should be configured by default")?;
        ensure(config.crm.api_hosts.len() == 2, "both default CRM hosts should be present")?;
        ensure(
            config.reconcile.transition_dedup_window_secs == 60,
            "transition window should default to 60s",
        )?;
        ensure(config.crm.assignment_retry_attempts == 4, "assignment retries default to 4")
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_LEADSYNC_CRM_TOKEN", "pit-from-env");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadsync.toml");
            fs::write(
                &path,
                r#"
[crm]
api_token = "${TEST_LEADSYNC_CRM_TOKEN}"
location_id = "loc-123"
api_hosts = ["https://crm.internal.test"]

[reconcile]
transition_dedup_window_secs = 90
reannounce_dedup_window_secs = 240
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            let token = config.crm.api_token.as_ref().map(|token| token.expose_secret().to_string());
            ensure(token.as_deref() == Some("pit-from-env"), "token should come from env")?;
            ensure(config.crm.location_id.as_deref() == Some("loc-123"), "location id from file")?;
            ensure(
                config.crm.api_hosts == vec!["https://crm.internal.test".to_string()],
                "file hosts should replace defaults",
            )?;
            ensure(
                config.reconcile.transition_dedup_window_secs == 90,
                "window should be loaded from file",
            )
        })();

        clear_vars(&["TEST_LEADSYNC_CRM_TOKEN"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADSYNC_LOG_LEVEL", "warn");
        env::set_var("LEADSYNC_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADSYNC_LOG_LEVEL", "LEADSYNC_LOG_FORMAT"]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADSYNC_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("LEADSYNC_CRM_API_HOSTS", "https://a.test/, https://b.test");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("leadsync.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[crm]
api_hosts = ["https://from-file.test"]

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(
                config.crm.api_hosts
                    == vec!["https://a.test".to_string(), "https://b.test".to_string()],
                "env host list should win over file and defaults",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADSYNC_DATABASE_URL", "LEADSYNC_CRM_API_HOSTS"]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADSYNC_RECONCILE_TRANSITION_DEDUP_WINDOW_SECS", "0");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message)
                    if message.contains("reconcile.transition_dedup_window_secs")
            );
            ensure(has_message, "validation failure should name the offending key")
        })();

        clear_vars(&["LEADSYNC_RECONCILE_TRANSITION_DEDUP_WINDOW_SECS"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADSYNC_CRM_REQUEST_TIMEOUT_MS", "soon");

        let result = match AppConfig::load(LoadOptions::default()) {
            Err(ConfigError::InvalidEnvOverride { key, .. }) => {
                ensure(key == "LEADSYNC_CRM_REQUEST_TIMEOUT_MS", "key should be reported")
            }
            other => Err(format!("expected invalid override, got {other:?}")),
        };

        clear_vars(&["LEADSYNC_CRM_REQUEST_TIMEOUT_MS"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("LEADSYNC_CRM_API_TOKEN", "pit-secret-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(!debug.contains("pit-secret-value"), "debug output should not contain token")?;
            ensure(config.crm.has_api_token(), "token should be registered")?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )?;
            Ok(())
        })();

        clear_vars(&["LEADSYNC_CRM_API_TOKEN"]);
        result
    }
}
