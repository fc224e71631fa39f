use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use leadsync_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let entries: Vec<(&str, String, &str)> = vec![
        ("database.url", config.database.url.clone(), "LEADSYNC_DATABASE_URL"),
        (
            "database.max_connections",
            config.database.max_connections.to_string(),
            "LEADSYNC_DATABASE_MAX_CONNECTIONS",
        ),
        (
            "database.timeout_secs",
            config.database.timeout_secs.to_string(),
            "LEADSYNC_DATABASE_TIMEOUT_SECS",
        ),
        ("server.bind_address", config.server.bind_address.clone(), "LEADSYNC_SERVER_BIND_ADDRESS"),
        ("server.port", config.server.port.to_string(), "LEADSYNC_SERVER_PORT"),
        (
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs.to_string(),
            "LEADSYNC_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        (
            "server.max_body_bytes",
            config.server.max_body_bytes.to_string(),
            "LEADSYNC_SERVER_MAX_BODY_BYTES",
        ),
        (
            "crm.api_token",
            redact_token(config.crm.api_token.as_ref().map(|token| token.expose_secret())),
            "LEADSYNC_CRM_API_TOKEN",
        ),
        (
            "crm.location_id",
            config.crm.location_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            "LEADSYNC_CRM_LOCATION_ID",
        ),
        ("crm.api_hosts", config.crm.api_hosts.join(","), "LEADSYNC_CRM_API_HOSTS"),
        ("crm.api_version", config.crm.api_version.clone(), "LEADSYNC_CRM_API_VERSION"),
        (
            "crm.request_timeout_ms",
            config.crm.request_timeout_ms.to_string(),
            "LEADSYNC_CRM_REQUEST_TIMEOUT_MS",
        ),
        (
            "crm.assignment_retry_attempts",
            config.crm.assignment_retry_attempts.to_string(),
            "LEADSYNC_CRM_ASSIGNMENT_RETRY_ATTEMPTS",
        ),
        (
            "crm.assignment_retry_delay_ms",
            config.crm.assignment_retry_delay_ms.to_string(),
            "LEADSYNC_CRM_ASSIGNMENT_RETRY_DELAY_MS",
        ),
        (
            "crm.pipeline_id",
            config.crm.pipeline_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            "LEADSYNC_CRM_PIPELINE_ID",
        ),
        (
            "crm.pipeline_stage_id",
            config.crm.pipeline_stage_id.clone().unwrap_or_else(|| "<unset>".to_string()),
            "LEADSYNC_CRM_PIPELINE_STAGE_ID",
        ),
        (
            "reconcile.transition_dedup_window_secs",
            config.reconcile.transition_dedup_window_secs.to_string(),
            "LEADSYNC_RECONCILE_TRANSITION_DEDUP_WINDOW_SECS",
        ),
        (
            "reconcile.reannounce_dedup_window_secs",
            config.reconcile.reannounce_dedup_window_secs.to_string(),
            "LEADSYNC_RECONCILE_REANNOUNCE_DEDUP_WINDOW_SECS",
        ),
        (
            "reconcile.initial_stage",
            config.reconcile.initial_stage.clone(),
            "LEADSYNC_RECONCILE_INITIAL_STAGE",
        ),
        ("logging.level", config.logging.level.clone(), "LEADSYNC_LOGGING_LEVEL"),
        ("logging.format", format!("{:?}", config.logging.format), "LEADSYNC_LOGGING_FORMAT"),
    ];

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for (key, value, env_key) in entries {
        let source =
            field_source(key, env_key, config_file_doc.as_ref(), config_file_path.as_deref());
        lines.push(format!("- {key} = {value} (source: {source})"));
    }

    lines.join("\n")
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("leadsync.toml"), PathBuf::from("config/leadsync.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let raw = fs::read_to_string(path?).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if config_file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = config_file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
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

/// Keeps the last four characters so operators can tell tokens apart.
fn redact_token(token: Option<&str>) -> String {
    let Some(token) = token.map(str::trim) else {
        return "<unset>".to_string();
    };
    if token.is_empty() {
        return "<empty>".to_string();
    }

    let chars: Vec<char> = token.chars().collect();
    if chars.len() <= 8 {
        return "<redacted>".to_string();
    }
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("***{tail}")
}

#[cfg(test)]
mod tests {
    use toml::Value;

    use super::{contains_path, redact_token};

    #[test]
    fn redaction_never_prints_short_tokens() {
        assert_eq!(redact_token(None), "<unset>");
        assert_eq!(redact_token(Some("  ")), "<empty>");
        assert_eq!(redact_token(Some("pit-1234")), "<redacted>");
        assert_eq!(redact_token(Some("pit-0000-1111-abcd")), "***abcd");
    }

    #[test]
    fn nested_keys_are_found_in_config_document() {
        let doc: Value = "[crm]\nlocation_id = \"loc-1\"\n".parse().expect("toml");

        assert!(contains_path(&doc, "crm.location_id"));
        assert!(!contains_path(&doc, "crm.api_token"));
    }
}
