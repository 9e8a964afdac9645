use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use carepath_core::config::AppConfig;
use secrecy::{ExposeSecret, SecretString};
use toml::Value;

use crate::commands::{load_config, CommandResult};

const COMMAND: &str = "config";

/// One rendered setting: dotted key, effective value, and the env var that overrides it.
struct Setting {
    key: &'static str,
    value: String,
    env_key: &'static str,
}

fn setting(key: &'static str, value: impl ToString, env_key: &'static str) -> Setting {
    Setting { key, value: value.to_string(), env_key }
}

pub fn run() -> CommandResult {
    let config = match load_config(COMMAND) {
        Ok(config) => config,
        Err(failure) => return failure,
    };

    let file_path = detect_config_path();
    let file_doc = file_path.as_deref().and_then(load_config_file_doc);

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in settings(&config) {
        let source = field_source(entry.key, entry.env_key, file_doc.as_ref(), file_path.as_deref());
        lines.push(format!("- {} = {} (source: {source})", entry.key, entry.value));
    }

    CommandResult { exit_code: 0, output: lines.join("\n") }
}

fn settings(config: &AppConfig) -> Vec<Setting> {
    let engine = &config.engine;
    vec![
        setting("database.url", &config.database.url, "CAREPATH_DATABASE_URL"),
        setting(
            "database.max_connections",
            config.database.max_connections,
            "CAREPATH_DATABASE_MAX_CONNECTIONS",
        ),
        setting("database.timeout_secs", config.database.timeout_secs, "CAREPATH_DATABASE_TIMEOUT_SECS"),
        setting("llm.provider", config.llm.provider.as_str(), "CAREPATH_LLM_PROVIDER"),
        setting("llm.model", &config.llm.model, "CAREPATH_LLM_MODEL"),
        setting(
            "llm.base_url",
            config.llm.base_url.as_deref().unwrap_or("<unset>"),
            "CAREPATH_LLM_BASE_URL",
        ),
        setting("llm.api_key", redact(config.llm.api_key.as_ref()), "CAREPATH_LLM_API_KEY"),
        setting("llm.temperature", config.llm.temperature, "CAREPATH_LLM_TEMPERATURE"),
        setting("llm.timeout_secs", config.llm.timeout_secs, "CAREPATH_LLM_TIMEOUT_SECS"),
        setting("llm.max_retries", config.llm.max_retries, "CAREPATH_LLM_MAX_RETRIES"),
        setting("engine.history_window", engine.history_window, "CAREPATH_ENGINE_HISTORY_WINDOW"),
        setting(
            "engine.extraction_timeout_ms",
            engine.extraction_timeout_ms,
            "CAREPATH_ENGINE_EXTRACTION_TIMEOUT_MS",
        ),
        setting(
            "engine.composition_timeout_ms",
            engine.composition_timeout_ms,
            "CAREPATH_ENGINE_COMPOSITION_TIMEOUT_MS",
        ),
        setting(
            "engine.default_education_tier",
            engine.default_education_tier.as_str(),
            "CAREPATH_ENGINE_DEFAULT_EDUCATION_TIER",
        ),
        setting("server.bind_address", &config.server.bind_address, "CAREPATH_SERVER_BIND_ADDRESS"),
        setting("server.port", config.server.port, "CAREPATH_SERVER_PORT"),
        setting(
            "server.graceful_shutdown_secs",
            config.server.graceful_shutdown_secs,
            "CAREPATH_SERVER_GRACEFUL_SHUTDOWN_SECS",
        ),
        setting("logging.level", &config.logging.level, "CAREPATH_LOGGING_LEVEL"),
        setting("logging.format", format!("{:?}", config.logging.format), "CAREPATH_LOGGING_FORMAT"),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    [PathBuf::from("carepath.toml"), PathBuf::from("config/carepath.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn load_config_file_doc(path: &Path) -> Option<Value> {
    fs::read_to_string(path).ok()?.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: &str,
    file_doc: Option<&Value>,
    file_path: Option<&Path>,
) -> String {
    if env::var_os(env_key).is_some() {
        return format!("env ({env_key})");
    }

    if file_doc.is_some_and(|doc| contains_path(doc, key_path)) {
        let file_path = file_path
            .map(|path| path.display().to_string())
            .unwrap_or_else(|| "config file".to_string());
        return format!("file ({file_path})");
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    key_path.split('.').try_fold(root, |current, key| current.get(key)).is_some()
}

/// Keeps a recognisable prefix such as `sk-` and hides the rest.
fn redact(secret: Option<&SecretString>) -> String {
    let Some(secret) = secret else {
        return "<unset>".to_string();
    };
    let trimmed = secret.expose_secret().trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    match trimmed.split_once('-') {
        Some((prefix, _)) if prefix.len() <= 4 => format!("{prefix}-***"),
        _ => "<redacted>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::{contains_path, redact};

    #[test]
    fn api_keys_keep_only_their_prefix() {
        assert_eq!(redact(Some(&SecretString::from("sk-live-abc123".to_string()))), "sk-***");
        assert_eq!(redact(Some(&SecretString::from("plainsecret".to_string()))), "<redacted>");
        assert_eq!(redact(None), "<unset>");
    }

    #[test]
    fn dotted_paths_walk_nested_tables() {
        let doc: toml::Value = "[llm]\nmodel = \"gpt-4o-mini\"\n".parse().expect("toml");
        assert!(contains_path(&doc, "llm.model"));
        assert!(!contains_path(&doc, "llm.api_key"));
        assert!(!contains_path(&doc, "engine.history_window"));
    }
}
