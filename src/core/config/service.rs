use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::{Map, Value};

use super::paths::AppPaths;
use super::settings::Settings;
use super::validation::validate_config;
use crate::core::errors::RagError;

const REDACT_PLACEHOLDER: &str = "****";

const SENSITIVE_PATTERNS: [&str; 10] = [
    "api_key",
    "secret",
    "password",
    "_token",
    "token_",
    "credential",
    "private_key",
    "access_key",
    "engine_id",
    "bearer",
];

const SENSITIVE_WHITELIST: [&str; 3] = ["max_tokens", "token_limit", "tokens"];

/// Environment variables folded into the merged config, in precedence order.
/// Several names may feed one key; the first one set wins.
const ENV_OVERRIDES: [(&[&str], &[&str]); 7] = [
    (&["SERP_API_KEY", "serp_api_key"], &["search", "serpapi_api_key"]),
    (&["GOOGLE_SEARCH_API_KEY"], &["search", "google_api_key"]),
    (&["GOOGLE_SEARCH_ENGINE_ID"], &["search", "google_engine_id"]),
    (&["BRAVE_SEARCH_API_KEY"], &["search", "brave_api_key"]),
    (&["BING_SEARCH_API_KEY"], &["search", "bing_api_key"]),
    (&["GROQ_API_KEY", "LLM_API_KEY"], &["llm", "api_key"]),
    (&["EMBEDDING_API_KEY"], &["embedding", "api_key"]),
];

#[derive(Clone)]
pub struct ConfigService {
    paths: Arc<AppPaths>,
}

impl ConfigService {
    pub fn new(paths: Arc<AppPaths>) -> Self {
        Self { paths }
    }

    pub fn config_path(&self) -> PathBuf {
        if let Ok(path) = env::var("WEBRAG_CONFIG_PATH") {
            return PathBuf::from(path);
        }

        let user_config = self.paths.user_data_dir.join("config.yml");
        if user_config.exists() {
            return user_config;
        }

        self.paths.project_root.join("config.yml")
    }

    pub fn secrets_path(&self) -> PathBuf {
        self.paths.secrets_path.clone()
    }

    /// Public config with secrets and environment overrides merged on top.
    pub fn load_config(&self) -> Result<Value, RagError> {
        let _ = dotenvy::dotenv();

        let public_config = load_yaml_file(&self.config_path());
        let secrets_config = load_yaml_file(&self.secrets_path());
        let mut merged = deep_merge(&public_config, &secrets_config);
        apply_env_overrides(&mut merged, |name| env::var(name).ok());

        validate_config(&merged)?;
        Ok(merged)
    }

    pub fn load_settings(&self) -> Result<Settings, RagError> {
        let merged = self.load_config()?;
        Settings::from_value(&merged)
    }

    pub fn redact_sensitive_values(&self, value: &Value) -> Value {
        redact_sensitive_values(value)
    }
}

fn load_yaml_file(path: &Path) -> Value {
    if !path.exists() {
        return Value::Object(Map::new());
    }

    match fs::read_to_string(path) {
        Ok(contents) => match serde_yaml::from_str::<Value>(&contents) {
            Ok(value) => match value {
                Value::Object(_) => value,
                _ => Value::Object(Map::new()),
            },
            Err(err) => {
                tracing::warn!("Ignoring unreadable config {}: {}", path.display(), err);
                Value::Object(Map::new())
            }
        },
        Err(_) => Value::Object(Map::new()),
    }
}

fn apply_env_overrides<F>(config: &mut Value, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    for (names, path) in ENV_OVERRIDES.iter() {
        let value = names
            .iter()
            .filter_map(|name| lookup(name))
            .find(|value| !value.trim().is_empty());
        if let Some(value) = value {
            ensure_object_path(config, path, Value::String(value));
        }
    }
}

fn ensure_object_path(config: &mut Value, path: &[&str], value: Value) {
    if path.is_empty() {
        return;
    }

    let mut current = config;
    for (index, key) in path.iter().enumerate() {
        if index == path.len() - 1 {
            if let Some(map) = current.as_object_mut() {
                map.insert(key.to_string(), value);
            }
            return;
        }

        if !current.get(*key).map(|v| v.is_object()).unwrap_or(false) {
            let Some(map) = current.as_object_mut() else {
                return;
            };
            map.insert((*key).to_string(), Value::Object(Map::new()));
        }

        let Some(next) = current.get_mut(*key) else {
            return;
        };
        current = next;
    }
}

fn deep_merge(base: &Value, override_value: &Value) -> Value {
    match (base, override_value) {
        (Value::Object(base_map), Value::Object(override_map)) => {
            let mut merged: Map<String, Value> = base_map.clone();
            for (key, value) in override_map {
                let merged_value = match merged.get(key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value.clone(),
                };
                merged.insert(key.clone(), merged_value);
            }
            Value::Object(merged)
        }
        _ => override_value.clone(),
    }
}

fn redact_sensitive_values(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut redacted = Map::new();
            for (key, val) in map {
                if is_sensitive_key(key) && !val.is_null() {
                    redacted.insert(key.clone(), Value::String(REDACT_PLACEHOLDER.to_string()));
                } else {
                    redacted.insert(key.clone(), redact_sensitive_values(val));
                }
            }
            Value::Object(redacted)
        }
        Value::Array(items) => Value::Array(items.iter().map(redact_sensitive_values).collect()),
        _ => value.clone(),
    }
}

fn is_sensitive_key(key: &str) -> bool {
    let key_lower = key.to_lowercase();
    if SENSITIVE_WHITELIST
        .iter()
        .any(|allowed| *allowed == key_lower)
    {
        return false;
    }
    SENSITIVE_PATTERNS
        .iter()
        .any(|pattern| key_lower.contains(pattern))
}
