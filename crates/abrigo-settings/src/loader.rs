//! Settings loading: compiled defaults, then `~/.abrigo/settings.json`
//! deep-merged over them, then `ABRIGO_*` environment overrides.
//!
//! Merge rules: objects merge per key, arrays and primitives are replaced,
//! nulls in the file are skipped.

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::AbrigoSettings;

pub mod env {
    pub const PORT: &str = "ABRIGO_PORT";
    pub const HOST: &str = "ABRIGO_HOST";
    pub const DB_PATH: &str = "ABRIGO_DB_PATH";
    pub const LOG_LEVEL: &str = "ABRIGO_LOG_LEVEL";
    pub const COMPLETION_TIMEOUT_MS: &str = "ABRIGO_COMPLETION_TIMEOUT_MS";
    pub const STANDARD_MODEL: &str = "ABRIGO_STANDARD_MODEL";
    pub const ADVANCED_MODEL: &str = "ABRIGO_ADVANCED_MODEL";
    pub const CACHE_ENABLED: &str = "ABRIGO_CACHE_ENABLED";
    pub const FRONTEND_URL: &str = "FRONTEND_URL";
}

/// `~/.abrigo`, falling back to `/tmp/.abrigo` when HOME is unset.
pub fn abrigo_home() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".abrigo")
}

pub fn settings_path() -> PathBuf {
    abrigo_home().join("settings.json")
}

pub fn load_settings() -> Result<AbrigoSettings> {
    load_settings_from_path(&settings_path())
}

/// Load from a specific file with process env overrides. A missing file
/// yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<AbrigoSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn load_file_layer(path: &Path) -> Result<AbrigoSettings> {
    let defaults = serde_json::to_value(AbrigoSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };
    Ok(serde_json::from_value(merged)?)
}

pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment overrides read through `lookup`. Invalid values are
/// logged and ignored.
pub fn apply_env_overrides<F>(settings: &mut AbrigoSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let reader = EnvReader { lookup };

    if let Some(v) = reader.u16(env::PORT, 1, 65535) {
        settings.server.port = v;
    }
    if let Some(v) = reader.string(env::HOST) {
        settings.server.host = v;
    }
    if let Some(v) = reader.string(env::FRONTEND_URL) {
        settings.server.frontend_url = Some(v);
    }
    if let Some(v) = reader.string(env::DB_PATH) {
        settings.database.path = v;
    }
    if let Some(v) = reader.string(env::LOG_LEVEL) {
        settings.logging.level = v;
    }
    if let Some(v) = reader.u64(env::COMPLETION_TIMEOUT_MS, 1_000, 600_000) {
        settings.completion.timeout_ms = v;
    }
    if let Some(v) = reader.string(env::STANDARD_MODEL) {
        settings.completion.standard_model = v;
    }
    if let Some(v) = reader.string(env::ADVANCED_MODEL) {
        settings.completion.advanced_model = v;
    }
    if let Some(v) = reader.bool(env::CACHE_ENABLED) {
        settings.cache.enabled = v;
    }
}

/// Accepts (case-insensitive) `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, kind: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            tracing::warn!(key = name, value = %val, kind, "invalid env var, ignoring");
        }
        result
    }

    fn bool(&self, name: &str) -> Option<bool> {
        self.parsed(name, "bool", parse_bool)
    }

    fn u16(&self, name: &str, min: u16, max: u16) -> Option<u16> {
        self.parsed(name, "u16", |v| parse_u16_range(v, min, max))
    }

    fn u64(&self, name: &str, min: u64, max: u64) -> Option<u64> {
        self.parsed(name, "u64", |v| parse_u64_range(v, min, max))
    }
}
