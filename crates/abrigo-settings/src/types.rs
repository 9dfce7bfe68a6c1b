use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Root settings object. Every section falls back to its defaults, so a
/// settings file only needs the keys it changes.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AbrigoSettings {
    pub server: ServerSettings,
    pub database: DatabaseSettings,
    pub logging: LoggingSettings,
    pub completion: CompletionSettings,
    pub cache: CacheSettings,
    pub auth: AuthSettings,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    /// Per-connection outbound queue depth.
    pub max_send_queue: usize,
    pub heartbeat_interval_ms: u64,
    /// Connections silent for longer than this are dropped.
    pub client_timeout_ms: u64,
    /// Browser origin allowed by CORS. `None` allows any origin.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub frontend_url: Option<String>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            max_send_queue: 256,
            heartbeat_interval_ms: 30_000,
            client_timeout_ms: 90_000,
            frontend_url: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct DatabaseSettings {
    /// Relative paths resolve against `~/.abrigo`.
    pub path: String,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: "abrigo.db".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    pub level: String,
    pub log_to_sqlite: bool,
    pub db_path: String,
    pub retention_days: u32,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_to_sqlite: true,
            db_path: "logs.db".to_string(),
            retention_days: 14,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionSettings {
    /// Model for routine replies, classification and summaries.
    pub standard_model: String,
    /// Model for first messages, complex messages and high-risk users.
    pub advanced_model: String,
    pub standard_max_tokens: u32,
    pub advanced_max_tokens: u32,
    /// Upper bound on one completion call, retries included.
    pub timeout_ms: u64,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub base_url: String,
}

impl Default for CompletionSettings {
    fn default() -> Self {
        Self {
            standard_model: "claude-3-haiku-20240307".to_string(),
            advanced_model: "claude-3-5-sonnet-20241022".to_string(),
            standard_max_tokens: 1024,
            advanced_max_tokens: 2048,
            timeout_ms: 60_000,
            max_retries: 3,
            retry_base_delay_ms: 1_000,
            base_url: "https://api.anthropic.com".to_string(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CacheSettings {
    pub enabled: bool,
    pub ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3_600,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// Expected `iss` claim, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    /// Expected `aud` claim, when set.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
}

impl AbrigoSettings {
    /// Resolve a configured path: absolute paths as-is, relative ones under
    /// the abrigo home directory.
    pub fn resolve_path(raw: &str) -> PathBuf {
        let path = PathBuf::from(raw);
        if path.is_absolute() {
            path
        } else {
            crate::loader::abrigo_home().join(path)
        }
    }

    pub fn database_path(&self) -> PathBuf {
        Self::resolve_path(&self.database.path)
    }

    pub fn log_db_path(&self) -> PathBuf {
        Self::resolve_path(&self.logging.db_path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let s = AbrigoSettings::default();
        assert_eq!(s.server.port, 3000);
        assert_eq!(s.completion.standard_max_tokens, 1024);
        assert_eq!(s.completion.advanced_max_tokens, 2048);
        assert!(s.cache.enabled);
        assert!(s.auth.issuer.is_none());
    }

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(AbrigoSettings::default()).unwrap();
        assert!(json["server"]["maxSendQueue"].is_number());
        assert!(json["completion"]["standardModel"].is_string());
        assert!(json["server"].get("frontendUrl").is_none());
    }

    #[test]
    fn paths_resolve_under_home() {
        let s = AbrigoSettings::default();
        assert!(s.database_path().ends_with(".abrigo/abrigo.db"));
        assert_eq!(AbrigoSettings::resolve_path("/var/lib/abrigo.db"), PathBuf::from("/var/lib/abrigo.db"));
    }
}
