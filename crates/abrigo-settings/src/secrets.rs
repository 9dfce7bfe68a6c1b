use abrigo_core::security::{env_vars, ApiKey, MasterSecret};
use secrecy::SecretString;

use crate::errors::{Result, SettingsError};

/// Secrets are read from the environment only and never written to the
/// settings file.
#[derive(Clone, Debug, Default)]
pub struct Secrets {
    pub master_key: Option<MasterSecret>,
    pub completion_api_key: Option<ApiKey>,
    pub jwt_secret: Option<JwtSecret>,
}

#[derive(Clone)]
pub struct JwtSecret(pub SecretString);

impl std::fmt::Debug for JwtSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("JwtSecret([REDACTED])")
    }
}

impl Secrets {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// `CLAUDE_API_KEY` wins over `ANTHROPIC_API_KEY` when both are set.
    pub fn from_lookup<F: Fn(&str) -> Option<String>>(lookup: F) -> Self {
        let read = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        Self {
            master_key: read(env_vars::ENCRYPTION_MASTER_KEY)
                .map(|v| MasterSecret(SecretString::from(v))),
            completion_api_key: read(env_vars::CLAUDE_API_KEY)
                .or_else(|| read(env_vars::ANTHROPIC_API_KEY))
                .map(|v| ApiKey(SecretString::from(v))),
            jwt_secret: read(env_vars::AUTH_JWT_SECRET).map(|v| JwtSecret(SecretString::from(v))),
        }
    }

    pub fn require_master_key(&self) -> Result<&MasterSecret> {
        self.master_key
            .as_ref()
            .ok_or(SettingsError::MissingSecret(env_vars::ENCRYPTION_MASTER_KEY))
    }

    pub fn require_api_key(&self) -> Result<&ApiKey> {
        self.completion_api_key
            .as_ref()
            .ok_or(SettingsError::MissingSecret(env_vars::CLAUDE_API_KEY))
    }

    pub fn require_jwt_secret(&self) -> Result<&JwtSecret> {
        self.jwt_secret
            .as_ref()
            .ok_or(SettingsError::MissingSecret(env_vars::AUTH_JWT_SECRET))
    }
}
