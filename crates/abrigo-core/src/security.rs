use secrecy::SecretString;

/// Wraps an API key with secrecy protection (zeroized on drop, redacted in Debug).
#[derive(Clone)]
pub struct ApiKey(pub SecretString);

impl std::fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("ApiKey([REDACTED])")
    }
}

/// Server-wide secret mixed into every user's key material.
#[derive(Clone)]
pub struct MasterSecret(pub SecretString);

impl std::fmt::Debug for MasterSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("MasterSecret([REDACTED])")
    }
}

impl From<&str> for MasterSecret {
    fn from(s: &str) -> Self {
        Self(SecretString::from(s))
    }
}

/// Environment variable names read at startup.
pub mod env_vars {
    pub const ENCRYPTION_MASTER_KEY: &str = "ENCRYPTION_MASTER_KEY";
    pub const CLAUDE_API_KEY: &str = "CLAUDE_API_KEY";
    pub const ANTHROPIC_API_KEY: &str = "ANTHROPIC_API_KEY";
    pub const AUTH_JWT_SECRET: &str = "AUTH_JWT_SECRET";
}
