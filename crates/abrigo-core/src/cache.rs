use std::time::Duration;

use async_trait::async_trait;

use crate::ids::UserId;

pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("cache unavailable: {0}")]
    Unavailable(String),
    #[error("invalid pattern: {0}")]
    InvalidPattern(String),
}

/// Optional key-value cache. Callers treat every error as a miss.
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    /// Delete every key matching a glob pattern. Returns the number removed.
    async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError>;
}

pub fn context_key(user_id: &UserId) -> String {
    format!("context:{user_id}")
}

pub fn user_key_pattern(user_id: &UserId) -> String {
    format!("user:{user_id}:*")
}
