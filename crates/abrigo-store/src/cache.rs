use std::time::{Duration, Instant};

use abrigo_core::cache::{Cache, CacheError};
use async_trait::async_trait;
use dashmap::DashMap;

struct Entry {
    value: String,
    expires_at: Instant,
}

/// In-process TTL cache. Expired entries are dropped lazily on read and on
/// pattern deletes.
#[derive(Default)]
pub struct MemoryCache {
    entries: DashMap<String, Entry>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl Cache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let now = Instant::now();
        if let Some(entry) = self.entries.get(key) {
            if entry.expires_at > now {
                return Ok(Some(entry.value.clone()));
            }
        }
        self.entries.remove_if(key, |_, entry| entry.expires_at <= now);
        Ok(None)
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.to_string(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
        let matcher =
            glob::Pattern::new(pattern).map_err(|e| CacheError::InvalidPattern(e.to_string()))?;
        let now = Instant::now();
        let before = self.entries.len();
        let mut removed = 0;
        self.entries.retain(|key, entry| {
            let hit = matcher.matches(key);
            if hit && entry.expires_at > now {
                removed += 1;
            }
            !hit && entry.expires_at > now
        });
        tracing::debug!(pattern, removed, swept = before - self.entries.len(), "cache pattern delete");
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abrigo_core::cache::{context_key, user_key_pattern, DEFAULT_TTL};
    use abrigo_core::ids::UserId;

    #[tokio::test]
    async fn set_get_delete() {
        let cache = MemoryCache::new();
        cache.set("k", "v", DEFAULT_TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap().as_deref(), Some("v"));
        cache.delete("k").await.unwrap();
        assert!(cache.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entries_expire() {
        let cache = MemoryCache::new();
        cache.set("short", "v", Duration::from_millis(5)).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get("short").await.unwrap().is_none());
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn pattern_delete_scopes_to_user() {
        let cache = MemoryCache::new();
        let a = UserId::from_raw("user_a");
        let b = UserId::from_raw("user_b");
        cache.set("user:user_a:profile", "1", DEFAULT_TTL).await.unwrap();
        cache.set("user:user_a:goals", "2", DEFAULT_TTL).await.unwrap();
        cache.set("user:user_b:profile", "3", DEFAULT_TTL).await.unwrap();
        cache.set(&context_key(&a), "4", DEFAULT_TTL).await.unwrap();

        assert_eq!(cache.delete_pattern(&user_key_pattern(&a)).await.unwrap(), 2);
        assert_eq!(cache.delete_pattern(&context_key(&a)).await.unwrap(), 1);
        assert_eq!(cache.len(), 1);
        assert!(cache.get(&format!("user:{b}:profile")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_pattern() {
        let cache = MemoryCache::new();
        assert!(matches!(
            cache.delete_pattern("user:[").await,
            Err(CacheError::InvalidPattern(_))
        ));
    }
}
