use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use abrigo_core::cache::{context_key, Cache, DEFAULT_TTL};
use abrigo_core::ids::UserId;
use abrigo_core::risk::RiskLevel;
use abrigo_crypto::EncryptionSession;
use abrigo_store::{CheckinRepo, Database, GoalRepo, GoalStatus, PatternRepo, UserRepo};

use crate::error::PipelineError;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GoalBrief {
    pub title: String,
    pub progress: u8,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CheckinBrief {
    pub mood_score: Option<u8>,
    pub created_at: DateTime<Utc>,
}

/// Everything about the user that shapes the assistant's system prompt.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct UserContext {
    pub active_goals: Vec<GoalBrief>,
    pub patterns: Vec<String>,
    pub risk_level: RiskLevel,
    pub last_checkin: Option<CheckinBrief>,
    pub is_first_message: bool,
}

/// The non-sensitive, slow-changing part of the context. Nothing decrypted
/// goes in here, and neither does the risk level, which is read fresh on
/// every assembly.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CachedFragment {
    patterns: Vec<String>,
}

#[derive(Clone)]
pub struct ContextAssembler {
    users: UserRepo,
    goals: GoalRepo,
    patterns: PatternRepo,
    checkins: CheckinRepo,
    cache: Option<Arc<dyn Cache>>,
    cache_ttl: Duration,
}

impl ContextAssembler {
    pub fn new(db: Database) -> Self {
        Self {
            users: UserRepo::new(db.clone()),
            goals: GoalRepo::new(db.clone()),
            patterns: PatternRepo::new(db.clone()),
            checkins: CheckinRepo::new(db),
            cache: None,
            cache_ttl: DEFAULT_TTL,
        }
    }

    pub fn with_cache(mut self, cache: Arc<dyn Cache>, ttl: Duration) -> Self {
        self.cache = Some(cache);
        self.cache_ttl = ttl;
        self
    }

    /// Runs after the user's message is persisted, so store failures here
    /// (including a missing user row) are internal errors, never rejections.
    #[instrument(skip_all, fields(user_id = %user_id))]
    pub async fn assemble(
        &self,
        user_id: &UserId,
        session: &EncryptionSession,
        is_first_message: bool,
    ) -> Result<UserContext, PipelineError> {
        let risk_level = self.users.get(user_id).map_err(PipelineError::Store)?.risk_level;

        let fragment = match self.cached(user_id).await {
            Some(fragment) => fragment,
            None => {
                let fragment = CachedFragment {
                    patterns: self.patterns.list(user_id).map_err(PipelineError::Store)?,
                };
                self.store(user_id, &fragment).await;
                fragment
            }
        };

        let active_goals = self
            .goals
            .list(user_id, Some(GoalStatus::Active))
            .map_err(PipelineError::Store)?
            .iter()
            .map(|goal| GoalBrief {
                title: session.decrypt_or_placeholder(&goal.title),
                progress: goal.progress,
            })
            .collect();

        let last_checkin = match self.checkins.latest_for_user(user_id) {
            Ok(latest) => latest.map(|c| CheckinBrief {
                mood_score: c.mood_score,
                created_at: c.created_at,
            }),
            Err(e) => {
                warn!(error = %e, "latest check-in unavailable");
                None
            }
        };

        Ok(UserContext {
            active_goals,
            patterns: fragment.patterns,
            risk_level,
            last_checkin,
            is_first_message,
        })
    }

    /// Drop the cached fragment after the user's patterns change.
    pub async fn invalidate(&self, user_id: &UserId) {
        if let Some(cache) = &self.cache {
            if let Err(e) = cache.delete(&context_key(user_id)).await {
                debug!(error = %e, "context cache invalidation failed");
            }
        }
    }

    async fn cached(&self, user_id: &UserId) -> Option<CachedFragment> {
        let cache = self.cache.as_ref()?;
        match cache.get(&context_key(user_id)).await {
            Ok(Some(raw)) => serde_json::from_str(&raw).ok(),
            Ok(None) => None,
            Err(e) => {
                debug!(error = %e, "context cache read failed");
                None
            }
        }
    }

    async fn store(&self, user_id: &UserId, fragment: &CachedFragment) {
        let Some(cache) = &self.cache else { return };
        let Ok(raw) = serde_json::to_string(fragment) else { return };
        if let Err(e) = cache.set(&context_key(user_id), &raw, self.cache_ttl).await {
            debug!(error = %e, "context cache write failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use abrigo_core::cache::CacheError;
    use abrigo_core::security::MasterSecret;
    use abrigo_crypto::DECRYPT_PLACEHOLDER;
    use abrigo_store::{MemoryCache, NewGoal, UserRow};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};

    struct Fixture {
        db: Database,
        user: UserRow,
        session: EncryptionSession,
    }

    async fn fixture() -> Fixture {
        let db = Database::in_memory().unwrap();
        let user = UserRepo::new(db.clone()).get_or_create("sub-ctx", None).unwrap();
        let salt = user.encryption_salt.clone().unwrap();
        let session = EncryptionSession::new("sub-ctx", salt, MasterSecret::from("m"))
            .with_iterations(1_000)
            .prepared()
            .await
            .unwrap();
        Fixture { db, user, session }
    }

    fn add_goal(f: &Fixture, title: &str, progress: u8) {
        let goals = GoalRepo::new(f.db.clone());
        let goal = goals
            .create(
                &f.user.id,
                NewGoal {
                    title: f.session.encrypt(title).unwrap(),
                    description: None,
                    target_date: None,
                },
            )
            .unwrap();
        goals
            .update(
                &goal.id,
                &f.user.id,
                abrigo_store::GoalUpdate {
                    status: None,
                    progress: Some(progress),
                },
            )
            .unwrap();
    }

    #[tokio::test]
    async fn assembles_goals_patterns_and_risk() {
        let f = fixture().await;
        add_goal(&f, "Procurar apoio jurídico", 40);
        PatternRepo::new(f.db.clone()).record(&f.user.id, "gaslighting").unwrap();
        UserRepo::new(f.db.clone()).set_risk_level(&f.user.id, RiskLevel::Medium).unwrap();

        let ctx = ContextAssembler::new(f.db.clone())
            .assemble(&f.user.id, &f.session, true)
            .await
            .unwrap();

        assert_eq!(
            ctx.active_goals,
            [GoalBrief {
                title: "Procurar apoio jurídico".into(),
                progress: 40
            }]
        );
        assert_eq!(ctx.patterns, ["gaslighting"]);
        assert_eq!(ctx.risk_level, RiskLevel::Medium);
        assert!(ctx.is_first_message);
        assert!(ctx.last_checkin.is_none());
    }

    #[tokio::test]
    async fn completed_goals_excluded() {
        let f = fixture().await;
        add_goal(&f, "ativa", 10);
        let goals = GoalRepo::new(f.db.clone());
        let done = goals
            .create(
                &f.user.id,
                NewGoal {
                    title: f.session.encrypt("feita").unwrap(),
                    description: None,
                    target_date: None,
                },
            )
            .unwrap();
        goals
            .update(
                &done.id,
                &f.user.id,
                abrigo_store::GoalUpdate {
                    status: Some(GoalStatus::Completed),
                    progress: None,
                },
            )
            .unwrap();

        let ctx = ContextAssembler::new(f.db.clone())
            .assemble(&f.user.id, &f.session, false)
            .await
            .unwrap();
        assert_eq!(ctx.active_goals.len(), 1);
        assert_eq!(ctx.active_goals[0].title, "ativa");
    }

    #[tokio::test]
    async fn undecryptable_goal_gets_placeholder() {
        let f = fixture().await;
        let foreign = EncryptionSession::new("someone-else", "00112233445566778899aabbccddeeff", MasterSecret::from("m"))
            .with_iterations(1_000);
        GoalRepo::new(f.db.clone())
            .create(
                &f.user.id,
                NewGoal {
                    title: foreign.encrypt("alheia").unwrap(),
                    description: None,
                    target_date: None,
                },
            )
            .unwrap();

        let ctx = ContextAssembler::new(f.db.clone())
            .assemble(&f.user.id, &f.session, false)
            .await
            .unwrap();
        assert_eq!(ctx.active_goals[0].title, DECRYPT_PLACEHOLDER);
    }

    #[tokio::test]
    async fn latest_checkin_included() {
        let f = fixture().await;
        add_goal(&f, "meta", 0);
        let goal_id = GoalRepo::new(f.db.clone()).list(&f.user.id, None).unwrap()[0].id.clone();
        CheckinRepo::new(f.db.clone())
            .create(&f.user.id, &goal_id, None, Some(6))
            .unwrap();

        let ctx = ContextAssembler::new(f.db.clone())
            .assemble(&f.user.id, &f.session, false)
            .await
            .unwrap();
        assert_eq!(ctx.last_checkin.unwrap().mood_score, Some(6));
    }

    #[tokio::test]
    async fn cached_patterns_used_until_invalidated() {
        let f = fixture().await;
        let patterns = PatternRepo::new(f.db.clone());
        patterns.record(&f.user.id, "isolamento").unwrap();
        let cache = Arc::new(MemoryCache::new());
        let assembler = ContextAssembler::new(f.db.clone()).with_cache(cache.clone(), DEFAULT_TTL);

        let first = assembler.assemble(&f.user.id, &f.session, false).await.unwrap();
        assert_eq!(first.patterns, ["isolamento"]);
        assert!(cache.get(&context_key(&f.user.id)).await.unwrap().is_some());

        patterns.record(&f.user.id, "ciúme excessivo").unwrap();
        let cached = assembler.assemble(&f.user.id, &f.session, false).await.unwrap();
        assert_eq!(cached.patterns, ["isolamento"]);

        assembler.invalidate(&f.user.id).await;
        let fresh = assembler.assemble(&f.user.id, &f.session, false).await.unwrap();
        assert_eq!(fresh.patterns.len(), 2);
    }

    #[tokio::test]
    async fn risk_level_is_never_served_from_cache() {
        let f = fixture().await;
        let cache = Arc::new(MemoryCache::new());
        let assembler = ContextAssembler::new(f.db.clone()).with_cache(cache.clone(), DEFAULT_TTL);

        let first = assembler.assemble(&f.user.id, &f.session, false).await.unwrap();
        assert_eq!(first.risk_level, RiskLevel::Low);

        UserRepo::new(f.db.clone()).set_risk_level(&f.user.id, RiskLevel::High).unwrap();
        let second = assembler.assemble(&f.user.id, &f.session, false).await.unwrap();
        assert_eq!(second.risk_level, RiskLevel::High);
    }

    /// Escalates the user and drops the key right before the first write
    /// lands, like a concurrent emergency racing a cache miss.
    struct EscalatingCache {
        inner: MemoryCache,
        users: UserRepo,
        user_id: UserId,
        fired: AtomicBool,
    }

    #[async_trait]
    impl Cache for EscalatingCache {
        async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
            self.inner.get(key).await
        }
        async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<(), CacheError> {
            if !self.fired.swap(true, Ordering::SeqCst) {
                self.users.set_risk_level(&self.user_id, RiskLevel::High).unwrap();
                self.inner.delete(key).await?;
            }
            self.inner.set(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            self.inner.delete(key).await
        }
        async fn delete_pattern(&self, pattern: &str) -> Result<usize, CacheError> {
            self.inner.delete_pattern(pattern).await
        }
    }

    #[tokio::test]
    async fn escalation_during_cache_fill_is_not_lost() {
        let f = fixture().await;
        let cache = Arc::new(EscalatingCache {
            inner: MemoryCache::new(),
            users: UserRepo::new(f.db.clone()),
            user_id: f.user.id.clone(),
            fired: AtomicBool::new(false),
        });
        let assembler = ContextAssembler::new(f.db.clone()).with_cache(cache.clone(), DEFAULT_TTL);

        let first = assembler.assemble(&f.user.id, &f.session, false).await.unwrap();
        assert_eq!(first.risk_level, RiskLevel::Low);
        assert!(cache.fired.load(Ordering::SeqCst));

        let second = assembler.assemble(&f.user.id, &f.session, false).await.unwrap();
        assert_eq!(second.risk_level, RiskLevel::High);
    }

    #[tokio::test]
    async fn missing_user_is_internal_not_rejection() {
        let f = fixture().await;
        let err = ContextAssembler::new(f.db.clone())
            .assemble(&UserId::from_raw("user_gone"), &f.session, false)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::Store(_)));
        assert!(!err.is_rejection());
    }

    struct BrokenCache;

    #[async_trait]
    impl Cache for BrokenCache {
        async fn get(&self, _: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn set(&self, _: &str, _: &str, _: Duration) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn delete(&self, _: &str) -> Result<(), CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
        async fn delete_pattern(&self, _: &str) -> Result<usize, CacheError> {
            Err(CacheError::Unavailable("down".into()))
        }
    }

    #[tokio::test]
    async fn broken_cache_degrades_to_store() {
        let f = fixture().await;
        PatternRepo::new(f.db.clone()).record(&f.user.id, "isolamento").unwrap();
        let assembler = ContextAssembler::new(f.db.clone()).with_cache(Arc::new(BrokenCache), DEFAULT_TTL);

        let ctx = assembler.assemble(&f.user.id, &f.session, false).await.unwrap();
        assert_eq!(ctx.patterns, ["isolamento"]);
        assembler.invalidate(&f.user.id).await;
    }
}
