use abrigo_core::ids::UserId;
use tracing::{debug, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Append-only record of behavioral pattern tags seen for a user.
#[derive(Clone)]
pub struct PatternRepo {
    db: Database,
}

impl PatternRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a tag. Returns `true` only the first time a tag is seen for the
    /// user; repeats are ignored.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn record(&self, user_id: &UserId, pattern: &str) -> Result<bool, StoreError> {
        let pattern = pattern.trim();
        if pattern.is_empty() {
            return Ok(false);
        }
        self.db.with_conn(|conn| {
            let (_, now) = row_helpers::now();
            let inserted = conn.execute(
                "INSERT OR IGNORE INTO identified_patterns (user_id, pattern_type, first_detected_at)
                 VALUES (?1, ?2, ?3)",
                rusqlite::params![user_id.as_str(), pattern, now],
            )?;
            if inserted > 0 {
                debug!(pattern, "new pattern recorded");
            }
            Ok(inserted > 0)
        })
    }

    /// Record several tags, returning how many were new.
    pub fn record_all<'a>(
        &self,
        user_id: &UserId,
        patterns: impl IntoIterator<Item = &'a str>,
    ) -> Result<usize, StoreError> {
        let mut added = 0;
        for pattern in patterns {
            if self.record(user_id, pattern)? {
                added += 1;
            }
        }
        Ok(added)
    }

    /// Tags in the order they were first detected.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list(&self, user_id: &UserId) -> Result<Vec<String>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT pattern_type FROM identified_patterns WHERE user_id = ?1 ORDER BY id ASC",
            )?;
            let rows = stmt.query_map([user_id.as_str()], |row| row.get::<_, String>(0))?;
            Ok(rows.collect::<Result<_, _>>()?)
        })
    }
}
