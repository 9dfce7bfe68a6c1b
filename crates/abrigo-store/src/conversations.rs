use abrigo_core::ids::{ConversationId, UserId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// Title given to conversations until the first user message names them.
pub const DEFAULT_TITLE: &str = "Nova conversa";

/// Titles treated as "still default". Older clients created the capitalized form.
const DEFAULT_TITLES: [&str; 2] = [DEFAULT_TITLE, "Nova Conversa"];

const TITLE_MAX_CHARS: usize = 50;

/// Derive a conversation title from the first user message: the first 50
/// characters, with an ellipsis when truncated.
pub fn title_from_message(message: &str) -> String {
    let trimmed = message.trim();
    let mut chars = trimmed.chars();
    let head: String = chars.by_ref().take(TITLE_MAX_CHARS).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}

pub fn is_default_title(title: &str) -> bool {
    DEFAULT_TITLES.contains(&title)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationRow {
    pub id: ConversationId,
    pub user_id: UserId,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

const SELECT_CONVERSATION: &str =
    "SELECT id, user_id, title, created_at, updated_at FROM conversations";

#[derive(Clone)]
pub struct ConversationRepo {
    db: Database,
}

impl ConversationRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, title), fields(user_id = %user_id))]
    pub fn create(&self, user_id: &UserId, title: Option<&str>) -> Result<ConversationRow, StoreError> {
        let title = match title.map(str::trim) {
            Some(t) if !t.is_empty() => t.to_string(),
            _ => DEFAULT_TITLE.to_string(),
        };
        let id = ConversationId::new();
        let (ts, now) = row_helpers::now();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversations (id, user_id, title, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?4)",
                rusqlite::params![id.as_str(), user_id.as_str(), title, now],
            )?;
            Ok(ConversationRow {
                id,
                user_id: user_id.clone(),
                title,
                created_at: ts,
                updated_at: ts,
            })
        })
    }

    /// Fetch a conversation only if `user_id` owns it. Someone else's
    /// conversation is indistinguishable from a missing one.
    #[instrument(skip(self), fields(conversation_id = %id, user_id = %user_id))]
    pub fn get_owned(&self, id: &ConversationId, user_id: &UserId) -> Result<ConversationRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_CONVERSATION} WHERE id = ?1 AND user_id = ?2"
            ))?;
            let mut rows = stmt.query([id.as_str(), user_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_conversation(row),
                None => Err(StoreError::NotFound(format!("conversation {id}"))),
            }
        })
    }

    /// List a user's conversations, most recently active first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list(&self, user_id: &UserId) -> Result<Vec<ConversationRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_CONVERSATION} WHERE user_id = ?1 ORDER BY updated_at DESC, rowid DESC"
            ))?;
            let mut rows = stmt.query([user_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_conversation(row)?);
            }
            Ok(results)
        })
    }

    #[instrument(skip(self, title), fields(conversation_id = %id, user_id = %user_id))]
    pub fn rename(&self, id: &ConversationId, user_id: &UserId, title: &str) -> Result<(), StoreError> {
        let title = title.trim();
        if title.is_empty() {
            return Err(StoreError::InvalidInput("title must not be empty".into()));
        }
        self.db.with_conn(|conn| {
            let (_, now) = row_helpers::now();
            let changed = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2 WHERE id = ?3 AND user_id = ?4",
                rusqlite::params![title, now, id.as_str(), user_id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }

    /// Replace the title only while it is still a default one. Returns
    /// whether the title changed.
    #[instrument(skip(self, title), fields(conversation_id = %id))]
    pub fn set_title_if_default(&self, id: &ConversationId, title: &str) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let (_, now) = row_helpers::now();
            let changed = conn.execute(
                "UPDATE conversations SET title = ?1, updated_at = ?2
                 WHERE id = ?3 AND title IN (?4, ?5)",
                rusqlite::params![title, now, id.as_str(), DEFAULT_TITLES[0], DEFAULT_TITLES[1]],
            )?;
            Ok(changed > 0)
        })
    }

    /// Delete an owned conversation. Messages go with it (FK cascade).
    #[instrument(skip(self), fields(conversation_id = %id, user_id = %user_id))]
    pub fn delete(&self, id: &ConversationId, user_id: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM conversations WHERE id = ?1 AND user_id = ?2",
                [id.as_str(), user_id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("conversation {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> Result<ConversationRow, StoreError> {
    let created_at: String = row_helpers::get(row, 3, "conversations", "created_at")?;
    let updated_at: String = row_helpers::get(row, 4, "conversations", "updated_at")?;
    Ok(ConversationRow {
        id: ConversationId::from_raw(row_helpers::get::<String>(row, 0, "conversations", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "conversations", "user_id")?),
        title: row_helpers::get(row, 2, "conversations", "title")?,
        created_at: row_helpers::parse_time(&created_at, "conversations", "created_at")?,
        updated_at: row_helpers::parse_time(&updated_at, "conversations", "updated_at")?,
    })
}
