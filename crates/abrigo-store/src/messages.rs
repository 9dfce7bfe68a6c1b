use abrigo_core::ids::{ConversationId, MessageId, UserId};
use abrigo_core::messages::Role;
use abrigo_crypto::EncryptedPayload;
use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

/// A stored message. Content stays sealed; callers decrypt with the owner's
/// session. Messages are immutable once written.
#[derive(Clone, Debug, PartialEq)]
pub struct MessageRow {
    pub id: MessageId,
    pub conversation_id: ConversationId,
    pub role: Role,
    pub content: EncryptedPayload,
    pub created_at: DateTime<Utc>,
}

const SELECT_MESSAGE: &str = "SELECT id, conversation_id, role, content_encrypted, content_iv, content_auth_tag, created_at
     FROM messages";

#[derive(Clone)]
pub struct MessageRepo {
    db: Database,
}

impl MessageRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Append a message and bump the conversation's `updated_at`.
    #[instrument(skip(self, content), fields(conversation_id = %conversation_id, role = %role))]
    pub fn insert(
        &self,
        conversation_id: &ConversationId,
        role: Role,
        content: &EncryptedPayload,
    ) -> Result<MessageRow, StoreError> {
        let id = MessageId::new();
        let (ts, now) = row_helpers::now();

        self.db.with_tx(|tx| {
            tx.execute(
                "INSERT INTO messages (id, conversation_id, role, content_encrypted, content_iv, content_auth_tag, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![
                    id.as_str(),
                    conversation_id.as_str(),
                    role.as_str(),
                    content.ciphertext,
                    content.iv,
                    content.auth_tag,
                    now,
                ],
            )?;
            tx.execute(
                "UPDATE conversations SET updated_at = ?1 WHERE id = ?2",
                rusqlite::params![now, conversation_id.as_str()],
            )?;
            Ok(MessageRow {
                id,
                conversation_id: conversation_id.clone(),
                role,
                content: content.clone(),
                created_at: ts,
            })
        })
    }

    /// Every message in a conversation, oldest first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id))]
    pub fn list(&self, conversation_id: &ConversationId) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE} WHERE conversation_id = ?1 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = collect(stmt.query([conversation_id.as_str()])?);
            rows
        })
    }

    /// The newest `limit` messages, returned oldest first.
    #[instrument(skip(self), fields(conversation_id = %conversation_id, limit))]
    pub fn recent(&self, conversation_id: &ConversationId, limit: u32) -> Result<Vec<MessageRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_MESSAGE} WHERE conversation_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT ?2"
            ))?;
            let mut newest_first =
                collect(stmt.query(rusqlite::params![conversation_id.as_str(), limit])?)?;
            newest_first.reverse();
            Ok(newest_first)
        })
    }

    #[instrument(skip(self), fields(conversation_id = %conversation_id, role = %role))]
    pub fn count_by_role(&self, conversation_id: &ConversationId, role: Role) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE conversation_id = ?1 AND role = ?2",
                [conversation_id.as_str(), role.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Messages across all of a user's conversations.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn count_for_user(&self, user_id: &UserId) -> Result<u64, StoreError> {
        self.db.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM messages m
                 JOIN conversations c ON c.id = m.conversation_id
                 WHERE c.user_id = ?1",
                [user_id.as_str()],
                |row| row.get(0),
            )?;
            Ok(count as u64)
        })
    }
}

fn collect(mut rows: rusqlite::Rows<'_>) -> Result<Vec<MessageRow>, StoreError> {
    let mut results = Vec::new();
    while let Some(row) = rows.next()? {
        results.push(row_to_message(row)?);
    }
    Ok(results)
}

fn row_to_message(row: &rusqlite::Row<'_>) -> Result<MessageRow, StoreError> {
    let role: String = row_helpers::get(row, 2, "messages", "role")?;
    let created_at: String = row_helpers::get(row, 6, "messages", "created_at")?;
    Ok(MessageRow {
        id: MessageId::from_raw(row_helpers::get::<String>(row, 0, "messages", "id")?),
        conversation_id: ConversationId::from_raw(row_helpers::get::<String>(
            row,
            1,
            "messages",
            "conversation_id",
        )?),
        role: row_helpers::parse_enum(&role, "messages", "role")?,
        content: row_helpers::get_payload(row, 3, "messages")?,
        created_at: row_helpers::parse_time(&created_at, "messages", "created_at")?,
    })
}
