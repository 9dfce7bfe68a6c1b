use abrigo_core::ids::{CheckinId, GoalId, UserId};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use tracing::{info, instrument};

use crate::checkins::{CheckinRepo, CheckinRow};
use crate::conversations::{ConversationRepo, ConversationRow};
use crate::database::Database;
use crate::error::StoreError;
use crate::goals::{GoalRepo, GoalRow, GoalStatus};
use crate::messages::MessageRepo;
use crate::row_helpers;
use crate::users::{UserProfile, UserRepo};

pub const EXPORT_NOTE: &str =
    "Mensagens estão criptografadas e requerem sua chave para exportação completa";

const AUDIT_SALT: &str = "abrigo-security-log";

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GoalSummary {
    pub id: GoalId,
    pub status: GoalStatus,
    pub progress: u8,
    pub target_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl From<&GoalRow> for GoalSummary {
    fn from(goal: &GoalRow) -> Self {
        Self {
            id: goal.id.clone(),
            status: goal.status,
            progress: goal.progress,
            target_date: goal.target_date,
            created_at: goal.created_at,
            completed_at: goal.completed_at,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckinSummary {
    pub id: CheckinId,
    pub goal_id: GoalId,
    pub mood_score: Option<u8>,
    pub has_notes: bool,
    pub created_at: DateTime<Utc>,
}

impl From<&CheckinRow> for CheckinSummary {
    fn from(checkin: &CheckinRow) -> Self {
        Self {
            id: checkin.id.clone(),
            goal_id: checkin.goal_id.clone(),
            mood_score: checkin.mood_score,
            has_notes: checkin.notes.is_some(),
            created_at: checkin.created_at,
        }
    }
}

/// Metadata-only export of everything stored for a user. Sealed content is
/// left out; only the owner's key could open it.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AccountExport {
    pub export_date: DateTime<Utc>,
    pub user: UserProfile,
    pub conversations: Vec<ConversationRow>,
    pub goals: Vec<GoalSummary>,
    pub checkins: Vec<CheckinSummary>,
    pub message_count: u64,
    pub note: &'static str,
}

#[derive(Clone)]
pub struct AccountRepo {
    db: Database,
}

impl AccountRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn record_consent(&self, user_id: &UserId, consent_type: &str, accepted: bool) -> Result<(), StoreError> {
        let consent_type = consent_type.trim();
        if consent_type.is_empty() {
            return Err(StoreError::InvalidInput("consent type is required".into()));
        }
        self.db.with_conn(|conn| {
            let (_, now) = row_helpers::now();
            conn.execute(
                "INSERT INTO consents (user_id, consent_type, accepted, created_at) VALUES (?1, ?2, ?3, ?4)",
                rusqlite::params![user_id.as_str(), consent_type, accepted, now],
            )?;
            Ok(())
        })
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn export(&self, user_id: &UserId) -> Result<AccountExport, StoreError> {
        let user = UserRepo::new(self.db.clone()).get(user_id)?;
        let conversations = ConversationRepo::new(self.db.clone()).list(user_id)?;
        let goals = GoalRepo::new(self.db.clone()).list(user_id, None)?;
        let checkins = CheckinRepo::new(self.db.clone()).list_for_user(user_id)?;
        let message_count = MessageRepo::new(self.db.clone()).count_for_user(user_id)?;

        Ok(AccountExport {
            export_date: Utc::now(),
            user: user.profile(),
            conversations,
            goals: goals.iter().map(GoalSummary::from).collect(),
            checkins: checkins.iter().map(CheckinSummary::from).collect(),
            message_count,
            note: EXPORT_NOTE,
        })
    }

    /// Permanently delete a user and everything they own. The audit row and
    /// the delete commit together or not at all. The audit row keeps only a
    /// one-way hash of the user id.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn delete_account(&self, user_id: &UserId) -> Result<(), StoreError> {
        let subject_hash = abrigo_crypto::kdf::hash_identifier(user_id.as_str(), AUDIT_SALT);
        self.db.with_tx(|tx| {
            let (_, now) = row_helpers::now();
            tx.execute(
                "INSERT INTO security_logs (subject_hash, event_type, created_at)
                 VALUES (?1, 'account_deleted', ?2)",
                rusqlite::params![subject_hash, now],
            )?;
            let deleted = tx.execute("DELETE FROM users WHERE id = ?1", [user_id.as_str()])?;
            if deleted == 0 {
                return Err(StoreError::NotFound(format!("user {user_id}")));
            }
            Ok(())
        })?;
        info!("account deleted");
        Ok(())
    }
}
