use abrigo_core::ids::{CheckinId, GoalId, UserId};
use abrigo_crypto::EncryptedPayload;
use chrono::{DateTime, Utc};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

pub const MOOD_MIN: u8 = 1;
pub const MOOD_MAX: u8 = 10;

#[derive(Clone, Debug, PartialEq)]
pub struct CheckinRow {
    pub id: CheckinId,
    pub user_id: UserId,
    pub goal_id: GoalId,
    pub notes: Option<EncryptedPayload>,
    pub mood_score: Option<u8>,
    pub created_at: DateTime<Utc>,
}

const SELECT_CHECKIN: &str = "SELECT id, user_id, goal_id, notes_encrypted, notes_iv, notes_auth_tag, mood_score, created_at
     FROM checkins";

#[derive(Clone)]
pub struct CheckinRepo {
    db: Database,
}

impl CheckinRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Record a check-in against a goal the user owns.
    #[instrument(skip(self, notes), fields(user_id = %user_id, goal_id = %goal_id))]
    pub fn create(
        &self,
        user_id: &UserId,
        goal_id: &GoalId,
        notes: Option<&EncryptedPayload>,
        mood_score: Option<u8>,
    ) -> Result<CheckinRow, StoreError> {
        if let Some(mood) = mood_score {
            if !(MOOD_MIN..=MOOD_MAX).contains(&mood) {
                return Err(StoreError::InvalidInput(format!(
                    "mood score must be between {MOOD_MIN} and {MOOD_MAX}, got {mood}"
                )));
            }
        }
        let id = CheckinId::new();
        let (ts, now) = row_helpers::now();

        self.db.with_conn(|conn| {
            let inserted = conn.execute(
                "INSERT INTO checkins (id, user_id, goal_id, notes_encrypted, notes_iv, notes_auth_tag, mood_score, created_at)
                 SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8
                 WHERE EXISTS (SELECT 1 FROM goals WHERE id = ?3 AND user_id = ?2)",
                rusqlite::params![
                    id.as_str(),
                    user_id.as_str(),
                    goal_id.as_str(),
                    notes.map(|n| n.ciphertext.as_str()),
                    notes.map(|n| n.iv.as_str()),
                    notes.map(|n| n.auth_tag.as_str()),
                    mood_score,
                    now,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::NotFound(format!("goal {goal_id}")));
            }
            Ok(CheckinRow {
                id,
                user_id: user_id.clone(),
                goal_id: goal_id.clone(),
                notes: notes.cloned(),
                mood_score,
                created_at: ts,
            })
        })
    }

    /// One goal's check-ins, newest first.
    #[instrument(skip(self), fields(user_id = %user_id, goal_id = %goal_id))]
    pub fn list_for_goal(&self, user_id: &UserId, goal_id: &GoalId) -> Result<Vec<CheckinRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_CHECKIN} WHERE user_id = ?1 AND goal_id = ?2 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let mut rows = stmt.query([user_id.as_str(), goal_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_checkin(row)?);
            }
            Ok(results)
        })
    }

    /// Every check-in the user has recorded, newest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list_for_user(&self, user_id: &UserId) -> Result<Vec<CheckinRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_CHECKIN} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC"
            ))?;
            let mut rows = stmt.query([user_id.as_str()])?;
            let mut results = Vec::new();
            while let Some(row) = rows.next()? {
                results.push(row_to_checkin(row)?);
            }
            Ok(results)
        })
    }

    /// The user's most recent check-in across all goals.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn latest_for_user(&self, user_id: &UserId) -> Result<Option<CheckinRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_CHECKIN} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC LIMIT 1"
            ))?;
            let mut rows = stmt.query([user_id.as_str()])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_checkin(row)?)),
                None => Ok(None),
            }
        })
    }
}

fn row_to_checkin(row: &rusqlite::Row<'_>) -> Result<CheckinRow, StoreError> {
    let created_at: String = row_helpers::get(row, 7, "checkins", "created_at")?;
    Ok(CheckinRow {
        id: CheckinId::from_raw(row_helpers::get::<String>(row, 0, "checkins", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "checkins", "user_id")?),
        goal_id: GoalId::from_raw(row_helpers::get::<String>(row, 2, "checkins", "goal_id")?),
        notes: row_helpers::get_payload_opt(row, 3, "checkins")?,
        mood_score: row_helpers::get_opt(row, 6, "checkins", "mood_score")?,
        created_at: row_helpers::parse_time(&created_at, "checkins", "created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::goals::{GoalRepo, NewGoal};
    use crate::users::UserRepo;

    fn sealed(tag: &str) -> EncryptedPayload {
        EncryptedPayload {
            ciphertext: format!("c-{tag}"),
            iv: format!("i-{tag}"),
            auth_tag: format!("t-{tag}"),
        }
    }

    struct Fixture {
        repo: CheckinRepo,
        goals: GoalRepo,
        user: UserId,
        other: UserId,
        goal: GoalId,
    }

    fn setup() -> Fixture {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let user = users.get_or_create("uid-a", None).unwrap().id;
        let other = users.get_or_create("uid-b", None).unwrap().id;
        let goals = GoalRepo::new(db.clone());
        let goal = goals
            .create(&user, NewGoal { title: sealed("g"), description: None, target_date: None })
            .unwrap()
            .id;
        Fixture { repo: CheckinRepo::new(db), goals, user, other, goal }
    }

    #[test]
    fn create_with_and_without_notes() {
        let f = setup();
        let with_notes = f.repo.create(&f.user, &f.goal, Some(&sealed("n")), Some(7)).unwrap();
        assert!(with_notes.id.as_str().starts_with("chk_"));
        f.repo.create(&f.user, &f.goal, None, None).unwrap();

        let listed = f.repo.list_for_goal(&f.user, &f.goal).unwrap();
        assert_eq!(listed.len(), 2);
        assert!(listed[0].notes.is_none());
        assert_eq!(listed[1].notes, Some(sealed("n")));
        assert_eq!(listed[1].mood_score, Some(7));
    }

    #[test]
    fn mood_out_of_range() {
        let f = setup();
        for mood in [0, 11] {
            assert!(matches!(
                f.repo.create(&f.user, &f.goal, None, Some(mood)),
                Err(StoreError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn foreign_goal_is_not_found() {
        let f = setup();
        assert!(matches!(
            f.repo.create(&f.other, &f.goal, None, Some(5)),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(
            f.repo.create(&f.user, &GoalId::from_raw("goal_missing"), None, Some(5)),
            Err(StoreError::NotFound(_))
        ));
        assert!(f.repo.list_for_goal(&f.other, &f.goal).unwrap().is_empty());
    }

    #[test]
    fn latest_spans_goals() {
        let f = setup();
        assert!(f.repo.latest_for_user(&f.user).unwrap().is_none());

        let second_goal = f
            .goals
            .create(&f.user, NewGoal { title: sealed("g2"), description: None, target_date: None })
            .unwrap()
            .id;
        f.repo.create(&f.user, &f.goal, None, Some(3)).unwrap();
        let newest = f.repo.create(&f.user, &second_goal, None, Some(8)).unwrap();

        let latest = f.repo.latest_for_user(&f.user).unwrap().unwrap();
        assert_eq!(latest.id, newest.id);
        assert_eq!(latest.mood_score, Some(8));
    }

    #[test]
    fn goal_delete_cascades() {
        let f = setup();
        f.repo.create(&f.user, &f.goal, None, Some(4)).unwrap();
        f.goals.delete(&f.goal, &f.user).unwrap();
        assert!(f.repo.latest_for_user(&f.user).unwrap().is_none());
    }
}
