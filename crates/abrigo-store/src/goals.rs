use abrigo_core::ids::{GoalId, UserId};
use abrigo_crypto::EncryptedPayload;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GoalStatus {
    #[default]
    Active,
    Completed,
    Abandoned,
}

impl GoalStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Abandoned => "abandoned",
        }
    }
}

impl std::fmt::Display for GoalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for GoalStatus {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(Self::Active),
            "completed" => Ok(Self::Completed),
            "abandoned" => Ok(Self::Abandoned),
            other => Err(format!("unknown goal status: {other}")),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GoalRow {
    pub id: GoalId,
    pub user_id: UserId,
    pub title: EncryptedPayload,
    pub description: Option<EncryptedPayload>,
    pub target_date: Option<NaiveDate>,
    pub status: GoalStatus,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// Sealed fields for a new goal.
#[derive(Clone, Debug)]
pub struct NewGoal {
    pub title: EncryptedPayload,
    pub description: Option<EncryptedPayload>,
    pub target_date: Option<NaiveDate>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct GoalUpdate {
    pub status: Option<GoalStatus>,
    pub progress: Option<u8>,
}

const SELECT_GOAL: &str = "SELECT id, user_id, title_encrypted, title_iv, title_auth_tag,
            description_encrypted, description_iv, description_auth_tag,
            target_date, status, progress, created_at, updated_at, completed_at
     FROM goals";

#[derive(Clone)]
pub struct GoalRepo {
    db: Database,
}

impl GoalRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, goal), fields(user_id = %user_id))]
    pub fn create(&self, user_id: &UserId, goal: NewGoal) -> Result<GoalRow, StoreError> {
        let id = GoalId::new();
        let (ts, now) = row_helpers::now();
        let description = goal.description.as_ref();

        self.db.with_conn(|conn| {
            conn.execute(
                "INSERT INTO goals (id, user_id, title_encrypted, title_iv, title_auth_tag,
                                    description_encrypted, description_iv, description_auth_tag,
                                    target_date, status, progress, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, 'active', 0, ?10, ?10)",
                rusqlite::params![
                    id.as_str(),
                    user_id.as_str(),
                    goal.title.ciphertext,
                    goal.title.iv,
                    goal.title.auth_tag,
                    description.map(|d| d.ciphertext.as_str()),
                    description.map(|d| d.iv.as_str()),
                    description.map(|d| d.auth_tag.as_str()),
                    goal.target_date.map(|d| d.to_string()),
                    now,
                ],
            )?;
            Ok(GoalRow {
                id,
                user_id: user_id.clone(),
                title: goal.title.clone(),
                description: goal.description.clone(),
                target_date: goal.target_date,
                status: GoalStatus::Active,
                progress: 0,
                created_at: ts,
                updated_at: ts,
                completed_at: None,
            })
        })
    }

    /// A user's goals, newest first, optionally filtered by status.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub fn list(&self, user_id: &UserId, status: Option<GoalStatus>) -> Result<Vec<GoalRow>, StoreError> {
        self.db.with_conn(|conn| {
            let mut results = Vec::new();
            match status {
                Some(status) => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_GOAL} WHERE user_id = ?1 AND status = ?2 ORDER BY created_at DESC, rowid DESC"
                    ))?;
                    let mut rows = stmt.query([user_id.as_str(), status.as_str()])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_goal(row)?);
                    }
                }
                None => {
                    let mut stmt = conn.prepare(&format!(
                        "{SELECT_GOAL} WHERE user_id = ?1 ORDER BY created_at DESC, rowid DESC"
                    ))?;
                    let mut rows = stmt.query([user_id.as_str()])?;
                    while let Some(row) = rows.next()? {
                        results.push(row_to_goal(row)?);
                    }
                }
            }
            Ok(results)
        })
    }

    #[instrument(skip(self), fields(goal_id = %id, user_id = %user_id))]
    pub fn get_owned(&self, id: &GoalId, user_id: &UserId) -> Result<GoalRow, StoreError> {
        self.db.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!("{SELECT_GOAL} WHERE id = ?1 AND user_id = ?2"))?;
            let mut rows = stmt.query([id.as_str(), user_id.as_str()])?;
            match rows.next()? {
                Some(row) => row_to_goal(row),
                None => Err(StoreError::NotFound(format!("goal {id}"))),
            }
        })
    }

    /// Apply a status and/or progress change. Completing a goal stamps
    /// `completed_at`; any other status clears it.
    #[instrument(skip(self), fields(goal_id = %id, user_id = %user_id))]
    pub fn update(&self, id: &GoalId, user_id: &UserId, update: GoalUpdate) -> Result<GoalRow, StoreError> {
        if update.status.is_none() && update.progress.is_none() {
            return Err(StoreError::InvalidInput("nothing to update".into()));
        }
        if let Some(progress) = update.progress {
            if progress > 100 {
                return Err(StoreError::InvalidInput(format!(
                    "progress must be between 0 and 100, got {progress}"
                )));
            }
        }

        self.db.with_conn(|conn| {
            let (_, now) = row_helpers::now();
            let completed_at = update
                .status
                .map(|s| (s == GoalStatus::Completed).then(|| now.clone()));
            let changed = conn.execute(
                "UPDATE goals SET
                    status = COALESCE(?1, status),
                    progress = COALESCE(?2, progress),
                    completed_at = CASE WHEN ?3 THEN ?4 ELSE completed_at END,
                    updated_at = ?5
                 WHERE id = ?6 AND user_id = ?7",
                rusqlite::params![
                    update.status.map(|s| s.as_str()),
                    update.progress,
                    completed_at.is_some(),
                    completed_at.flatten(),
                    now,
                    id.as_str(),
                    user_id.as_str(),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("goal {id}")));
            }
            Ok(())
        })?;
        self.get_owned(id, user_id)
    }

    /// Delete an owned goal. Its check-ins go with it (FK cascade).
    #[instrument(skip(self), fields(goal_id = %id, user_id = %user_id))]
    pub fn delete(&self, id: &GoalId, user_id: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "DELETE FROM goals WHERE id = ?1 AND user_id = ?2",
                [id.as_str(), user_id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("goal {id}")));
            }
            Ok(())
        })
    }
}

fn row_to_goal(row: &rusqlite::Row<'_>) -> Result<GoalRow, StoreError> {
    let target_date: Option<String> = row_helpers::get_opt(row, 8, "goals", "target_date")?;
    let status: String = row_helpers::get(row, 9, "goals", "status")?;
    let progress: i64 = row_helpers::get(row, 10, "goals", "progress")?;
    let created_at: String = row_helpers::get(row, 11, "goals", "created_at")?;
    let updated_at: String = row_helpers::get(row, 12, "goals", "updated_at")?;
    let completed_at: Option<String> = row_helpers::get_opt(row, 13, "goals", "completed_at")?;

    Ok(GoalRow {
        id: GoalId::from_raw(row_helpers::get::<String>(row, 0, "goals", "id")?),
        user_id: UserId::from_raw(row_helpers::get::<String>(row, 1, "goals", "user_id")?),
        title: row_helpers::get_payload(row, 2, "goals")?,
        description: row_helpers::get_payload_opt(row, 5, "goals")?,
        target_date: target_date
            .map(|raw| {
                raw.parse::<NaiveDate>().map_err(|e| StoreError::CorruptRow {
                    table: "goals",
                    column: "target_date",
                    detail: e.to_string(),
                })
            })
            .transpose()?,
        status: row_helpers::parse_enum(&status, "goals", "status")?,
        progress: u8::try_from(progress).map_err(|_| StoreError::CorruptRow {
            table: "goals",
            column: "progress",
            detail: format!("out of range: {progress}"),
        })?,
        created_at: row_helpers::parse_time(&created_at, "goals", "created_at")?,
        updated_at: row_helpers::parse_time(&updated_at, "goals", "updated_at")?,
        completed_at: completed_at
            .map(|raw| row_helpers::parse_time(&raw, "goals", "completed_at"))
            .transpose()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::UserRepo;

    fn sealed(tag: &str) -> EncryptedPayload {
        EncryptedPayload {
            ciphertext: format!("c-{tag}"),
            iv: format!("i-{tag}"),
            auth_tag: format!("t-{tag}"),
        }
    }

    fn setup() -> (GoalRepo, UserId, UserId) {
        let db = Database::in_memory().unwrap();
        let users = UserRepo::new(db.clone());
        let a = users.get_or_create("uid-a", None).unwrap();
        let b = users.get_or_create("uid-b", None).unwrap();
        (GoalRepo::new(db), a.id, b.id)
    }

    fn new_goal(tag: &str) -> NewGoal {
        NewGoal {
            title: sealed(tag),
            description: None,
            target_date: None,
        }
    }

    #[test]
    fn create_and_fetch() {
        let (repo, user, _) = setup();
        let goal = repo
            .create(
                &user,
                NewGoal {
                    title: sealed("t"),
                    description: Some(sealed("d")),
                    target_date: NaiveDate::from_ymd_opt(2026, 12, 31),
                },
            )
            .unwrap();
        assert!(goal.id.as_str().starts_with("goal_"));

        let fetched = repo.get_owned(&goal.id, &user).unwrap();
        assert_eq!(fetched.title, sealed("t"));
        assert_eq!(fetched.description, Some(sealed("d")));
        assert_eq!(fetched.target_date, NaiveDate::from_ymd_opt(2026, 12, 31));
        assert_eq!(fetched.status, GoalStatus::Active);
        assert_eq!(fetched.progress, 0);
    }

    #[test]
    fn list_filters_by_status() {
        let (repo, user, _) = setup();
        let a = repo.create(&user, new_goal("a")).unwrap();
        repo.create(&user, new_goal("b")).unwrap();
        repo.update(&a.id, &user, GoalUpdate { status: Some(GoalStatus::Completed), progress: None })
            .unwrap();

        assert_eq!(repo.list(&user, None).unwrap().len(), 2);
        let active = repo.list(&user, Some(GoalStatus::Active)).unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].title, sealed("b"));
    }

    #[test]
    fn completing_stamps_completed_at() {
        let (repo, user, _) = setup();
        let goal = repo.create(&user, new_goal("a")).unwrap();

        let done = repo
            .update(&goal.id, &user, GoalUpdate { status: Some(GoalStatus::Completed), progress: Some(100) })
            .unwrap();
        assert_eq!(done.status, GoalStatus::Completed);
        assert_eq!(done.progress, 100);
        assert!(done.completed_at.is_some());

        let progress_only = repo
            .update(&goal.id, &user, GoalUpdate { status: None, progress: Some(90) })
            .unwrap();
        assert!(progress_only.completed_at.is_some());

        let reopened = repo
            .update(&goal.id, &user, GoalUpdate { status: Some(GoalStatus::Active), progress: None })
            .unwrap();
        assert!(reopened.completed_at.is_none());
        assert_eq!(reopened.progress, 90);
    }

    #[test]
    fn update_validation() {
        let (repo, user, _) = setup();
        let goal = repo.create(&user, new_goal("a")).unwrap();
        assert!(matches!(
            repo.update(&goal.id, &user, GoalUpdate { status: None, progress: Some(101) }),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            repo.update(&goal.id, &user, GoalUpdate::default()),
            Err(StoreError::InvalidInput(_))
        ));
    }

    #[test]
    fn other_users_goals_are_not_found() {
        let (repo, owner, intruder) = setup();
        let goal = repo.create(&owner, new_goal("a")).unwrap();
        assert!(matches!(repo.get_owned(&goal.id, &intruder), Err(StoreError::NotFound(_))));
        assert!(matches!(
            repo.update(&goal.id, &intruder, GoalUpdate { status: None, progress: Some(5) }),
            Err(StoreError::NotFound(_))
        ));
        assert!(matches!(repo.delete(&goal.id, &intruder), Err(StoreError::NotFound(_))));
        assert_eq!(repo.get_owned(&goal.id, &owner).unwrap().progress, 0);
    }

    #[test]
    fn delete_goal() {
        let (repo, user, _) = setup();
        let goal = repo.create(&user, new_goal("a")).unwrap();
        repo.delete(&goal.id, &user).unwrap();
        assert!(repo.list(&user, None).unwrap().is_empty());
    }

    #[test]
    fn status_parse() {
        assert_eq!("abandoned".parse::<GoalStatus>().unwrap(), GoalStatus::Abandoned);
        assert!("paused".parse::<GoalStatus>().is_err());
    }
}
