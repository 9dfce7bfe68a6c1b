use abrigo_core::ids::UserId;
use abrigo_core::risk::RiskLevel;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument};

use crate::database::Database;
use crate::error::StoreError;
use crate::row_helpers;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl std::fmt::Display for Theme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Light => write!(f, "light"),
            Self::Dark => write!(f, "dark"),
            Self::System => write!(f, "system"),
        }
    }
}

impl std::str::FromStr for Theme {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "light" => Ok(Self::Light),
            "dark" => Ok(Self::Dark),
            "system" => Ok(Self::System),
            other => Err(format!("unknown theme: {other}")),
        }
    }
}

#[derive(Clone, Debug)]
pub struct UserRow {
    pub id: UserId,
    /// Identity-provider uid. Stable for the life of the account and part of
    /// the key material, so it never changes.
    pub subject: String,
    pub email: Option<String>,
    pub encryption_salt: Option<String>,
    pub risk_level: RiskLevel,
    pub theme: Theme,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

/// What a user may see about their own account. No salt.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    pub id: UserId,
    pub email: Option<String>,
    pub theme: Theme,
    pub risk_level: RiskLevel,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

impl UserRow {
    pub fn profile(&self) -> UserProfile {
        UserProfile {
            id: self.id.clone(),
            email: self.email.clone(),
            theme: self.theme,
            risk_level: self.risk_level,
            created_at: self.created_at,
            last_login_at: self.last_login_at,
        }
    }
}

const SELECT_USER: &str = "SELECT id, subject, email, encryption_salt, risk_level, theme, created_at, last_login_at
     FROM users";

#[derive(Clone)]
pub struct UserRepo {
    db: Database,
}

impl UserRepo {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Look up the user for a verified identity, creating the record (with a
    /// fresh encryption salt) on first sight.
    #[instrument(skip(self, email))]
    pub fn get_or_create(&self, subject: &str, email: Option<&str>) -> Result<UserRow, StoreError> {
        if subject.is_empty() {
            return Err(StoreError::InvalidInput("empty identity subject".into()));
        }
        self.db.with_conn(|conn| {
            let (_, now) = row_helpers::now();
            let created = conn.execute(
                "INSERT OR IGNORE INTO users (id, subject, email, encryption_salt, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    UserId::new().as_str(),
                    subject,
                    email,
                    abrigo_crypto::generate_salt(),
                    now,
                ],
            )?;
            if created > 0 {
                info!("user created");
            } else if email.is_some() {
                conn.execute(
                    "UPDATE users SET email = ?1 WHERE subject = ?2",
                    rusqlite::params![email, subject],
                )?;
            }
            query_one(conn, &format!("{SELECT_USER} WHERE subject = ?1"), subject)?
                .ok_or_else(|| StoreError::NotFound(format!("user with subject {subject}")))
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn get(&self, id: &UserId) -> Result<UserRow, StoreError> {
        self.db.with_conn(|conn| {
            query_one(conn, &format!("{SELECT_USER} WHERE id = ?1"), id.as_str())?
                .ok_or_else(|| StoreError::NotFound(format!("user {id}")))
        })
    }

    /// Return the user's salt, generating and persisting one for accounts
    /// created before salts existed. An existing salt is never replaced.
    #[instrument(skip(self), fields(user_id = %id))]
    pub fn ensure_salt(&self, id: &UserId) -> Result<String, StoreError> {
        self.db.with_conn(|conn| {
            let updated = conn.execute(
                "UPDATE users SET encryption_salt = ?1 WHERE id = ?2 AND encryption_salt IS NULL",
                rusqlite::params![abrigo_crypto::generate_salt(), id.as_str()],
            )?;
            if updated > 0 {
                info!("encryption salt backfilled");
            }
            let salt: Option<String> = conn
                .query_row(
                    "SELECT encryption_salt FROM users WHERE id = ?1",
                    [id.as_str()],
                    |row| row.get(0),
                )
                .map_err(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound(format!("user {id}")),
                    other => other.into(),
                })?;
            salt.ok_or_else(|| StoreError::CorruptRow {
                table: "users",
                column: "encryption_salt",
                detail: "salt missing after backfill".into(),
            })
        })
    }

    #[instrument(skip(self), fields(user_id = %id, risk_level = %level))]
    pub fn set_risk_level(&self, id: &UserId, level: RiskLevel) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET risk_level = ?1 WHERE id = ?2",
                rusqlite::params![level.as_str(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    /// Raise the stored risk level to `level` if it is currently lower.
    /// Returns whether the row changed; never lowers an existing level.
    #[instrument(skip(self), fields(user_id = %id, risk_level = %level))]
    pub fn raise_risk_level(&self, id: &UserId, level: RiskLevel) -> Result<bool, StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET risk_level = ?1
                 WHERE id = ?2
                   AND (CASE risk_level WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END)
                     < (CASE ?1 WHEN 'high' THEN 2 WHEN 'medium' THEN 1 ELSE 0 END)",
                rusqlite::params![level.as_str(), id.as_str()],
            )?;
            if changed > 0 {
                return Ok(true);
            }
            let exists: bool = conn.query_row(
                "SELECT EXISTS(SELECT 1 FROM users WHERE id = ?1)",
                [id.as_str()],
                |row| row.get(0),
            )?;
            if !exists {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(false)
        })
    }

    #[instrument(skip(self), fields(user_id = %id, theme = %theme))]
    pub fn set_theme(&self, id: &UserId, theme: Theme) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE users SET theme = ?1 WHERE id = ?2",
                rusqlite::params![theme.to_string(), id.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::NotFound(format!("user {id}")));
            }
            Ok(())
        })
    }

    #[instrument(skip(self), fields(user_id = %id))]
    pub fn touch_login(&self, id: &UserId) -> Result<(), StoreError> {
        self.db.with_conn(|conn| {
            let (_, now) = row_helpers::now();
            conn.execute(
                "UPDATE users SET last_login_at = ?1 WHERE id = ?2",
                rusqlite::params![now, id.as_str()],
            )?;
            Ok(())
        })
    }
}

fn query_one(
    conn: &rusqlite::Connection,
    sql: &str,
    key: &str,
) -> Result<Option<UserRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([key])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_user(row)?)),
        None => Ok(None),
    }
}

fn row_to_user(row: &rusqlite::Row<'_>) -> Result<UserRow, StoreError> {
    let risk: String = row_helpers::get(row, 4, "users", "risk_level")?;
    let theme: String = row_helpers::get(row, 5, "users", "theme")?;
    let created_at: String = row_helpers::get(row, 6, "users", "created_at")?;
    let last_login_at: Option<String> = row_helpers::get_opt(row, 7, "users", "last_login_at")?;

    Ok(UserRow {
        id: UserId::from_raw(row_helpers::get::<String>(row, 0, "users", "id")?),
        subject: row_helpers::get(row, 1, "users", "subject")?,
        email: row_helpers::get_opt(row, 2, "users", "email")?,
        encryption_salt: row_helpers::get_opt(row, 3, "users", "encryption_salt")?,
        risk_level: row_helpers::parse_enum(&risk, "users", "risk_level")?,
        theme: row_helpers::parse_enum(&theme, "users", "theme")?,
        created_at: row_helpers::parse_time(&created_at, "users", "created_at")?,
        last_login_at: last_login_at
            .map(|raw| row_helpers::parse_time(&raw, "users", "last_login_at"))
            .transpose()?,
    })
}
