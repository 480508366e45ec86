//! User records and roles.
//!
//! Users are created lazily the first time they write to the bot. Roles are
//! only changed from the command line; anyone at [`UserRole::Developer`] or
//! above receives operator diagnostics.

use std::str::FromStr;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Access level, ordered from least to most privileged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Developer,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Developer => "developer",
            Self::Admin => "admin",
        }
    }
}

impl FromStr for UserRole {
    type Err = StoreError;

    fn from_str(s: &str) -> StoreResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "user" => Ok(Self::User),
            "developer" | "dev" => Ok(Self::Developer),
            "admin" => Ok(Self::Admin),
            other => Err(StoreError::InvalidArgument(format!("unknown role: {other}"))),
        }
    }
}

impl std::fmt::Display for UserRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A persisted Telegram user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub id: i64,
    pub telegram_id: i64,
    /// Display name (Telegram first name at last contact).
    pub name: String,
    pub role: UserRole,
    pub created_at: i64,
    pub updated_at: i64,
}

impl UserRecord {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        let role: String = row.get(3)?;
        let role = role.parse().map_err(|e: StoreError| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(Self {
            id: row.get(0)?,
            telegram_id: row.get(1)?,
            name: row.get(2)?,
            role,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
        })
    }
}

const SELECT_USER: &str =
    "SELECT id, telegram_id, name, role, created_at, updated_at FROM users";

// ═══════════════════════════════════════════════════════════════════════
//  UserStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct UserStore {
    db: Database,
}

impl UserStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn find_by_telegram_id(&self, telegram_id: i64) -> StoreResult<Option<UserRecord>> {
        self.db
            .execute(move |conn| {
                match conn.query_row(
                    &format!("{SELECT_USER} WHERE telegram_id = ?1"),
                    [telegram_id],
                    UserRecord::from_row,
                ) {
                    Ok(user) => Ok(Some(user)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Return the user with `telegram_id`, creating it with role `user` if
    /// needed. A changed display name is written back.
    #[instrument(skip(self))]
    pub async fn find_or_create(&self, telegram_id: i64, name: &str) -> StoreResult<UserRecord> {
        let name = name.to_string();
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO users (telegram_id, name, role, created_at, updated_at) \
                     VALUES (?1, ?2, 'user', ?3, ?3) \
                     ON CONFLICT(telegram_id) DO UPDATE SET name = excluded.name, \
                     updated_at = excluded.updated_at WHERE users.name <> excluded.name",
                    rusqlite::params![telegram_id, name, now],
                )?;
                Ok(conn.query_row(
                    &format!("{SELECT_USER} WHERE telegram_id = ?1"),
                    [telegram_id],
                    UserRecord::from_row,
                )?)
            })
            .await
    }

    #[instrument(skip(self))]
    pub async fn set_role(&self, telegram_id: i64, role: UserRole) -> StoreResult<UserRecord> {
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE users SET role = ?2, updated_at = ?3 WHERE telegram_id = ?1",
                    rusqlite::params![telegram_id, role.as_str(), now],
                )?;
                if updated == 0 {
                    return Err(StoreError::not_found("user", telegram_id));
                }
                debug!(telegram_id, role = %role, "role updated");
                Ok(conn.query_row(
                    &format!("{SELECT_USER} WHERE telegram_id = ?1"),
                    [telegram_id],
                    UserRecord::from_row,
                )?)
            })
            .await
    }

    /// All users, oldest first.
    pub async fn list(&self) -> StoreResult<Vec<UserRecord>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!("{SELECT_USER} ORDER BY id"))?;
                let users = stmt
                    .query_map([], UserRecord::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await
    }

    /// Users with role developer or admin. These are the operator recipients.
    #[instrument(skip(self))]
    pub async fn list_developers(&self) -> StoreResult<Vec<UserRecord>> {
        self.db
            .execute(|conn| {
                let mut stmt = conn.prepare(&format!(
                    "{SELECT_USER} WHERE role IN ('developer', 'admin') ORDER BY id"
                ))?;
                let users = stmt
                    .query_map([], UserRecord::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(users)
            })
            .await
    }
}

// ── tests ────────────────────────────────────────────────────────────
