//! Chat records.
//!
//! A chat is identified externally by its Telegram id and carries an optional
//! free-text instruction override that replaces the default persona in the
//! system prompt.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

/// A persisted chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRecord {
    /// Internal row id, referenced by messages.
    pub id: i64,
    /// Telegram chat id (negative for groups).
    pub telegram_id: i64,
    /// Instruction override; empty means "use the default persona".
    pub system_instructions: String,
    /// Unix timestamp (seconds).
    pub created_at: i64,
}

impl ChatRecord {
    /// The override, if one is set.
    pub fn instructions(&self) -> Option<&str> {
        let trimmed = self.system_instructions.trim();
        (!trimmed.is_empty()).then_some(trimmed)
    }

    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            telegram_id: row.get(1)?,
            system_instructions: row.get(2)?,
            created_at: row.get(3)?,
        })
    }
}

const SELECT_CHAT: &str = "SELECT id, telegram_id, system_instructions, created_at FROM chats";

/// Repository for [`ChatRecord`]s.
#[derive(Clone)]
pub struct ChatStore {
    db: Database,
}

impl ChatStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self))]
    pub async fn find_by_telegram_id(&self, telegram_id: i64) -> StoreResult<Option<ChatRecord>> {
        self.db
            .execute(move |conn| {
                match conn.query_row(
                    &format!("{SELECT_CHAT} WHERE telegram_id = ?1"),
                    [telegram_id],
                    ChatRecord::from_row,
                ) {
                    Ok(chat) => Ok(Some(chat)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    /// Return the chat with `telegram_id`, inserting an empty one first if
    /// it does not exist yet.
    #[instrument(skip(self))]
    pub async fn find_or_create(&self, telegram_id: i64) -> StoreResult<ChatRecord> {
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                let inserted = conn.execute(
                    "INSERT INTO chats (telegram_id, created_at) VALUES (?1, ?2) \
                     ON CONFLICT(telegram_id) DO NOTHING",
                    rusqlite::params![telegram_id, now],
                )?;
                if inserted > 0 {
                    debug!(telegram_id, "chat created");
                }
                Ok(conn.query_row(
                    &format!("{SELECT_CHAT} WHERE telegram_id = ?1"),
                    [telegram_id],
                    ChatRecord::from_row,
                )?)
            })
            .await
    }

    /// Replace the chat's instruction override. An empty string clears it.
    #[instrument(skip(self, instructions))]
    pub async fn set_system_instructions(
        &self,
        telegram_id: i64,
        instructions: &str,
    ) -> StoreResult<ChatRecord> {
        let instructions = instructions.trim().to_string();
        self.db
            .execute(move |conn| {
                let updated = conn.execute(
                    "UPDATE chats SET system_instructions = ?2 WHERE telegram_id = ?1",
                    rusqlite::params![telegram_id, instructions],
                )?;
                if updated == 0 {
                    return Err(StoreError::not_found("chat", telegram_id));
                }
                Ok(conn.query_row(
                    &format!("{SELECT_CHAT} WHERE telegram_id = ?1"),
                    [telegram_id],
                    ChatRecord::from_row,
                )?)
            })
            .await
    }

    /// Number of known chats.
    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| Ok(conn.query_row("SELECT count(*) FROM chats", [], |row| row.get(0))?))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn store() -> ChatStore {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        ChatStore::new(db)
    }

    #[tokio::test]
    async fn find_or_create_is_stable() {
        let store = store().await;
        let first = store.find_or_create(-1001).await.unwrap();
        let second = store.find_or_create(-1001).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(first.instructions(), None);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn missing_chat_is_none() {
        assert!(store().await.find_by_telegram_id(5).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn instructions_are_trimmed_and_clearable() {
        let store = store().await;
        store.find_or_create(7).await.unwrap();

        let chat = store.set_system_instructions(7, "  be brief  ").await.unwrap();
        assert_eq!(chat.instructions(), Some("be brief"));

        let chat = store.set_system_instructions(7, "").await.unwrap();
        assert_eq!(chat.instructions(), None);
    }

    #[tokio::test]
    async fn setting_instructions_on_unknown_chat_fails() {
        let err = store()
            .await
            .set_system_instructions(99, "x")
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { entity: "chat", .. }));
    }
}
