//! Small key/value table for state the gateway must keep across restarts.
//!
//! Today that is only the Telegram `getUpdates` offset; without it a restart
//! would replay every update Telegram still holds.

use chrono::Utc;
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::StoreResult;

const POLLING_OFFSET: &str = "telegram.polling_offset";

/// Persistent bot-level state.
#[derive(Clone)]
pub struct BotState {
    db: Database,
}

impl BotState {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// The next `getUpdates` offset, if one was saved.
    pub async fn polling_offset(&self) -> StoreResult<Option<i64>> {
        Ok(self.get(POLLING_OFFSET).await?.and_then(|v| v.parse().ok()))
    }

    pub async fn set_polling_offset(&self, offset: i64) -> StoreResult<()> {
        self.set(POLLING_OFFSET, offset.to_string()).await
    }

    #[instrument(skip(self))]
    async fn get(&self, key: &'static str) -> StoreResult<Option<String>> {
        self.db
            .execute(move |conn| {
                match conn.query_row(
                    "SELECT value FROM bot_state WHERE key = ?1",
                    [key],
                    |row| row.get(0),
                ) {
                    Ok(value) => Ok(Some(value)),
                    Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
                    Err(e) => Err(e.into()),
                }
            })
            .await
    }

    #[instrument(skip(self, value))]
    async fn set(&self, key: &'static str, value: String) -> StoreResult<()> {
        let now = Utc::now().timestamp();
        self.db
            .execute(move |conn| {
                conn.execute(
                    "INSERT INTO bot_state (key, value, updated_at) VALUES (?1, ?2, ?3) \
                     ON CONFLICT(key) DO UPDATE SET value = excluded.value, \
                     updated_at = excluded.updated_at",
                    rusqlite::params![key, value, now],
                )?;
                debug!(key, "bot state saved");
                Ok(())
            })
            .await
    }
}
