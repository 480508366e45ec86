//! The message log.
//!
//! Every completed turn is written here as two rows: the user's message (with
//! any attachment blobs and quoted context) and the model's reply (no author).
//! Reading a chat's rows back in `(created_at, id)` order yields exactly the
//! turn sequence the generative backend saw, which is how conversations are
//! rebuilt after a restart or a cache eviction.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use crate::db::Database;
use crate::error::{StoreError, StoreResult};

// ═══════════════════════════════════════════════════════════════════════
//  Types
// ═══════════════════════════════════════════════════════════════════════

/// Binary attachment to be stored with a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// Quoted context captured from a reply.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewQuote {
    pub content: String,
    /// Internal user id of the quoted author, when the quoted message was
    /// written by a known user.
    pub user_id: Option<i64>,
}

/// A message about to be persisted.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    /// Internal user id; `None` marks a model-authored message.
    pub user_id: Option<i64>,
    pub telegram_id: Option<i64>,
    pub content: String,
    pub attachments: Vec<NewAttachment>,
    pub quote: Option<NewQuote>,
    pub created_at: DateTime<Utc>,
}

impl NewMessage {
    /// A model-authored message stamped with the current time.
    pub fn new(chat_id: i64, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            user_id: None,
            telegram_id: None,
            content: content.into(),
            attachments: Vec::new(),
            quote: None,
            created_at: Utc::now(),
        }
    }

    pub fn authored_by(mut self, user_id: i64) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_telegram_id(mut self, telegram_id: i64) -> Self {
        self.telegram_id = Some(telegram_id);
        self
    }

    pub fn with_attachments(mut self, attachments: Vec<NewAttachment>) -> Self {
        self.attachments = attachments;
        self
    }

    pub fn with_quote(mut self, quote: Option<NewQuote>) -> Self {
        self.quote = quote;
        self
    }

    pub fn at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }
}

/// Author of a stored message or quote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageAuthor {
    pub user_id: i64,
    pub telegram_id: i64,
    pub name: String,
}

/// Quoted context of a stored message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub content: String,
    pub author: Option<MessageAuthor>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredAttachment {
    pub mime_type: String,
    pub data: Vec<u8>,
}

/// A message read back from the log with its relations resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: i64,
    pub chat_id: i64,
    pub telegram_id: Option<i64>,
    /// `None` for model-authored messages.
    pub author: Option<MessageAuthor>,
    pub content: String,
    pub attachments: Vec<StoredAttachment>,
    pub quote: Option<Quote>,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn is_from_model(&self) -> bool {
        self.author.is_none()
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  MessageStore
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
pub struct MessageStore {
    db: Database,
}

impl MessageStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Persist a single message and its attachments. Returns the row id.
    #[instrument(skip(self, message), fields(chat_id = message.chat_id))]
    pub async fn save(&self, message: NewMessage) -> StoreResult<i64> {
        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let id = insert(&tx, &message)?;
                tx.commit()?;
                Ok(id)
            })
            .await
    }

    /// Persist a user message and the model reply to it atomically.
    ///
    /// The reply is stamped no earlier than the user message so replay order
    /// never inverts the pair.
    #[instrument(skip(self, user, model), fields(chat_id = user.chat_id))]
    pub async fn save_turn(&self, user: NewMessage, mut model: NewMessage) -> StoreResult<(i64, i64)> {
        if user.chat_id != model.chat_id {
            return Err(StoreError::InvalidArgument(format!(
                "turn spans two chats: {} and {}",
                user.chat_id, model.chat_id
            )));
        }
        if model.created_at < user.created_at {
            model.created_at = user.created_at;
        }

        self.db
            .execute_mut(move |conn| {
                let tx = conn.transaction()?;
                let user_id = insert(&tx, &user)?;
                let model_id = insert(&tx, &model)?;
                tx.commit()?;
                debug!(user_id, model_id, "turn persisted");
                Ok((user_id, model_id))
            })
            .await
    }

    /// All messages of a chat in replay order, with authors, attachments and
    /// quotes resolved.
    #[instrument(skip(self))]
    pub async fn history(&self, chat_id: i64) -> StoreResult<Vec<StoredMessage>> {
        self.db.execute(move |conn| load_history(conn, chat_id)).await
    }

    /// Creation time of the chat's newest message, if it has any.
    pub async fn latest_timestamp(&self, chat_id: i64) -> StoreResult<Option<DateTime<Utc>>> {
        self.db
            .execute(move |conn| {
                let latest: Option<i64> = conn.query_row(
                    "SELECT max(created_at) FROM messages WHERE chat_id = ?1",
                    [chat_id],
                    |row| row.get(0),
                )?;
                Ok(latest.and_then(DateTime::<Utc>::from_timestamp_millis))
            })
            .await
    }

    /// Delete one message (and its attachments). Returns whether it existed.
    #[instrument(skip(self))]
    pub async fn remove(&self, id: i64) -> StoreResult<bool> {
        self.db
            .execute(move |conn| Ok(conn.execute("DELETE FROM messages WHERE id = ?1", [id])? > 0))
            .await
    }

    /// Delete every message of a chat. Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn clear_chat(&self, chat_id: i64) -> StoreResult<usize> {
        self.db
            .execute(move |conn| {
                let removed = conn.execute("DELETE FROM messages WHERE chat_id = ?1", [chat_id])?;
                debug!(chat_id, removed, "chat history cleared");
                Ok(removed)
            })
            .await
    }

    pub async fn count(&self) -> StoreResult<i64> {
        self.db
            .execute(|conn| Ok(conn.query_row("SELECT count(*) FROM messages", [], |row| row.get(0))?))
            .await
    }
}

// ── internals ────────────────────────────────────────────────────────

fn insert(tx: &Transaction<'_>, message: &NewMessage) -> StoreResult<i64> {
    let (quote_content, quote_user_id) = match &message.quote {
        Some(q) => (Some(q.content.as_str()), q.user_id),
        None => (None, None),
    };
    tx.execute(
        "INSERT INTO messages \
         (chat_id, user_id, telegram_id, content, quote_content, quote_user_id, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        rusqlite::params![
            message.chat_id,
            message.user_id,
            message.telegram_id,
            message.content,
            quote_content,
            quote_user_id,
            message.created_at.timestamp_millis(),
        ],
    )?;
    let id = tx.last_insert_rowid();

    let mut stmt = tx.prepare_cached(
        "INSERT INTO attachments (message_id, position, mime_type, data) VALUES (?1, ?2, ?3, ?4)",
    )?;
    for (position, attachment) in message.attachments.iter().enumerate() {
        stmt.execute(rusqlite::params![
            id,
            position as i64,
            attachment.mime_type,
            attachment.data
        ])?;
    }
    Ok(id)
}

fn load_history(conn: &Connection, chat_id: i64) -> StoreResult<Vec<StoredMessage>> {
    let mut attachments = load_attachments(conn, chat_id)?;

    let mut stmt = conn.prepare(
        "SELECT m.id, m.chat_id, m.telegram_id, m.content, m.created_at, \
                a.id, a.telegram_id, a.name, \
                m.quote_content, q.id, q.telegram_id, q.name \
         FROM messages m \
         LEFT JOIN users a ON a.id = m.user_id \
         LEFT JOIN users q ON q.id = m.quote_user_id \
         WHERE m.chat_id = ?1 \
         ORDER BY m.created_at ASC, m.id ASC",
    )?;

    let rows = stmt.query_map([chat_id], |row| {
        let created_ms: i64 = row.get(4)?;
        let created_at = DateTime::<Utc>::from_timestamp_millis(created_ms).ok_or_else(|| {
            rusqlite::Error::IntegralValueOutOfRange(4, created_ms)
        })?;
        let quote = row.get::<_, Option<String>>(8)?.map(|content| Quote {
            content,
            author: None,
        });
        Ok((
            StoredMessage {
                id: row.get(0)?,
                chat_id: row.get(1)?,
                telegram_id: row.get(2)?,
                author: author_at(row, 5)?,
                content: row.get(3)?,
                attachments: Vec::new(),
                quote,
                created_at,
            },
            author_at(row, 9)?,
        ))
    })?;

    let mut messages = Vec::new();
    for row in rows {
        let (mut message, quote_author) = row?;
        if let Some(quote) = message.quote.as_mut() {
            quote.author = quote_author;
        }
        message.attachments = attachments.remove(&message.id).unwrap_or_default();
        messages.push(message);
    }
    Ok(messages)
}

fn author_at(row: &rusqlite::Row<'_>, start: usize) -> rusqlite::Result<Option<MessageAuthor>> {
    let Some(user_id) = row.get::<_, Option<i64>>(start)? else {
        return Ok(None);
    };
    Ok(Some(MessageAuthor {
        user_id,
        telegram_id: row.get(start + 1)?,
        name: row.get(start + 2)?,
    }))
}

fn load_attachments(
    conn: &Connection,
    chat_id: i64,
) -> StoreResult<HashMap<i64, Vec<StoredAttachment>>> {
    let mut stmt = conn.prepare(
        "SELECT a.message_id, a.mime_type, a.data FROM attachments a \
         JOIN messages m ON m.id = a.message_id \
         WHERE m.chat_id = ?1 ORDER BY a.message_id, a.position",
    )?;
    let mut grouped: HashMap<i64, Vec<StoredAttachment>> = HashMap::new();
    let rows = stmt.query_map([chat_id], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            StoredAttachment {
                mime_type: row.get(1)?,
                data: row.get(2)?,
            },
        ))
    })?;
    for row in rows {
        let (message_id, attachment) = row?;
        grouped.entry(message_id).or_default().push(attachment);
    }
    Ok(grouped)
}

// ── tests ────────────────────────────────────────────────────────────
