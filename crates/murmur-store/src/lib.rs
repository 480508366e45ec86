//! # murmur-store
//!
//! Persistence boundary for the murmur bot.
//!
//! Everything the reply core needs to survive a restart lives here: chats and
//! their instruction overrides, users and their roles, and the message log
//! (with attachment blobs and quoted context) that conversations are replayed
//! from.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │  ChatStore · UserStore · MessageStore        │
//! │  BotState (polling offset)                   │
//! ├──────────────────────────────────────────────┤
//! │  Database (rusqlite WAL, spawn_blocking)     │
//! │  Migrations (versioned, transactional)       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```ignore
//! use murmur_store::{ChatStore, Database, MessageStore};
//!
//! let db = Database::open_and_migrate("data/murmur.db").await?;
//! let chat = ChatStore::new(db.clone()).find_or_create(-100123).await?;
//! let history = MessageStore::new(db).history(chat.id).await?;
//! ```

pub mod bot_state;
pub mod chat_store;
pub mod db;
pub mod error;
pub mod message_store;
pub mod migration;
pub mod user_store;

// ── re-exports ───────────────────────────────────────────────────────

pub use bot_state::BotState;
pub use chat_store::{ChatRecord, ChatStore};
pub use db::Database;
pub use error::{StoreError, StoreResult};
pub use message_store::{
    MessageAuthor, MessageStore, NewAttachment, NewMessage, NewQuote, Quote, StoredAttachment,
    StoredMessage,
};
pub use user_store::{UserRecord, UserRole, UserStore};
