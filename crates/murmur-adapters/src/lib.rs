//! Telegram adapter for murmur.
//!
//! - [`telegram`] -- Bot API client implementing [`murmur_agent::ChatTransport`].
//! - [`update`] -- decoding of `getUpdates` payloads into inbound messages.
//! - [`media_group`] -- reassembly of albums delivered as several updates.

pub mod error;
pub mod media_group;
pub mod telegram;
pub mod update;

pub use error::{AdapterError, Result};
pub use media_group::MediaGroupCollector;
pub use telegram::{BotIdentity, TelegramAdapter};
pub use update::{Update, parse_update};
