//! Conversation entries and their mapping to backend contents.
//!
//! A session keeps its history as [`HistoryEntry`] values rather than raw
//! backend contents, so user turns can be re-rendered with whatever
//! authenticity token is current when the request goes out.

use chrono::{DateTime, Utc};
use murmur_store::{NewAttachment, StoredMessage};

use crate::llm::{Content, Part};
use crate::prompt::{message_prefix, quote_markup};

/// Inline mime types the backend accepts. Anything else is persisted but
/// left out of requests.
const INLINE_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/webp",
    "image/heic",
    "image/heif",
    "audio/wav",
    "audio/mp3",
    "audio/mpeg",
    "audio/aiff",
    "audio/aac",
    "audio/ogg",
    "audio/flac",
    "application/pdf",
];

pub fn is_inline_mime(mime: &str) -> bool {
    let base = mime.split(';').next().unwrap_or_default().trim();
    INLINE_MIME_TYPES
        .iter()
        .any(|supported| supported.eq_ignore_ascii_case(base))
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Media {
    pub mime_type: String,
    pub data: Vec<u8>,
}

impl From<&Media> for NewAttachment {
    fn from(media: &Media) -> Self {
        NewAttachment {
            mime_type: media.mime_type.clone(),
            data: media.data.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QuotedText {
    pub text: String,
    pub author_name: Option<String>,
}

/// One user message as the model sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserTurn {
    pub author_name: String,
    pub sent_at: DateTime<Utc>,
    pub text: String,
    pub media: Vec<Media>,
    pub quote: Option<QuotedText>,
}

impl UserTurn {
    /// Request parts: prefix, inline media, quote markup, text.
    pub fn parts(&self, token: &str) -> Vec<Part> {
        let mut parts = vec![Part::text(message_prefix(
            token,
            self.sent_at,
            &self.author_name,
        ))];
        parts.extend(
            self.media
                .iter()
                .filter(|m| is_inline_mime(&m.mime_type))
                .map(|m| Part::inline(m.mime_type.as_str(), &m.data)),
        );
        if let Some(quote) = &self.quote {
            parts.push(Part::text(quote_markup(
                token,
                &quote.text,
                quote.author_name.as_deref(),
            )));
        }
        if !self.text.is_empty() {
            parts.push(Part::text(self.text.as_str()));
        }
        parts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HistoryEntry {
    User(UserTurn),
    Model(String),
}

impl HistoryEntry {
    pub fn to_content(&self, token: &str) -> Content {
        match self {
            Self::User(turn) => Content::user(turn.parts(token)),
            Self::Model(text) => Content::model(text.as_str()),
        }
    }
}

impl From<&StoredMessage> for HistoryEntry {
    fn from(message: &StoredMessage) -> Self {
        let Some(author) = &message.author else {
            return Self::Model(message.content.clone());
        };
        Self::User(UserTurn {
            author_name: author.name.clone(),
            sent_at: message.created_at,
            text: message.content.clone(),
            media: message
                .attachments
                .iter()
                .map(|a| Media {
                    mime_type: a.mime_type.clone(),
                    data: a.data.clone(),
                })
                .collect(),
            quote: message.quote.as_ref().map(|q| QuotedText {
                text: q.content.clone(),
                author_name: q.author.as_ref().map(|a| a.name.clone()),
            }),
        })
    }
}

/// Persisted messages, oldest first, as session history.
pub fn replay(messages: &[StoredMessage]) -> Vec<HistoryEntry> {
    messages.iter().map(HistoryEntry::from).collect()
}
