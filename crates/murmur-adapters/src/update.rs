//! Decoding of `getUpdates` results into [`InboundMessage`]s.
//!
//! Only the fields the bot uses are modelled; everything else in the Bot API
//! payload is ignored by serde.

use chrono::{DateTime, Utc};
use murmur_agent::{
    Attachment, ChatKind, InboundChat, InboundMessage, RepliedMessage, Sender,
};
use serde::Deserialize;

use crate::error::{AdapterError, Result};

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct Update {
    pub update_id: i64,
    #[serde(default)]
    message: Option<TgMessage>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgMessage {
    message_id: i64,
    date: i64,
    chat: TgChat,
    #[serde(default)]
    from: Option<TgUser>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    reply_to_message: Option<Box<TgMessage>>,
    #[serde(default)]
    quote: Option<TgTextQuote>,
    #[serde(default)]
    photo: Vec<TgFile>,
    #[serde(default)]
    document: Option<TgFile>,
    #[serde(default)]
    audio: Option<TgFile>,
    #[serde(default)]
    video: Option<TgFile>,
    #[serde(default)]
    voice: Option<TgFile>,
    #[serde(default)]
    animation: Option<TgFile>,
    #[serde(default)]
    sticker: Option<TgSticker>,
    #[serde(default)]
    media_group_id: Option<String>,
    #[serde(default)]
    forward_origin: Option<serde_json::Value>,
    #[serde(default)]
    forward_date: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgChat {
    id: i64,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct TgUser {
    pub(crate) id: i64,
    #[serde(default)]
    pub(crate) is_bot: bool,
    pub(crate) first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgTextQuote {
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TgFile {
    file_id: String,
    #[serde(default)]
    mime_type: Option<String>,
    #[serde(default)]
    file_name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct TgSticker {
    file_id: String,
    #[serde(default)]
    is_animated: bool,
    #[serde(default)]
    is_video: bool,
}

// ---------------------------------------------------------------------------
// Conversion
// ---------------------------------------------------------------------------

fn sender(user: TgUser) -> Sender {
    Sender {
        id: user.id,
        first_name: user.first_name,
        last_name: user.last_name,
        username: user.username,
        is_bot: user.is_bot,
    }
}

fn chat_kind(kind: &str) -> ChatKind {
    match kind {
        "private" => ChatKind::Private,
        "group" => ChatKind::Group,
        "supergroup" => ChatKind::Supergroup,
        _ => ChatKind::Channel,
    }
}

impl TgMessage {
    fn text_or_caption(&self) -> Option<String> {
        self.text
            .clone()
            .or_else(|| self.caption.clone())
            .filter(|t| !t.is_empty())
    }

    fn attachments(&self) -> Vec<Attachment> {
        let mut attachments = Vec::new();
        // Telegram lists photo sizes smallest first.
        if let Some(largest) = self.photo.last() {
            attachments.push(Attachment::Photo {
                file_id: largest.file_id.clone(),
            });
        }
        if let Some(f) = &self.document {
            attachments.push(Attachment::Document {
                file_id: f.file_id.clone(),
                mime_type: f.mime_type.clone(),
                file_name: f.file_name.clone(),
            });
        }
        if let Some(f) = &self.audio {
            attachments.push(Attachment::Audio {
                file_id: f.file_id.clone(),
                mime_type: f.mime_type.clone(),
            });
        }
        if let Some(f) = &self.video {
            attachments.push(Attachment::Video {
                file_id: f.file_id.clone(),
                mime_type: f.mime_type.clone(),
            });
        }
        if let Some(f) = &self.voice {
            attachments.push(Attachment::Voice {
                file_id: f.file_id.clone(),
                mime_type: f.mime_type.clone(),
            });
        }
        if let Some(f) = &self.animation {
            attachments.push(Attachment::Animation {
                file_id: f.file_id.clone(),
                mime_type: f.mime_type.clone(),
            });
        }
        if let Some(s) = &self.sticker {
            attachments.push(Attachment::Sticker {
                file_id: s.file_id.clone(),
                is_animated: s.is_animated,
                is_video: s.is_video,
            });
        }
        attachments
    }
}

fn timestamp(secs: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
}

impl Update {
    /// The new message carried by this update, if it is one the bot can act
    /// on. Edits, channel posts and messages without a sender yield `None`.
    pub fn into_message(self) -> Option<InboundMessage> {
        let message = self.message?;
        let from = message.from.clone()?;

        // A partial quote takes precedence over the whole replied-to text.
        let quoted = message.quote.as_ref().map(|q| q.text.clone());
        let reply_to = message.reply_to_message.as_deref().map(|replied| RepliedMessage {
            message_id: replied.message_id,
            from: replied.from.clone().map(sender),
            text: quoted.clone().or_else(|| replied.text_or_caption()),
        });

        Some(InboundMessage {
            message_id: message.message_id,
            date: timestamp(message.date),
            chat: InboundChat {
                id: message.chat.id,
                kind: chat_kind(&message.chat.kind),
                title: message.chat.title.clone(),
            },
            from: sender(from),
            text: message.text_or_caption(),
            reply_to,
            attachments: message.attachments(),
            media_group_id: message.media_group_id.clone(),
            forwarded: message.forward_origin.is_some() || message.forward_date.is_some(),
        })
    }
}

/// Decode one element of a `getUpdates` result.
pub fn parse_update(value: &serde_json::Value) -> Result<Update> {
    Update::deserialize(value).map_err(|e| AdapterError::parse("getUpdates", e.to_string()))
}
