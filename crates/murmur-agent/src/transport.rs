//! Chat transport boundary.
//!
//! The orchestrator talks to the chat platform only through [`ChatTransport`]
//! and consumes inbound events as [`InboundMessage`]. The Telegram adapter
//! lives in `murmur-adapters`; tests use in-process fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;

// ---------------------------------------------------------------------------
// Outbound
// ---------------------------------------------------------------------------

/// Rich-text mode for an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    Html,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SendOptions {
    pub parse_mode: Option<ParseMode>,
    pub reply_to: Option<i64>,
}

impl SendOptions {
    pub fn html() -> Self {
        Self {
            parse_mode: Some(ParseMode::Html),
            reply_to: None,
        }
    }

    pub fn plain() -> Self {
        Self::default()
    }

    pub fn replying_to(mut self, message_id: Option<i64>) -> Self {
        self.reply_to = message_id;
        self
    }
}

/// A chat administrator, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMember {
    pub user_id: i64,
    pub name: String,
}

/// Operations the reply core needs from the chat platform.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    /// Send a text message; returns the platform message id.
    async fn send_text(&self, chat_id: i64, text: &str, options: &SendOptions) -> Result<i64>;

    /// Show the "typing…" indicator once. The platform expires it after a
    /// few seconds.
    async fn send_typing(&self, chat_id: i64) -> Result<()>;

    /// Resolve a file id to a downloadable URL.
    async fn file_url(&self, file_id: &str) -> Result<String>;

    async fn download(&self, url: &str) -> Result<Vec<u8>>;

    async fn chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatMember>>;

    async fn chat_member_count(&self, chat_id: i64) -> Result<u32>;
}

// ---------------------------------------------------------------------------
// Inbound
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatKind {
    Private,
    Group,
    Supergroup,
    Channel,
}

impl ChatKind {
    pub fn is_private(self) -> bool {
        self == Self::Private
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundChat {
    pub id: i64,
    pub kind: ChatKind,
    pub title: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sender {
    pub id: i64,
    pub first_name: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
    pub is_bot: bool,
}

impl Sender {
    /// First and last name joined, as shown in the chat.
    pub fn display_name(&self) -> String {
        match self.last_name.as_deref().filter(|s| !s.is_empty()) {
            Some(last) => format!("{} {last}", self.first_name),
            None => self.first_name.clone(),
        }
    }
}

/// The message an inbound message replies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepliedMessage {
    pub message_id: i64,
    pub from: Option<Sender>,
    pub text: Option<String>,
}

/// Media attached to an inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attachment {
    Photo {
        file_id: String,
    },
    Document {
        file_id: String,
        mime_type: Option<String>,
        file_name: Option<String>,
    },
    Audio {
        file_id: String,
        mime_type: Option<String>,
    },
    Video {
        file_id: String,
        mime_type: Option<String>,
    },
    Voice {
        file_id: String,
        mime_type: Option<String>,
    },
    Sticker {
        file_id: String,
        is_animated: bool,
        is_video: bool,
    },
    Animation {
        file_id: String,
        mime_type: Option<String>,
    },
}

/// Uniform projection of an [`Attachment`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachmentSource<'a> {
    pub file_id: &'a str,
    pub mime_hint: String,
}

impl Attachment {
    pub fn source(&self) -> AttachmentSource<'_> {
        let (file_id, mime_hint) = match self {
            Self::Photo { file_id } => (file_id, "image/jpeg".to_owned()),
            Self::Document {
                file_id, mime_type, ..
            } => (file_id, or_default(mime_type, "application/octet-stream")),
            Self::Audio { file_id, mime_type } => (file_id, or_default(mime_type, "audio/mpeg")),
            Self::Video { file_id, mime_type } | Self::Animation { file_id, mime_type } => {
                (file_id, or_default(mime_type, "video/mp4"))
            }
            Self::Voice { file_id, mime_type } => (file_id, or_default(mime_type, "audio/ogg")),
            Self::Sticker {
                file_id,
                is_animated,
                is_video,
            } => {
                let mime = if *is_video {
                    "video/webm"
                } else if *is_animated {
                    "application/x-tgsticker"
                } else {
                    "image/webp"
                };
                (file_id, mime.to_owned())
            }
        };
        AttachmentSource {
            file_id: file_id.as_str(),
            mime_hint,
        }
    }
}

fn or_default(mime: &Option<String>, fallback: &str) -> String {
    mime.as_deref()
        .filter(|m| !m.is_empty())
        .unwrap_or(fallback)
        .to_owned()
}

/// A normalized inbound chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub message_id: i64,
    pub date: DateTime<Utc>,
    pub chat: InboundChat,
    pub from: Sender,
    /// Text or caption.
    pub text: Option<String>,
    pub reply_to: Option<RepliedMessage>,
    pub attachments: Vec<Attachment>,
    pub media_group_id: Option<String>,
    pub forwarded: bool,
}

impl InboundMessage {
    pub fn text(&self) -> &str {
        self.text.as_deref().unwrap_or_default()
    }

    pub fn is_private(&self) -> bool {
        self.chat.kind.is_private()
    }

    /// Fold a sibling of the same media group into this message: its
    /// attachments are appended and its caption is used if this one has none.
    pub fn absorb(&mut self, sibling: InboundMessage) {
        self.attachments.extend(sibling.attachments);
        if self.text().is_empty() {
            self.text = sibling.text;
        }
        if self.reply_to.is_none() {
            self.reply_to = sibling.reply_to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(text: Option<&str>, attachments: Vec<Attachment>) -> InboundMessage {
        InboundMessage {
            message_id: 1,
            date: Utc::now(),
            chat: InboundChat {
                id: 10,
                kind: ChatKind::Private,
                title: None,
            },
            from: Sender {
                id: 7,
                first_name: "Ann".into(),
                last_name: None,
                username: None,
                is_bot: false,
            },
            text: text.map(str::to_owned),
            reply_to: None,
            attachments,
            media_group_id: Some("g".into()),
            forwarded: false,
        }
    }

    #[test]
    fn attachment_mime_hints() {
        let photo = Attachment::Photo { file_id: "p".into() };
        assert_eq!(photo.source().mime_hint, "image/jpeg");
        assert_eq!(photo.source().file_id, "p");

        let voice = Attachment::Voice {
            file_id: "v".into(),
            mime_type: None,
        };
        assert_eq!(voice.source().mime_hint, "audio/ogg");

        let doc = Attachment::Document {
            file_id: "d".into(),
            mime_type: Some("application/pdf".into()),
            file_name: None,
        };
        assert_eq!(doc.source().mime_hint, "application/pdf");

        let sticker = Attachment::Sticker {
            file_id: "s".into(),
            is_animated: false,
            is_video: false,
        };
        assert_eq!(sticker.source().mime_hint, "image/webp");
    }

    #[test]
    fn display_name_joins_last_name() {
        let mut sender = message(None, vec![]).from;
        assert_eq!(sender.display_name(), "Ann");
        sender.last_name = Some("Lee".into());
        assert_eq!(sender.display_name(), "Ann Lee");
    }

    #[test]
    fn absorb_merges_media_group_siblings() {
        let mut first = message(None, vec![Attachment::Photo { file_id: "a".into() }]);
        let second = message(
            Some("look"),
            vec![Attachment::Photo { file_id: "b".into() }],
        );
        first.absorb(second);
        assert_eq!(first.attachments.len(), 2);
        assert_eq!(first.text(), "look");
    }
}
