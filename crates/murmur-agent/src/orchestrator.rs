//! The reply orchestrator: one inbound message in, one persisted turn out.
//!
//! A turn walks through [`TurnStage`]s in order:
//!
//! ```text
//! Idle → KeyAcquired → HistoryLoaded → SessionReady → Streaming → Draining → Persisted
//!   └──────────────┴──────────────┴──────────────┴───────────┴──────────┴──→ Failed
//! ```
//!
//! Turns for the same chat are serialized by a per-chat lock held for the
//! whole turn. Streaming and draining run under a hard timeout. On failure
//! the chat's cached session is dropped, operators are notified and the user
//! gets a short apology; nothing from the failed turn is persisted.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use murmur_store::{
    ChatRecord, ChatStore, Database, MessageStore, NewAttachment, NewMessage, NewQuote,
    UserRecord, UserStore,
};
use tokio::sync::Mutex;
use tracing::{debug, error, info, instrument, warn};

use crate::builder::{DEFAULT_SEPARATOR, MessageBuilder};
use crate::conversation::{ChatLocks, ConversationStore, SessionHandle};
use crate::credentials::{CredentialPool, KeyLease};
use crate::error::{AgentError, Result};
use crate::history::{Media, QuotedText, UserTurn, replay};
use crate::llm::{GenerativeBackend, SafetySetting};
use crate::notify::OperatorNotifier;
use crate::pacing::{Pacer, TypingIndicator};
use crate::prompt::{ChatContext, Persona, SystemPrompt, new_token};
use crate::render::{MarkdownRenderer, chunk};
use crate::session::ChatSession;
use crate::transport::{ChatTransport, InboundMessage, SendOptions};

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub separator: String,
    /// Platform limit on one message, in characters.
    pub max_message_len: usize,
    /// Cap on streaming plus delivery of one turn.
    pub turn_timeout: Duration,
    /// Attempts per plain-text send before the turn fails.
    pub send_attempts: u32,
    pub typing_interval: Duration,
    /// Sent to the user when a turn fails.
    pub apology: String,
    pub safety: Vec<SafetySetting>,
    /// Operator ids notified in addition to developers in the user table.
    pub operators: Vec<i64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            separator: DEFAULT_SEPARATOR.to_owned(),
            max_message_len: 4096,
            turn_timeout: Duration::from_secs(180),
            send_attempts: 3,
            typing_interval: Duration::from_secs(2),
            apology: "Sorry, something went wrong. Please try again later.".to_owned(),
            safety: SafetySetting::permissive(),
            operators: Vec::new(),
        }
    }
}

/// Shared services a [`ReplyOrchestrator`] is built from.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn ChatTransport>,
    pub backend: Arc<dyn GenerativeBackend>,
    pub credentials: Arc<CredentialPool>,
    pub conversations: ConversationStore,
    pub database: Database,
}

// ---------------------------------------------------------------------------
// Turn state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TurnStage {
    Idle,
    KeyAcquired,
    HistoryLoaded,
    SessionReady,
    Streaming,
    Draining,
    Persisted,
    Failed,
}

impl std::fmt::Display for TurnStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::KeyAcquired => "key-acquired",
            Self::HistoryLoaded => "history-loaded",
            Self::SessionReady => "session-ready",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Persisted => "persisted",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum TurnOutcome {
    Persisted {
        user_message_id: i64,
        model_message_id: i64,
        /// Physical messages sent to the chat.
        sent: usize,
    },
    /// The chat or sender is unknown; nothing was done.
    Dropped,
    Failed {
        /// Last stage reached before the failure.
        stage: TurnStage,
        error: AgentError,
    },
}

impl TurnOutcome {
    pub fn is_persisted(&self) -> bool {
        matches!(self, Self::Persisted { .. })
    }
}

/// Progress of one turn, logged on every transition.
struct Turn<'a> {
    inbound: &'a InboundMessage,
    stage: TurnStage,
    /// Whether a message of this turn has reached the chat yet.
    replied: bool,
    sent: usize,
}

impl<'a> Turn<'a> {
    fn new(inbound: &'a InboundMessage) -> Self {
        Self {
            inbound,
            stage: TurnStage::Idle,
            replied: false,
            sent: 0,
        }
    }

    fn advance(&mut self, stage: TurnStage) {
        debug!(chat_id = self.inbound.chat.id, from = %self.stage, to = %stage, "turn stage");
        self.stage = stage;
    }

    fn chat_id(&self) -> i64 {
        self.inbound.chat.id
    }

    /// Reply target for the next physical message: the trigger, for the
    /// first message of a group turn only.
    fn reply_target(&self) -> Option<i64> {
        (!self.inbound.is_private() && !self.replied).then_some(self.inbound.message_id)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ReplyOrchestrator {
    transport: Arc<dyn ChatTransport>,
    backend: Arc<dyn GenerativeBackend>,
    credentials: Arc<CredentialPool>,
    conversations: ConversationStore,
    locks: ChatLocks,
    chats: ChatStore,
    users: UserStore,
    messages: MessageStore,
    notifier: OperatorNotifier,
    typing: TypingIndicator,
    renderer: MarkdownRenderer,
    persona: Persona,
    pacer: Pacer,
    config: OrchestratorConfig,
}

impl ReplyOrchestrator {
    pub fn new(
        collab: Collaborators,
        persona: Persona,
        pacer: Pacer,
        config: OrchestratorConfig,
    ) -> Self {
        let users = UserStore::new(collab.database.clone());
        Self {
            notifier: OperatorNotifier::new(
                users.clone(),
                Arc::clone(&collab.transport),
                config.operators.clone(),
            ),
            typing: TypingIndicator::new(Arc::clone(&collab.transport), config.typing_interval),
            transport: collab.transport,
            backend: collab.backend,
            credentials: collab.credentials,
            conversations: collab.conversations,
            locks: ChatLocks::new(),
            chats: ChatStore::new(collab.database.clone()),
            users,
            messages: MessageStore::new(collab.database),
            renderer: MarkdownRenderer::default(),
            persona,
            pacer,
            config,
        }
    }

    pub fn with_renderer(mut self, renderer: MarkdownRenderer) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn persona(&self) -> &Persona {
        &self.persona
    }

    pub fn conversations(&self) -> &ConversationStore {
        &self.conversations
    }

    /// Run one full turn for `inbound`.
    #[instrument(skip(self, inbound), fields(chat_id = inbound.chat.id, message_id = inbound.message_id))]
    pub async fn handle(&self, inbound: &InboundMessage) -> TurnOutcome {
        let _chat_guard = self.locks.acquire(inbound.chat.id).await;
        let mut turn = Turn::new(inbound);

        match self.run(&mut turn).await {
            Ok(outcome) => {
                if let TurnOutcome::Persisted { sent, .. } = &outcome {
                    info!(sent, "turn persisted");
                }
                outcome
            }
            Err(error) => self.fail(&turn, error).await,
        }
    }

    /// Delete the chat's persisted conversation and drop its session.
    /// Returns the number of messages removed.
    pub async fn reset_chat(&self, telegram_chat_id: i64) -> Result<usize> {
        let _chat_guard = self.locks.acquire(telegram_chat_id).await;
        let removed = match self.chats.find_by_telegram_id(telegram_chat_id).await? {
            Some(chat) => self.messages.clear_chat(chat.id).await?,
            None => 0,
        };
        self.conversations.invalidate(telegram_chat_id).await;
        info!(chat_id = telegram_chat_id, removed, "conversation reset");
        Ok(removed)
    }

    /// Replace the chat's instruction override. An empty text restores the
    /// default persona.
    pub async fn update_instructions(
        &self,
        telegram_chat_id: i64,
        instructions: &str,
    ) -> Result<ChatRecord> {
        let _chat_guard = self.locks.acquire(telegram_chat_id).await;
        self.chats.find_or_create(telegram_chat_id).await?;
        let chat = self
            .chats
            .set_system_instructions(telegram_chat_id, instructions)
            .await?;
        self.conversations.invalidate(telegram_chat_id).await;
        Ok(chat)
    }

    // -- turn ----------------------------------------------------------------

    async fn run(&self, turn: &mut Turn<'_>) -> Result<TurnOutcome> {
        let inbound = turn.inbound;

        let Some((chat, user)) = self.resolve(inbound).await? else {
            debug!("unknown chat or sender, dropping message");
            return Ok(TurnOutcome::Dropped);
        };

        let lease = self
            .credentials
            .acquire()
            .ok_or(AgentError::CapacityExhausted)?;
        turn.advance(TurnStage::KeyAcquired);

        let token = new_token();
        let (handle, fresh) = match self.conversations.get(inbound.chat.id).await {
            Some(handle) => (handle, false),
            None => {
                let stored = self.messages.history(chat.id).await?;
                debug!(messages = stored.len(), "replaying history");
                let session = ChatSession::start(replay(&stored), self.config.safety.clone());
                (Arc::new(Mutex::new(session)) as SessionHandle, true)
            }
        };
        turn.advance(TurnStage::HistoryLoaded);

        let context = self.chat_context(inbound).await;
        let prompt = SystemPrompt {
            persona: &self.persona,
            instructions: chat.instructions(),
            context: &context,
            token: &token,
            separator: &self.config.separator,
            max_message_len: self.config.max_message_len,
            now: Utc::now(),
        }
        .render();

        let mut session = handle.lock().await;
        session.set_system_instruction(prompt);
        turn.advance(TurnStage::SessionReady);

        let media = self.download_media(inbound).await?;
        let (quote, stored_quote) = self.capture_quote(inbound).await?;
        let sent_at = self.turn_timestamp(chat.id, inbound.date).await?;
        let user_turn = UserTurn {
            author_name: user.name.clone(),
            sent_at,
            text: inbound.text().to_owned(),
            media,
            quote,
        };
        let attachments: Vec<NewAttachment> = user_turn.media.iter().map(Into::into).collect();

        self.credentials.wait_and_reserve(&lease).await?;

        let timeout = self.config.turn_timeout;
        let reply = tokio::time::timeout(
            timeout,
            self.stream_reply(turn, &mut session, &lease, user_turn, &token),
        )
        .await
        .map_err(|_| AgentError::Timeout {
            seconds: timeout.as_secs(),
        })??;
        drop(session);

        let user_message = NewMessage::new(chat.id, inbound.text())
            .at(sent_at)
            .authored_by(user.id)
            .with_telegram_id(inbound.message_id)
            .with_attachments(attachments)
            .with_quote(stored_quote);
        let model_message = NewMessage::new(chat.id, reply);
        let (user_message_id, model_message_id) = self
            .messages
            .save_turn(user_message, model_message)
            .await?;
        turn.advance(TurnStage::Persisted);

        if fresh {
            self.conversations.set(inbound.chat.id, handle).await;
        }

        Ok(TurnOutcome::Persisted {
            user_message_id,
            model_message_id,
            sent: turn.sent,
        })
    }

    async fn stream_reply(
        &self,
        turn: &mut Turn<'_>,
        session: &mut ChatSession,
        lease: &KeyLease,
        user_turn: UserTurn,
        token: &str,
    ) -> Result<String> {
        turn.advance(TurnStage::Streaming);
        let mut pending = session
            .send_message_stream(self.backend.as_ref(), lease.key().expose(), user_turn, token)
            .await?;

        let mut builder = MessageBuilder::new(self.config.separator.as_str());
        while let Some(fragment) = pending.next_chunk().await {
            for line in builder.append(&fragment?) {
                self.deliver(turn, &line).await?;
            }
        }

        turn.advance(TurnStage::Draining);
        let open = builder.take_open();
        self.deliver(turn, &open).await?;

        if builder.raw().trim().is_empty() {
            return Err(AgentError::stream("backend returned an empty reply"));
        }
        pending.finish()
    }

    // -- delivery ------------------------------------------------------------

    /// Send one logical message, split to the platform limit, with typing
    /// shown throughout. Blank lines are skipped.
    async fn deliver(&self, turn: &mut Turn<'_>, line: &str) -> Result<()> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(());
        }

        let mut typing = self.typing.begin(turn.chat_id());
        let result = self.deliver_chunks(turn, line).await;
        typing.stop().await;
        result
    }

    async fn deliver_chunks(&self, turn: &mut Turn<'_>, line: &str) -> Result<()> {
        for piece in chunk(line, self.config.max_message_len) {
            self.pacer.simulate_latency(piece.chars().count()).await;
            self.send_rendered(turn.chat_id(), &piece, turn.reply_target())
                .await?;
            turn.replied = true;
            turn.sent += 1;
        }
        Ok(())
    }

    /// Send `piece` as rich text, falling back to the raw text if the
    /// platform rejects the markup.
    async fn send_rendered(&self, chat_id: i64, piece: &str, reply_to: Option<i64>) -> Result<i64> {
        let html = self.renderer.render(piece);
        if !html.is_empty() {
            let options = SendOptions::html().replying_to(reply_to);
            match self.transport.send_text(chat_id, &html, &options).await {
                Ok(id) => return Ok(id),
                Err(e) => warn!(chat_id, error = %e, "rich text rejected, sending plain"),
            }
        }
        self.send_plain(chat_id, piece, reply_to).await
    }

    async fn send_plain(&self, chat_id: i64, text: &str, reply_to: Option<i64>) -> Result<i64> {
        let options = SendOptions::plain().replying_to(reply_to);
        let attempts = self.config.send_attempts.max(1);
        let mut attempt = 1;
        loop {
            match self.transport.send_text(chat_id, text, &options).await {
                Ok(id) => return Ok(id),
                Err(e) if attempt < attempts => {
                    warn!(chat_id, attempt, error = %e, "send failed, retrying");
                    tokio::time::sleep(Duration::from_millis(500 * u64::from(attempt))).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    // -- inputs --------------------------------------------------------------

    async fn resolve(&self, inbound: &InboundMessage) -> Result<Option<(ChatRecord, UserRecord)>> {
        let chat = self.chats.find_by_telegram_id(inbound.chat.id).await?;
        let user = self.users.find_by_telegram_id(inbound.from.id).await?;
        Ok(chat.zip(user))
    }

    /// Chat metadata for the system prompt. Lookup failures leave the
    /// corresponding detail out.
    async fn chat_context(&self, inbound: &InboundMessage) -> ChatContext {
        if inbound.is_private() {
            return ChatContext::Private {
                peer_name: inbound.from.first_name.clone(),
            };
        }
        let chat_id = inbound.chat.id;
        let member_count = match self.transport.chat_member_count(chat_id).await {
            Ok(count) => Some(count),
            Err(e) => {
                warn!(chat_id, error = %e, "member count unavailable");
                None
            }
        };
        let admins = self
            .transport
            .chat_administrators(chat_id)
            .await
            .unwrap_or_else(|e| {
                warn!(chat_id, error = %e, "administrator list unavailable");
                Vec::new()
            });
        ChatContext::Group {
            title: inbound.chat.title.clone().unwrap_or_default(),
            member_count,
            admins,
        }
    }

    async fn download_media(&self, inbound: &InboundMessage) -> Result<Vec<Media>> {
        let mut media = Vec::with_capacity(inbound.attachments.len());
        for attachment in &inbound.attachments {
            let source = attachment.source();
            let url = self.transport.file_url(source.file_id).await?;
            let data = self.transport.download(&url).await?;
            debug!(mime = %source.mime_hint, bytes = data.len(), "attachment downloaded");
            media.push(Media {
                mime_type: source.mime_hint,
                data,
            });
        }
        Ok(media)
    }

    /// The quoted context of a reply, for the model and for storage.
    async fn capture_quote(
        &self,
        inbound: &InboundMessage,
    ) -> Result<(Option<QuotedText>, Option<NewQuote>)> {
        let Some(replied) = &inbound.reply_to else {
            return Ok((None, None));
        };
        let Some(text) = replied.text.as_deref().filter(|t| !t.trim().is_empty()) else {
            return Ok((None, None));
        };

        // Bots are stored under the persona's name so replay attributes the
        // quote the same way.
        let (author_name, user_id) = match &replied.from {
            Some(sender) => {
                let name = if sender.is_bot {
                    &self.persona.name
                } else {
                    &sender.first_name
                };
                let author = self.users.find_or_create(sender.id, name).await?;
                (Some(author.name), Some(author.id))
            }
            None => (None, None),
        };

        Ok((
            Some(QuotedText {
                text: text.to_owned(),
                author_name,
            }),
            Some(NewQuote {
                content: text.to_owned(),
                user_id,
            }),
        ))
    }

    /// Timestamp for the user message of this turn, as both the session and
    /// the store will see it: millisecond precision, and never earlier than
    /// the chat's last stored message so replay order matches turn order.
    async fn turn_timestamp(&self, chat_id: i64, date: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let date = DateTime::from_timestamp_millis(date.timestamp_millis()).unwrap_or(date);
        let latest = self.messages.latest_timestamp(chat_id).await?;
        Ok(latest.map_or(date, |latest| date.max(latest)))
    }

    // -- failure -------------------------------------------------------------

    async fn fail(&self, turn: &Turn<'_>, error: AgentError) -> TurnOutcome {
        let chat_id = turn.chat_id();
        let stage = turn.stage;
        error!(chat_id, stage = %stage, error = %error, "turn failed");

        self.conversations.invalidate(chat_id).await;

        let report = if error.is_capacity() {
            format!("KEY LIMIT: {error}")
        } else {
            format!("Turn failed in chat {chat_id} at stage {stage}:\n{error}")
        };
        self.notifier.notify(&report).await;

        let options = SendOptions::plain().replying_to(turn.reply_target());
        if let Err(e) = self
            .transport
            .send_text(chat_id, &self.config.apology, &options)
            .await
        {
            warn!(chat_id, error = %e, "apology could not be sent");
        }

        TurnOutcome::Failed { stage, error }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_are_ordered() {
        assert!(TurnStage::Idle < TurnStage::KeyAcquired);
        assert!(TurnStage::Draining < TurnStage::Persisted);
        assert_eq!(TurnStage::SessionReady.to_string(), "session-ready");
    }

    #[test]
    fn default_config_matches_platform_limits() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.separator, "$NEXTMESSAGE$");
        assert_eq!(config.max_message_len, 4096);
        assert_eq!(config.safety.len(), 4);
    }
}
