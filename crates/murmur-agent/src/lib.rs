//! Reply core for murmur.
//!
//! Turns one inbound chat message into a streamed, paced, persisted reply
//! from a generative backend.
//!
//! ## Architecture
//!
//! ```text
//! InboundMessage
//!       │
//! ┌─────┴──────────────┐   ┌────────────────┐   ┌──────────────────┐
//! │ ReplyOrchestrator  │──>│ CredentialPool │   │ ConversationStore│
//! │ (per-chat turns)   │   └────────────────┘   │ (session cache)  │
//! └─────┬──────────────┘                        └──────────────────┘
//!       │ stream
//! ┌─────┴──────┐   ┌────────────────┐   ┌──────────────────┐   ┌───────────────┐
//! │ ChatSession│──>│ MessageBuilder │──>│ MarkdownRenderer │──>│ ChatTransport │
//! │ (Gemini)   │   │ (separator)    │   │ + Pacer / typing │   │               │
//! └────────────┘   └────────────────┘   └──────────────────┘   └───────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`credentials`] -- API key pool with usage cap and cooldown.
//! - [`builder`] -- re-segmentation of streamed text on a separator token.
//! - [`render`] -- Markdown to Telegram HTML, and length chunking.
//! - [`pacing`] -- typing indicator and typing-speed delay.
//! - [`conversation`] -- session cache and per-chat locks.
//! - [`session`] / [`history`] / [`prompt`] -- what the model is sent.
//! - [`llm`] -- Gemini wire types and streaming client.
//! - [`transport`] -- chat platform boundary.
//! - [`notify`] -- operator alerts.
//! - [`orchestrator`] -- the per-turn state machine.

pub mod builder;
pub mod conversation;
pub mod credentials;
pub mod error;
pub mod history;
pub mod llm;
pub mod notify;
pub mod orchestrator;
pub mod pacing;
pub mod prompt;
pub mod render;
pub mod session;
pub mod transport;

pub use builder::{DEFAULT_SEPARATOR, MessageBuilder};
pub use conversation::{ChatLocks, ConversationStore, SessionHandle};
pub use credentials::{Admission, ApiKey, CredentialPool, KeyLease, KeyUsage, PoolLimits};
pub use error::{AgentError, Result};
pub use history::{HistoryEntry, Media, QuotedText, UserTurn};
pub use llm::{GeminiClient, GeminiConfig, GenerativeBackend, SafetySetting, TextStream};
pub use notify::OperatorNotifier;
pub use orchestrator::{
    Collaborators, OrchestratorConfig, ReplyOrchestrator, TurnOutcome, TurnStage,
};
pub use pacing::{Pacer, TypingGuard, TypingIndicator};
pub use prompt::{ChatContext, Persona, SystemPrompt};
pub use render::{MarkdownRenderer, RenderRules, Wrap, chunk, escape_html};
pub use session::{ChatSession, PendingTurn};
pub use transport::{
    Attachment, ChatKind, ChatMember, ChatTransport, InboundChat, InboundMessage, ParseMode,
    RepliedMessage, SendOptions, Sender,
};
