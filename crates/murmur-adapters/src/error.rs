//! Adapter error types.
//!
//! All Telegram calls surface errors through [`AdapterError`]. The reply
//! core only sees them as [`AgentError::Transport`].

use murmur_agent::AgentError;

/// Unified error type for the Telegram adapter.
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// The HTTP exchange itself failed (connect, timeout, body read).
    #[error("http error calling `{method}`: {reason}")]
    Http { method: String, reason: String },

    /// Telegram answered with `ok: false`.
    #[error("telegram API error in `{method}` (code {code}): {description}")]
    Api {
        method: String,
        code: i64,
        description: String,
        /// Seconds to wait before retrying, for 429 answers.
        retry_after: Option<u64>,
    },

    /// A response or update did not have the expected shape.
    #[error("unexpected payload from `{method}`: {reason}")]
    Parse { method: String, reason: String },

    /// No bot token was configured.
    #[error("authentication required: provider={provider}")]
    AuthRequired { provider: String },

    #[error("serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    ConfigError(String),
}

/// Convenience alias used throughout the adapters crate.
pub type Result<T> = std::result::Result<T, AdapterError>;

impl AdapterError {
    pub fn http(method: &str, err: reqwest::Error) -> Self {
        Self::Http {
            method: method.to_owned(),
            // The URL carries the bot token.
            reason: err.without_url().to_string(),
        }
    }

    pub fn parse(method: &str, reason: impl Into<String>) -> Self {
        Self::Parse {
            method: method.to_owned(),
            reason: reason.into(),
        }
    }

    /// Whether Telegram refused the message text itself, e.g. bad markup.
    pub fn is_bad_request(&self) -> bool {
        matches!(self, Self::Api { code: 400, .. })
    }
}

impl From<AdapterError> for AgentError {
    fn from(err: AdapterError) -> Self {
        AgentError::transport(err.to_string())
    }
}
