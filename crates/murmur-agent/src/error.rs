//! Agent error types.
//!
//! Every stage of a reply turn surfaces failures through [`AgentError`]. The
//! orchestrator inspects the variant only to choose operator wording; the
//! user always gets the same apology.

use murmur_store::StoreError;

/// Unified error type for the reply core.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    // -- Capacity ------------------------------------------------------------
    /// Every API key has reached its lifetime query cap.
    #[error("no generative API key available under the usage cap")]
    CapacityExhausted,

    // -- Generative backend --------------------------------------------------
    /// The request to the generative backend failed before streaming began.
    #[error("llm request failed: {reason}")]
    LlmRequestFailed { reason: String },

    /// A backend payload could not be decoded.
    #[error("llm response parse error: {reason}")]
    LlmParseFailed { reason: String },

    /// The stream broke off, reported an error, or was blocked.
    #[error("llm stream error: {reason}")]
    LlmStreamError { reason: String },

    #[error("missing api key for provider: {provider}")]
    MissingApiKey { provider: String },

    // -- Chat transport ------------------------------------------------------
    /// A chat transport call failed (send, typing, file download, metadata).
    #[error("transport error: {reason}")]
    Transport { reason: String },

    // -- Turn control --------------------------------------------------------
    /// The turn exceeded its hard duration cap.
    #[error("turn timed out after {seconds}s")]
    Timeout { seconds: u64 },

    // -- Upstream crates -----------------------------------------------------
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    // -- Configuration -------------------------------------------------------
    #[error("config error: {reason}")]
    ConfigError { reason: String },

    /// Catch-all for broken internal invariants.
    #[error("internal agent error: {0}")]
    Internal(String),
}

/// Convenience alias used throughout the agent crate.
pub type Result<T> = std::result::Result<T, AgentError>;

impl AgentError {
    pub fn transport(reason: impl Into<String>) -> Self {
        Self::Transport {
            reason: reason.into(),
        }
    }

    pub fn stream(reason: impl Into<String>) -> Self {
        Self::LlmStreamError {
            reason: reason.into(),
        }
    }

    /// Whether this is the capacity failure operators must act on.
    pub fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExhausted)
    }
}

impl From<reqwest::Error> for AgentError {
    fn from(err: reqwest::Error) -> Self {
        Self::LlmRequestFailed {
            reason: err.to_string(),
        }
    }
}
