//! Generative backend layer.
//!
//! - [`types`] -- Gemini wire types, also used as the in-memory history.
//! - [`streaming`] -- SSE line decoding for streamed replies.
//! - [`client`] -- HTTP client implementing [`GenerativeBackend`].

pub mod client;
pub mod streaming;
pub mod types;

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use crate::error::Result;

pub use client::{GeminiClient, GeminiConfig};
pub use types::{Content, GenerateRequest, HarmBlockThreshold, HarmCategory, Part, Role, SafetySetting};

/// Text chunks of a streamed reply, in arrival order.
pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

/// A backend that can stream a reply to a conversation.
///
/// Failures before the first byte arrives are returned from the call itself;
/// failures afterwards are yielded as stream items.
#[async_trait]
pub trait GenerativeBackend: Send + Sync {
    async fn stream_generate(&self, api_key: &str, request: &GenerateRequest) -> Result<TextStream>;
}
