//! SSE decoding for `streamGenerateContent?alt=sse`.
//!
//! Gemini sends one `data: {json}` line per event, each a complete
//! [`GenerateContentResponse`]. Network chunks do not respect line or UTF-8
//! boundaries, so bytes are buffered until a full line is available.

use crate::error::{AgentError, Result};
use crate::llm::types::{ErrorEnvelope, GenerateContentResponse};

/// Finish reasons that mean the reply was cut off by the backend rather than
/// completed.
const ABORT_REASONS: &[&str] = &[
    "SAFETY",
    "RECITATION",
    "BLOCKLIST",
    "PROHIBITED_CONTENT",
    "SPII",
];

/// Splits a byte stream into complete SSE lines.
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every line completed by them, without the
    /// terminating newline.
    pub fn push(&mut self, bytes: &[u8]) -> Result<Vec<String>> {
        self.buffer.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            lines.push(decode_line(&raw[..raw.len() - 1])?);
        }
        Ok(lines)
    }

    /// The unterminated remainder, if any, once the byte stream has ended.
    pub fn finish(&mut self) -> Result<Option<String>> {
        if self.buffer.is_empty() {
            return Ok(None);
        }
        let raw = std::mem::take(&mut self.buffer);
        decode_line(&raw).map(Some)
    }
}

fn decode_line(raw: &[u8]) -> Result<String> {
    let line = std::str::from_utf8(raw).map_err(|e| AgentError::LlmStreamError {
        reason: format!("invalid UTF-8 in stream: {e}"),
    })?;
    Ok(line.trim_end_matches('\r').to_owned())
}

/// Interpret one SSE line.
///
/// Returns the text carried by a `data:` event (possibly empty), `None` for
/// comments, blank lines and other fields, and an error when the event
/// reports a blocked prompt, an aborted candidate, or an API error.
pub fn parse_line(line: &str) -> Result<Option<String>> {
    let Some(data) = line.strip_prefix("data:") else {
        if !line.is_empty() && !line.starts_with(':') {
            tracing::trace!(line, "ignoring SSE field");
        }
        return Ok(None);
    };
    let data = data.trim_start();
    if data.is_empty() || data == "[DONE]" {
        return Ok(None);
    }

    if let Ok(envelope) = serde_json::from_str::<ErrorEnvelope>(data) {
        return Err(AgentError::stream(envelope.error.to_string()));
    }

    let event: GenerateContentResponse =
        serde_json::from_str(data).map_err(|e| AgentError::LlmParseFailed {
            reason: format!("bad stream event: {e}"),
        })?;

    if let Some(reason) = event
        .prompt_feedback
        .as_ref()
        .and_then(|f| f.block_reason.as_deref())
    {
        return Err(AgentError::stream(format!("prompt blocked: {reason}")));
    }

    let text = event.text();
    if let Some(reason) = event.finish_reason()
        && ABORT_REASONS.contains(&reason)
        && text.is_empty()
    {
        return Err(AgentError::stream(format!("reply stopped: {reason}")));
    }

    Ok(Some(text))
}
