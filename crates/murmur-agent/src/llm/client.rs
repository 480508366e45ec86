//! Gemini REST client.
//!
//! Talks to `models/{model}:streamGenerateContent?alt=sse` and turns the SSE
//! body into a [`TextStream`]. The API key is supplied per call because keys
//! rotate through the [`CredentialPool`](crate::credentials::CredentialPool).

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::StatusCode;
use reqwest::header::{CONTENT_TYPE, HeaderMap, HeaderValue};

use crate::error::{AgentError, Result};
use crate::llm::streaming::{SseDecoder, parse_line};
use crate::llm::types::{ErrorEnvelope, GenerateRequest};
use crate::llm::{GenerativeBackend, TextStream};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-pro-latest";

const API_KEY_HEADER: &str = "x-goog-api-key";

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeminiConfig {
    pub base_url: String,
    pub model: String,
    /// Cap on a single HTTP exchange, including the streamed body.
    pub request_timeout: Duration,
}

impl GeminiConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            ..Self::default()
        }
    }
}

impl Default for GeminiConfig {
    fn default() -> Self {
        Self {
            base_url: GEMINI_BASE_URL.to_owned(),
            model: DEFAULT_GEMINI_MODEL.to_owned(),
            request_timeout: Duration::from_secs(120),
        }
    }
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GeminiClient {
    config: GeminiConfig,
    http: reqwest::Client,
}

impl GeminiClient {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.model.trim().is_empty() {
            return Err(AgentError::ConfigError {
                reason: "gemini model name is empty".into(),
            });
        }
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self { config, http })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn stream_url(&self) -> String {
        format!(
            "{}/models/{}:streamGenerateContent?alt=sse",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    fn headers(api_key: &str) -> Result<HeaderMap> {
        if api_key.is_empty() {
            return Err(AgentError::MissingApiKey {
                provider: "gemini".into(),
            });
        }
        let mut headers = HeaderMap::new();
        headers.insert(
            API_KEY_HEADER,
            HeaderValue::from_str(api_key).map_err(|e| AgentError::LlmRequestFailed {
                reason: format!("invalid API key header: {e}"),
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        Ok(headers)
    }
}

#[async_trait]
impl GenerativeBackend for GeminiClient {
    async fn stream_generate(&self, api_key: &str, request: &GenerateRequest) -> Result<TextStream> {
        let url = self.stream_url();
        tracing::debug!(
            model = %self.config.model,
            turns = request.contents.len(),
            "sending streaming request"
        );

        let resp = self
            .http
            .post(&url)
            .headers(Self::headers(api_key)?)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }

        let mut bytes = resp.bytes_stream();
        let stream: TextStream = Box::pin(async_stream::try_stream! {
            let mut decoder = SseDecoder::new();
            while let Some(chunk) = bytes.next().await {
                let chunk = chunk.map_err(|e| AgentError::stream(format!("stream read error: {e}")))?;
                for line in decoder.push(&chunk)? {
                    if let Some(text) = parse_line(&line)? {
                        if !text.is_empty() {
                            yield text;
                        }
                    }
                }
            }
            if let Some(line) = decoder.finish()? {
                if let Some(text) = parse_line(&line)? {
                    if !text.is_empty() {
                        yield text;
                    }
                }
            }
        });
        Ok(stream)
    }
}

fn map_http_error(status: StatusCode, body: &str) -> AgentError {
    let detail = serde_json::from_str::<ErrorEnvelope>(body)
        .map(|envelope| envelope.error.to_string())
        .unwrap_or_else(|_| body.trim().to_owned());
    AgentError::LlmRequestFailed {
        reason: format!("HTTP {}: {detail}", status.as_u16()),
    }
}
