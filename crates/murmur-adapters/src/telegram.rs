//! Telegram Bot API client.
//!
//! Implements [`ChatTransport`] for the reply core and exposes the polling
//! calls the gateway needs (`getMe`, `getUpdates`). Every method is a JSON
//! POST to `{base}{token}/{method}`; answers are unwrapped from the
//! `{ "ok": …, "result": … }` envelope by [`TelegramAdapter::parse_telegram_response`].

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, warn};

use murmur_agent::{AgentError, ChatMember, ChatTransport, ParseMode, SendOptions};

use crate::error::{AdapterError, Result};
use crate::update::{Update, parse_update};

/// Telegram Bot API base URL. Method calls go to `{BASE}{token}/{method}`.
const TELEGRAM_API_BASE: &str = "https://api.telegram.org/bot";

/// File downloads go to `{BASE}{token}/{file_path}`.
const TELEGRAM_FILE_BASE: &str = "https://api.telegram.org/file/bot";

/// Slack added to the HTTP timeout of a long poll.
const POLL_GRACE: Duration = Duration::from_secs(10);

/// The bot's own account, from `getMe`.
#[derive(Debug, Clone, Deserialize)]
pub struct BotIdentity {
    pub id: i64,
    pub first_name: String,
    #[serde(default)]
    pub username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    #[serde(default)]
    file_path: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Administrator {
    user: AdminUser,
}

#[derive(Debug, Deserialize)]
struct AdminUser {
    id: i64,
    first_name: String,
    #[serde(default)]
    last_name: Option<String>,
    #[serde(default)]
    is_bot: bool,
}

/// Telegram Bot API client bound to one bot token.
#[derive(Clone)]
pub struct TelegramAdapter {
    token: String,
    api_base: String,
    file_base: String,
    http: reqwest::Client,
}

impl std::fmt::Debug for TelegramAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelegramAdapter")
            .field("api_base", &self.api_base)
            .finish_non_exhaustive()
    }
}

impl TelegramAdapter {
    pub fn new(token: impl Into<String>) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(AdapterError::AuthRequired {
                provider: "telegram".into(),
            });
        }
        let http = reqwest::Client::builder()
            .user_agent(concat!("murmur/", env!("CARGO_PKG_VERSION")))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| AdapterError::ConfigError(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            token,
            api_base: TELEGRAM_API_BASE.to_owned(),
            file_base: TELEGRAM_FILE_BASE.to_owned(),
            http,
        })
    }

    /// Point the client at another Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>, file_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self.file_base = file_base.into();
        self
    }

    // -----------------------------------------------------------------------
    // URL construction
    // -----------------------------------------------------------------------

    fn api_url(&self, method: &str) -> String {
        format!("{}{}/{}", self.api_base, self.token, method)
    }

    fn file_download_url(&self, file_path: &str) -> String {
        format!("{}{}/{}", self.file_base, self.token, file_path)
    }

    // -----------------------------------------------------------------------
    // Response parsing
    // -----------------------------------------------------------------------

    /// Check a Bot API envelope and return its `result`.
    ///
    /// Telegram responses follow the format:
    /// `{ "ok": true, "result": {...} }` on success, or
    /// `{ "ok": false, "error_code": 400, "description": "..." }` on failure.
    pub fn parse_telegram_response(response: Value, method: &str) -> Result<Value> {
        let ok = response
            .get("ok")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if !ok {
            let code = response
                .get("error_code")
                .and_then(|v| v.as_i64())
                .unwrap_or(-1);
            let description = response
                .get("description")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error")
                .to_owned();
            let retry_after = response
                .pointer("/parameters/retry_after")
                .and_then(|v| v.as_u64());
            return Err(AdapterError::Api {
                method: method.to_owned(),
                code,
                description,
                retry_after,
            });
        }

        match response {
            Value::Object(mut map) => Ok(map.remove("result").unwrap_or(Value::Null)),
            _ => Err(AdapterError::parse(method, "response is not an object")),
        }
    }

    // -----------------------------------------------------------------------
    // Calls
    // -----------------------------------------------------------------------

    async fn call<T: DeserializeOwned>(&self, method: &str, body: Value) -> Result<T> {
        self.call_with_timeout(method, body, None).await
    }

    async fn call_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        body: Value,
        timeout: Option<Duration>,
    ) -> Result<T> {
        debug!(method, "telegram call");
        let mut request = self.http.post(self.api_url(method)).json(&body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::http(method, e))?;
        let envelope: Value = response
            .json()
            .await
            .map_err(|e| AdapterError::http(method, e))?;
        let result = Self::parse_telegram_response(envelope, method)?;
        serde_json::from_value(result).map_err(|e| AdapterError::parse(method, e.to_string()))
    }

    pub async fn get_me(&self) -> Result<BotIdentity> {
        self.call("getMe", json!({})).await
    }

    /// Long-poll for updates after `offset`, waiting up to `timeout_secs`.
    pub async fn get_updates(&self, offset: Option<i64>, timeout_secs: u64) -> Result<Vec<Update>> {
        let mut body = json!({
            "timeout": timeout_secs,
            "allowed_updates": ["message"],
        });
        if let Some(offset) = offset {
            body["offset"] = json!(offset);
        }
        let raw: Vec<Value> = self
            .call_with_timeout(
                "getUpdates",
                body,
                Some(Duration::from_secs(timeout_secs) + POLL_GRACE),
            )
            .await?;

        let mut updates = Vec::with_capacity(raw.len());
        for value in &raw {
            match parse_update(value) {
                Ok(update) => updates.push(update),
                Err(e) => warn!(error = %e, "skipping undecodable update"),
            }
        }
        Ok(updates)
    }

    pub async fn send_message(&self, chat_id: i64, text: &str, options: &SendOptions) -> Result<i64> {
        let mut body = json!({
            "chat_id": chat_id,
            "text": text,
        });
        if let Some(ParseMode::Html) = options.parse_mode {
            body["parse_mode"] = json!("HTML");
        }
        if let Some(reply_to) = options.reply_to {
            body["reply_parameters"] = json!({
                "message_id": reply_to,
                "allow_sending_without_reply": true,
            });
        }
        let sent: SentMessage = self.call("sendMessage", body).await?;
        Ok(sent.message_id)
    }

    pub async fn send_chat_action(&self, chat_id: i64, action: &str) -> Result<()> {
        let _: bool = self
            .call(
                "sendChatAction",
                json!({ "chat_id": chat_id, "action": action }),
            )
            .await?;
        Ok(())
    }

    pub async fn get_file_url(&self, file_id: &str) -> Result<String> {
        let info: FileInfo = self.call("getFile", json!({ "file_id": file_id })).await?;
        let path = info
            .file_path
            .ok_or_else(|| AdapterError::parse("getFile", "file has no download path"))?;
        Ok(self.file_download_url(&path))
    }

    pub async fn download_file(&self, url: &str) -> Result<Vec<u8>> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| AdapterError::http("download", e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| AdapterError::http("download", e))?;
        Ok(bytes.to_vec())
    }

    pub async fn get_chat_administrators(&self, chat_id: i64) -> Result<Vec<ChatMember>> {
        let admins: Vec<Administrator> = self
            .call("getChatAdministrators", json!({ "chat_id": chat_id }))
            .await?;
        Ok(admins
            .into_iter()
            .filter(|a| !a.user.is_bot)
            .map(|a| ChatMember {
                user_id: a.user.id,
                name: match a.user.last_name {
                    Some(last) if !last.is_empty() => format!("{} {last}", a.user.first_name),
                    _ => a.user.first_name,
                },
            })
            .collect())
    }

    pub async fn get_chat_member_count(&self, chat_id: i64) -> Result<u32> {
        self.call("getChatMemberCount", json!({ "chat_id": chat_id }))
            .await
    }
}

// ---------------------------------------------------------------------------
// ChatTransport implementation
// ---------------------------------------------------------------------------

#[async_trait]
impl ChatTransport for TelegramAdapter {
    async fn send_text(
        &self,
        chat_id: i64,
        text: &str,
        options: &SendOptions,
    ) -> murmur_agent::Result<i64> {
        Ok(self.send_message(chat_id, text, options).await?)
    }

    async fn send_typing(&self, chat_id: i64) -> murmur_agent::Result<()> {
        Ok(self.send_chat_action(chat_id, "typing").await?)
    }

    async fn file_url(&self, file_id: &str) -> murmur_agent::Result<String> {
        Ok(self.get_file_url(file_id).await?)
    }

    async fn download(&self, url: &str) -> murmur_agent::Result<Vec<u8>> {
        self.download_file(url).await.map_err(AgentError::from)
    }

    async fn chat_administrators(&self, chat_id: i64) -> murmur_agent::Result<Vec<ChatMember>> {
        Ok(self.get_chat_administrators(chat_id).await?)
    }

    async fn chat_member_count(&self, chat_id: i64) -> murmur_agent::Result<u32> {
        Ok(self.get_chat_member_count(chat_id).await?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
