//! Stateful dialogue with the generative backend for one chat.
//!
//! The backend itself is stateless; a [`ChatSession`] carries the history and
//! resends it on every call. A turn is committed to the history only when its
//! stream has been drained and [`PendingTurn::finish`] is called, so a failed
//! turn leaves the session exactly as it was.

use futures::StreamExt;
use tracing::debug;

use crate::error::{AgentError, Result};
use crate::history::{HistoryEntry, UserTurn};
use crate::llm::{Content, GenerateRequest, GenerativeBackend, SafetySetting, TextStream};

#[derive(Debug, Clone, Default)]
pub struct ChatSession {
    history: Vec<HistoryEntry>,
    system_instruction: Option<String>,
    safety: Vec<SafetySetting>,
}

impl ChatSession {
    pub fn start(history: Vec<HistoryEntry>, safety: Vec<SafetySetting>) -> Self {
        Self {
            history,
            system_instruction: None,
            safety,
        }
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    pub fn system_instruction(&self) -> Option<&str> {
        self.system_instruction.as_deref()
    }

    pub fn set_system_instruction(&mut self, instruction: impl Into<String>) {
        self.system_instruction = Some(instruction.into());
    }

    /// The request that sending `turn` would produce.
    pub fn request_for(&self, turn: &UserTurn, token: &str) -> GenerateRequest {
        let mut contents: Vec<Content> = self
            .history
            .iter()
            .map(|entry| entry.to_content(token))
            .collect();
        contents.push(Content::user(turn.parts(token)));
        GenerateRequest {
            contents,
            system_instruction: self.system_instruction.as_deref().map(Content::system),
            safety_settings: self.safety.clone(),
        }
    }

    /// Submit `turn` and start streaming the reply.
    pub async fn send_message_stream<'s>(
        &'s mut self,
        backend: &dyn GenerativeBackend,
        api_key: &str,
        turn: UserTurn,
        token: &str,
    ) -> Result<PendingTurn<'s>> {
        let request = self.request_for(&turn, token);
        let stream = backend.stream_generate(api_key, &request).await?;
        Ok(PendingTurn {
            session: self,
            turn,
            stream,
            reply: String::new(),
            drained: false,
        })
    }
}

/// A submitted turn whose reply is still streaming.
pub struct PendingTurn<'s> {
    session: &'s mut ChatSession,
    turn: UserTurn,
    stream: TextStream,
    reply: String,
    drained: bool,
}

impl PendingTurn<'_> {
    /// Next text chunk, or `None` once the stream has ended.
    pub async fn next_chunk(&mut self) -> Option<Result<String>> {
        if self.drained {
            return None;
        }
        match self.stream.next().await {
            Some(Ok(chunk)) => {
                self.reply.push_str(&chunk);
                Some(Ok(chunk))
            }
            Some(Err(e)) => Some(Err(e)),
            None => {
                self.drained = true;
                None
            }
        }
    }

    /// Text received so far.
    pub fn reply(&self) -> &str {
        &self.reply
    }

    /// Append the user turn and the model reply to the session history.
    /// Fails if the stream has not ended yet.
    pub fn finish(self) -> Result<String> {
        if !self.drained {
            return Err(AgentError::Internal(
                "turn finished before its stream ended".into(),
            ));
        }
        let reply = self.reply.trim().to_owned();
        self.session.history.push(HistoryEntry::User(self.turn));
        self.session
            .history
            .push(HistoryEntry::Model(reply.clone()));
        debug!(entries = self.session.history.len(), "turn committed to session");
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::Utc;

    use super::*;
    use crate::llm::Role;

    struct Scripted {
        chunks: Vec<Result<String>>,
        seen: Mutex<Vec<GenerateRequest>>,
    }

    impl Scripted {
        fn new(chunks: Vec<Result<String>>) -> Self {
            Self {
                chunks,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl GenerativeBackend for Scripted {
        async fn stream_generate(&self, _: &str, request: &GenerateRequest) -> Result<TextStream> {
            self.seen.lock().unwrap().push(request.clone());
            let items: Vec<Result<String>> = self
                .chunks
                .iter()
                .map(|c| match c {
                    Ok(s) => Ok(s.clone()),
                    Err(e) => Err(AgentError::stream(e.to_string())),
                })
                .collect();
            Ok(Box::pin(futures::stream::iter(items)))
        }
    }

    fn turn(text: &str) -> UserTurn {
        UserTurn {
            author_name: "Ann".into(),
            sent_at: Utc::now(),
            text: text.into(),
            media: Vec::new(),
            quote: None,
        }
    }

    #[tokio::test]
    async fn drained_turn_is_committed() {
        let backend = Scripted::new(vec![Ok("Hel".into()), Ok("lo ".into())]);
        let mut session = ChatSession::start(Vec::new(), SafetySetting::permissive());
        session.set_system_instruction("be brief");

        let mut pending = session
            .send_message_stream(&backend, "key", turn("hi"), "tok")
            .await
            .unwrap();
        let mut chunks = Vec::new();
        while let Some(chunk) = pending.next_chunk().await {
            chunks.push(chunk.unwrap());
        }
        assert_eq!(chunks, vec!["Hel", "lo "]);
        assert_eq!(pending.finish().unwrap(), "Hello");

        assert_eq!(session.history().len(), 2);
        assert_eq!(session.history()[1], HistoryEntry::Model("Hello".into()));

        let request = &backend.seen.lock().unwrap()[0];
        assert_eq!(request.contents.len(), 1);
        assert_eq!(request.contents[0].role, Some(Role::User));
        assert_eq!(
            request.system_instruction.as_ref().unwrap().text(),
            "be brief"
        );
        assert_eq!(request.safety_settings.len(), 4);
    }

    #[tokio::test]
    async fn failed_stream_leaves_history_untouched() {
        let backend = Scripted::new(vec![
            Ok("partial".into()),
            Err(AgentError::stream("boom")),
        ]);
        let mut session = ChatSession::start(
            vec![HistoryEntry::Model("earlier".into())],
            Vec::new(),
        );

        let mut pending = session
            .send_message_stream(&backend, "key", turn("hi"), "tok")
            .await
            .unwrap();
        assert!(pending.next_chunk().await.unwrap().is_ok());
        assert!(pending.next_chunk().await.unwrap().is_err());
        drop(pending);

        assert_eq!(session.history().len(), 1);
    }

    #[tokio::test]
    async fn finish_before_end_of_stream_is_rejected() {
        let backend = Scripted::new(vec![Ok("a".into())]);
        let mut session = ChatSession::default();
        let pending = session
            .send_message_stream(&backend, "key", turn("hi"), "tok")
            .await
            .unwrap();
        assert!(pending.finish().is_err());
        assert!(session.history().is_empty());
    }

    #[tokio::test]
    async fn history_is_resent_with_the_current_token() {
        let backend = Scripted::new(vec![Ok("ok".into())]);
        let mut session = ChatSession::start(
            vec![
                HistoryEntry::User(turn("first")),
                HistoryEntry::Model("reply".into()),
            ],
            Vec::new(),
        );

        let mut pending = session
            .send_message_stream(&backend, "key", turn("second"), "fresh")
            .await
            .unwrap();
        while pending.next_chunk().await.is_some() {}
        pending.finish().unwrap();

        let request = &backend.seen.lock().unwrap()[0];
        assert_eq!(request.contents.len(), 3);
        let first_prefix = request.contents[0].parts[0].as_text().unwrap();
        assert!(first_prefix.starts_with("[fresh "));
        assert_eq!(session.history().len(), 4);
    }
}
