//! End-to-end tests for the reply orchestrator.
//!
//! A scripted backend and a recording transport stand in for Gemini and
//! Telegram; persistence is a real in-memory SQLite database.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures::StreamExt;
use murmur_agent::history::replay;
use murmur_agent::llm::GenerateRequest;
use murmur_agent::{
    AgentError, Attachment, ChatKind, ChatMember, ChatTransport, Collaborators,
    ConversationStore, CredentialPool, GenerativeBackend, HistoryEntry, InboundChat,
    InboundMessage,
    OrchestratorConfig, Pacer, ParseMode, Persona, PoolLimits, RepliedMessage, ReplyOrchestrator,
    Result, SendOptions, Sender, TextStream, TurnOutcome, TurnStage,
};
use murmur_store::{ChatStore, Database, MessageStore, UserRole, UserStore};
use tokio::time::Instant;

// ═══════════════════════════════════════════════════════════════════════
//  Fakes
// ═══════════════════════════════════════════════════════════════════════

#[derive(Clone)]
enum Chunk {
    Text(&'static str),
    Fail(&'static str),
}

/// Replays one script per call, in order.
struct ScriptedBackend {
    scripts: Mutex<VecDeque<Vec<Chunk>>>,
    requests: Mutex<Vec<GenerateRequest>>,
    submitted: Mutex<Vec<Instant>>,
    chunk_delay: Duration,
}

impl ScriptedBackend {
    fn new(scripts: Vec<Vec<Chunk>>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
            submitted: Mutex::new(Vec::new()),
            chunk_delay: Duration::ZERO,
        }
    }

    fn slow(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    fn requests(&self) -> Vec<GenerateRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn submitted(&self) -> Vec<Instant> {
        self.submitted.lock().unwrap().clone()
    }
}

#[async_trait]
impl GenerativeBackend for ScriptedBackend {
    async fn stream_generate(&self, api_key: &str, request: &GenerateRequest) -> Result<TextStream> {
        assert!(!api_key.is_empty());
        self.requests.lock().unwrap().push(request.clone());
        self.submitted.lock().unwrap().push(Instant::now());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_default();
        let delay = self.chunk_delay;
        let stream = futures::stream::iter(script).then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            match chunk {
                Chunk::Text(text) => Ok(text.to_owned()),
                Chunk::Fail(reason) => Err(AgentError::stream(reason)),
            }
        });
        Ok(Box::pin(stream))
    }
}

#[derive(Debug, Clone)]
struct Sent {
    chat_id: i64,
    text: String,
    options: SendOptions,
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    reject_html: bool,
}

impl RecordingTransport {
    fn rejecting_html() -> Self {
        Self {
            reject_html: true,
            ..Self::default()
        }
    }

    fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    fn sent_to(&self, chat_id: i64) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.chat_id == chat_id).collect()
    }
}

#[async_trait]
impl ChatTransport for RecordingTransport {
    async fn send_text(&self, chat_id: i64, text: &str, options: &SendOptions) -> Result<i64> {
        if self.reject_html && options.parse_mode == Some(ParseMode::Html) {
            return Err(AgentError::transport("Bad Request: can't parse entities"));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(Sent {
            chat_id,
            text: text.to_owned(),
            options: options.clone(),
        });
        Ok(sent.len() as i64)
    }

    async fn send_typing(&self, _: i64) -> Result<()> {
        Ok(())
    }

    async fn file_url(&self, file_id: &str) -> Result<String> {
        Ok(format!("https://files.test/{file_id}"))
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        Ok(url.as_bytes().to_vec())
    }

    async fn chat_administrators(&self, _: i64) -> Result<Vec<ChatMember>> {
        Ok(vec![ChatMember {
            user_id: 1,
            name: "Ann".into(),
        }])
    }

    async fn chat_member_count(&self, _: i64) -> Result<u32> {
        Ok(12)
    }
}

// ═══════════════════════════════════════════════════════════════════════
//  Harness
// ═══════════════════════════════════════════════════════════════════════

const PRIVATE_CHAT: i64 = 100;
const GROUP_CHAT: i64 = -200;
const ANN: i64 = 1;
const OPERATOR: i64 = 9;

struct Harness {
    db: Database,
    transport: Arc<RecordingTransport>,
    backend: Arc<ScriptedBackend>,
    orchestrator: ReplyOrchestrator,
}

async fn database() -> Database {
    let db = Database::open_in_memory().unwrap();
    db.run_migrations().await.unwrap();
    let chats = ChatStore::new(db.clone());
    chats.find_or_create(PRIVATE_CHAT).await.unwrap();
    chats.find_or_create(GROUP_CHAT).await.unwrap();
    let users = UserStore::new(db.clone());
    users.find_or_create(ANN, "Ann").await.unwrap();
    users.find_or_create(OPERATOR, "Op").await.unwrap();
    users.set_role(OPERATOR, UserRole::Developer).await.unwrap();
    db
}

/// Limits loose enough that no test waits on a cooldown unless it asks to.
fn relaxed_limits() -> PoolLimits {
    PoolLimits {
        window_quota: 100,
        ..PoolLimits::default()
    }
}

fn orchestrator(
    db: Database,
    transport: Arc<RecordingTransport>,
    backend: Arc<ScriptedBackend>,
    keys: &[&str],
    config: OrchestratorConfig,
) -> ReplyOrchestrator {
    orchestrator_with_limits(db, transport, backend, keys, config, relaxed_limits())
}

fn orchestrator_with_limits(
    db: Database,
    transport: Arc<RecordingTransport>,
    backend: Arc<ScriptedBackend>,
    keys: &[&str],
    config: OrchestratorConfig,
    limits: PoolLimits,
) -> ReplyOrchestrator {
    let collab = Collaborators {
        transport,
        backend,
        credentials: Arc::new(CredentialPool::new(
            keys.iter().map(|k| k.to_string()),
            limits,
        )),
        conversations: ConversationStore::default(),
        database: db,
    };
    ReplyOrchestrator::new(collab, Persona::default(), Pacer::instant(), config)
}

async fn harness(scripts: Vec<Vec<Chunk>>) -> Harness {
    harness_with(scripts, RecordingTransport::default(), OrchestratorConfig::default(), &["key-1"]).await
}

async fn harness_with(
    scripts: Vec<Vec<Chunk>>,
    transport: RecordingTransport,
    config: OrchestratorConfig,
    keys: &[&str],
) -> Harness {
    let db = database().await;
    let transport = Arc::new(transport);
    let backend = Arc::new(ScriptedBackend::new(scripts));
    let orchestrator = orchestrator(
        db.clone(),
        Arc::clone(&transport),
        Arc::clone(&backend),
        keys,
        config,
    );
    Harness {
        db,
        transport,
        backend,
        orchestrator,
    }
}

fn inbound(chat_id: i64, message_id: i64, text: &str) -> InboundMessage {
    let group = chat_id < 0;
    InboundMessage {
        message_id,
        date: Utc::now(),
        chat: InboundChat {
            id: chat_id,
            kind: if group { ChatKind::Supergroup } else { ChatKind::Private },
            title: group.then(|| "Rustaceans".to_owned()),
        },
        from: Sender {
            id: ANN,
            first_name: "Ann".into(),
            last_name: None,
            username: None,
            is_bot: false,
        },
        text: Some(text.to_owned()),
        reply_to: None,
        attachments: Vec::new(),
        media_group_id: None,
        forwarded: false,
    }
}

fn texts(chunks: &[&'static str]) -> Vec<Chunk> {
    chunks.iter().map(|c| Chunk::Text(c)).collect()
}

async fn chat_history(db: &Database, telegram_id: i64) -> Vec<murmur_store::StoredMessage> {
    let chat = ChatStore::new(db.clone())
        .find_by_telegram_id(telegram_id)
        .await
        .unwrap()
        .unwrap();
    MessageStore::new(db.clone()).history(chat.id).await.unwrap()
}

// ═══════════════════════════════════════════════════════════════════════
//  Happy path
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn streamed_reply_is_split_sent_and_persisted() {
    let h = harness(vec![texts(&["Hi", " there$NEXT", "MESSAGE$How are", " you?"])]).await;

    let outcome = h.orchestrator.handle(&inbound(PRIVATE_CHAT, 10, "hello")).await;
    assert!(matches!(outcome, TurnOutcome::Persisted { sent: 2, .. }));

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].text, "Hi there");
    assert_eq!(sent[1].text, "How are you?");
    assert!(sent.iter().all(|s| s.options.parse_mode == Some(ParseMode::Html)));
    assert!(sent.iter().all(|s| s.options.reply_to.is_none()));

    let history = chat_history(&h.db, PRIVATE_CHAT).await;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].content, "hello");
    assert_eq!(history[0].author.as_ref().unwrap().name, "Ann");
    assert_eq!(history[0].telegram_id, Some(10));
    assert!(history[1].is_from_model());
    assert_eq!(history[1].content, "Hi there$NEXTMESSAGE$How are you?");
}

#[tokio::test]
async fn group_reply_quotes_the_trigger_once() {
    let h = harness(vec![texts(&["one$NEXTMESSAGE$two"])]).await;

    let outcome = h.orchestrator.handle(&inbound(GROUP_CHAT, 55, "hey swifie")).await;
    assert!(outcome.is_persisted());

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].options.reply_to, Some(55));
    assert_eq!(sent[1].options.reply_to, None);

    let request = &h.backend.requests()[0];
    let prompt = request.system_instruction.as_ref().unwrap().text();
    assert!(prompt.contains("group chat called \"Rustaceans\""));
    assert!(prompt.contains("12 members"));
    assert!(prompt.contains("administrators are: Ann"));
}

#[tokio::test]
async fn markdown_is_rendered_to_html() {
    let h = harness(vec![texts(&["# Plan\n\n- **one**\n- two"])]).await;
    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "plan?")).await;

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "<b>Plan</b>\n\n• <b>one</b>\n• two");
}

#[tokio::test]
async fn rejected_rich_text_falls_back_to_raw() {
    let h = harness_with(
        vec![texts(&["**bold** move"])],
        RecordingTransport::rejecting_html(),
        OrchestratorConfig::default(),
        &["key-1"],
    )
    .await;

    let outcome = h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "go")).await;
    assert!(outcome.is_persisted());

    let sent = h.transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].text, "**bold** move");
    assert_eq!(sent[0].options.parse_mode, None);
}

#[tokio::test]
async fn long_lines_are_chunked_to_the_limit() {
    let config = OrchestratorConfig {
        max_message_len: 10,
        ..OrchestratorConfig::default()
    };
    let h = harness_with(
        vec![texts(&["abcdefghijklmnopqrstuvwxy"])],
        RecordingTransport::default(),
        config,
        &["key-1"],
    )
    .await;

    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "alphabet")).await;
    let sent: Vec<String> = h.transport.sent().into_iter().map(|s| s.text).collect();
    assert_eq!(sent, vec!["abcdefghij", "klmnopqrst", "uvwxy"]);
}

#[tokio::test]
async fn blank_segments_are_not_sent() {
    let h = harness(vec![texts(&["$NEXTMESSAGE$a$NEXTMESSAGE$  $NEXTMESSAGE$b\n  "])]).await;
    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "x")).await;
    let sent: Vec<String> = h.transport.sent().into_iter().map(|s| s.text).collect();
    assert_eq!(sent, vec!["a", "b"]);
}

// ═══════════════════════════════════════════════════════════════════════
//  Inputs
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn media_and_quote_reach_the_model_and_the_store() {
    let h = harness(vec![texts(&["nice cat"])]).await;
    UserStore::new(h.db.clone())
        .find_or_create(2, "Bob")
        .await
        .unwrap();

    let mut message = inbound(PRIVATE_CHAT, 3, "look");
    message.attachments = vec![Attachment::Photo {
        file_id: "cat".into(),
    }];
    message.reply_to = Some(RepliedMessage {
        message_id: 2,
        from: Some(Sender {
            id: 2,
            first_name: "Bob".into(),
            last_name: None,
            username: None,
            is_bot: false,
        }),
        text: Some("my cat".into()),
    });

    assert!(h.orchestrator.handle(&message).await.is_persisted());

    let request = &h.backend.requests()[0];
    let parts = &request.contents.last().unwrap().parts;
    assert_eq!(parts.len(), 4);
    let (mime, bytes) = parts[1].inline_bytes().unwrap();
    assert_eq!(mime, "image/jpeg");
    assert_eq!(bytes, b"https://files.test/cat");
    assert!(parts[2].as_text().unwrap().contains("from=\"Bob\">my cat</quote>"));
    assert_eq!(parts[3].as_text(), Some("look"));

    let history = chat_history(&h.db, PRIVATE_CHAT).await;
    let user_message = &history[0];
    assert_eq!(user_message.attachments.len(), 1);
    assert_eq!(user_message.attachments[0].mime_type, "image/jpeg");
    let quote = user_message.quote.as_ref().unwrap();
    assert_eq!(quote.content, "my cat");
    assert_eq!(quote.author.as_ref().unwrap().name, "Bob");
}

#[tokio::test]
async fn unknown_chat_is_dropped_silently() {
    let h = harness(vec![texts(&["never"])]).await;
    let outcome = h.orchestrator.handle(&inbound(424242, 1, "hi")).await;
    assert!(matches!(outcome, TurnOutcome::Dropped));
    assert!(h.transport.sent().is_empty());
    assert!(h.backend.requests().is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  History
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn cached_session_carries_previous_turns() {
    let h = harness(vec![texts(&["first"]), texts(&["second"])]).await;

    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "one")).await;
    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 2, "two")).await;

    let requests = h.backend.requests();
    assert_eq!(requests[0].contents.len(), 1);
    assert_eq!(requests[1].contents.len(), 3);
    assert_eq!(requests[1].contents[1].text(), "first");
    assert_eq!(h.orchestrator.conversations().hits(), 1);
}

#[tokio::test]
async fn new_process_replays_persisted_history() {
    let h = harness(vec![texts(&["remembered"])]).await;
    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "remember this")).await;

    // A second orchestrator over the same database has an empty cache.
    let backend = Arc::new(ScriptedBackend::new(vec![texts(&["yes"])]));
    let restarted = orchestrator(
        h.db.clone(),
        Arc::new(RecordingTransport::default()),
        Arc::clone(&backend),
        &["key-1"],
        OrchestratorConfig::default(),
    );
    assert!(restarted.handle(&inbound(PRIVATE_CHAT, 2, "well?")).await.is_persisted());

    let request = &backend.requests()[0];
    assert_eq!(request.contents.len(), 3);
    let replayed_user = request.contents[0]
        .parts
        .iter()
        .filter_map(|p| p.as_text())
        .collect::<String>();
    assert!(replayed_user.ends_with("remember this"));
    assert_eq!(request.contents[1].text(), "remembered");
}

#[tokio::test]
async fn cached_session_matches_replayed_history() {
    let h = harness(vec![texts(&["hi again"]), texts(&["sure"])]).await;

    let sent_at = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
    let mut first = inbound(PRIVATE_CHAT, 1, "you said?");
    first.date = sent_at;
    first.reply_to = Some(RepliedMessage {
        message_id: 0,
        from: Some(Sender {
            id: 77,
            first_name: "swifie_bot".into(),
            last_name: None,
            username: Some("swifie_bot".into()),
            is_bot: true,
        }),
        text: Some("hello there".into()),
    });
    assert!(h.orchestrator.handle(&first).await.is_persisted());

    // Stamped before the first turn's reply was stored.
    let mut second = inbound(PRIVATE_CHAT, 2, "and now?");
    second.date = Utc.with_ymd_and_hms(2019, 6, 1, 0, 0, 0).unwrap();
    assert!(h.orchestrator.handle(&second).await.is_persisted());

    let handle = h.orchestrator.conversations().get(PRIVATE_CHAT).await.unwrap();
    let cached = handle.lock().await.history().to_vec();
    let stored = chat_history(&h.db, PRIVATE_CHAT).await;
    assert_eq!(cached, replay(&stored));

    let contents: Vec<&str> = stored.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["you said?", "hi again", "and now?", "sure"]);
    match &cached[0] {
        HistoryEntry::User(turn) => {
            assert_eq!(turn.sent_at, sent_at);
            let quote = turn.quote.as_ref().unwrap();
            assert_eq!(quote.author_name.as_deref(), Some(Persona::default().name.as_str()));
        }
        other => panic!("expected a user turn, got {other:?}"),
    }
}

#[tokio::test]
async fn reset_chat_forgets_everything() {
    let h = harness(vec![texts(&["a"]), texts(&["b"])]).await;
    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "x")).await;

    assert_eq!(h.orchestrator.reset_chat(PRIVATE_CHAT).await.unwrap(), 2);
    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 2, "y")).await;

    assert_eq!(h.backend.requests()[1].contents.len(), 1);
}

#[tokio::test]
async fn instruction_override_reaches_the_prompt() {
    let h = harness(vec![texts(&["arr"])]).await;
    h.orchestrator
        .update_instructions(PRIVATE_CHAT, "You are a pirate.")
        .await
        .unwrap();
    h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "hi")).await;

    let prompt = h.backend.requests()[0]
        .system_instruction
        .as_ref()
        .unwrap()
        .text();
    assert!(prompt.contains("You are a pirate."));
    assert!(!prompt.contains(&Persona::default().default_persona));
}

// ═══════════════════════════════════════════════════════════════════════
//  Failures
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn exhausted_pool_alerts_operators_without_calling_backend() {
    let h = harness_with(
        vec![texts(&["never"])],
        RecordingTransport::default(),
        OrchestratorConfig::default(),
        &[],
    )
    .await;

    let outcome = h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "hi")).await;
    match outcome {
        TurnOutcome::Failed { stage, error } => {
            assert_eq!(stage, TurnStage::Idle);
            assert!(error.is_capacity());
        }
        other => panic!("expected failure, got {other:?}"),
    }

    assert!(h.backend.requests().is_empty());
    let operator = h.transport.sent_to(OPERATOR);
    assert_eq!(operator.len(), 1);
    assert!(operator[0].text.contains("KEY LIMIT"));
    let user = h.transport.sent_to(PRIVATE_CHAT);
    assert_eq!(user.len(), 1);
    assert_eq!(user[0].text, OrchestratorConfig::default().apology);
    assert!(chat_history(&h.db, PRIVATE_CHAT).await.is_empty());
}

#[tokio::test]
async fn stream_failure_persists_nothing_and_invalidates_session() {
    let h = harness(vec![
        texts(&["warm up"]),
        vec![Chunk::Text("partial$NEXTMESSAGE$"), Chunk::Fail("connection reset")],
        texts(&["recovered"]),
    ])
    .await;

    h.orchestrator.handle(&inbound(GROUP_CHAT, 1, "one")).await;
    let outcome = h.orchestrator.handle(&inbound(GROUP_CHAT, 2, "two")).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            stage: TurnStage::Streaming,
            error: AgentError::LlmStreamError { .. }
        }
    ));

    let group = h.transport.sent_to(GROUP_CHAT);
    let texts: Vec<&str> = group.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(texts[1], "partial");
    assert_eq!(texts[2], OrchestratorConfig::default().apology);
    // The partial line already replied to the trigger.
    assert_eq!(group[2].options.reply_to, None);
    assert!(h.transport.sent_to(OPERATOR)[0].text.contains("connection reset"));

    assert_eq!(chat_history(&h.db, GROUP_CHAT).await.len(), 2);

    // The next turn replays only the persisted first turn.
    h.orchestrator.handle(&inbound(GROUP_CHAT, 3, "three")).await;
    assert_eq!(h.backend.requests()[2].contents.len(), 3);
}

#[tokio::test]
async fn empty_reply_is_a_failure() {
    let h = harness(vec![texts(&["  ", "\n"])]).await;
    let outcome = h.orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "hi")).await;
    assert!(matches!(outcome, TurnOutcome::Failed { .. }));
    assert!(chat_history(&h.db, PRIVATE_CHAT).await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn slow_stream_times_out() {
    let db = database().await;
    let transport = Arc::new(RecordingTransport::default());
    let backend = Arc::new(
        ScriptedBackend::new(vec![texts(&["a", "b", "c"])]).slow(Duration::from_secs(30)),
    );
    let config = OrchestratorConfig {
        turn_timeout: Duration::from_secs(45),
        ..OrchestratorConfig::default()
    };
    let orchestrator = orchestrator(db.clone(), transport, backend, &["key-1"], config);

    let outcome = orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "hi")).await;
    assert!(matches!(
        outcome,
        TurnOutcome::Failed {
            error: AgentError::Timeout { seconds: 45 },
            ..
        }
    ));
    assert!(chat_history(&db, PRIVATE_CHAT).await.is_empty());
}

// ═══════════════════════════════════════════════════════════════════════
//  Concurrency
// ═══════════════════════════════════════════════════════════════════════

#[tokio::test(start_paused = true)]
async fn same_chat_turns_do_not_interleave() {
    let db = database().await;
    let transport = Arc::new(RecordingTransport::default());
    let backend = Arc::new(
        ScriptedBackend::new(vec![texts(&["first", " reply"]), texts(&["second"])])
            .slow(Duration::from_millis(200)),
    );
    let orchestrator = orchestrator(
        db.clone(),
        transport,
        Arc::clone(&backend),
        &["key-1"],
        OrchestratorConfig::default(),
    );

    let first = inbound(PRIVATE_CHAT, 1, "one");
    let second = inbound(PRIVATE_CHAT, 2, "two");
    let (a, b) = tokio::join!(orchestrator.handle(&first), orchestrator.handle(&second));
    assert!(a.is_persisted() && b.is_persisted());

    let requests = backend.requests();
    assert_eq!(requests.len(), 2);
    assert_eq!(requests[1].contents.len(), 3);
    assert_eq!(requests[1].contents[1].text(), "first reply");

    let history = chat_history(&db, PRIVATE_CHAT).await;
    let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
    assert_eq!(contents, vec!["one", "first reply", "two", "second"]);
}

#[tokio::test(start_paused = true)]
async fn same_chat_turns_wait_out_the_key_cooldown() {
    let db = database().await;
    let backend = Arc::new(ScriptedBackend::new(vec![texts(&["a"]), texts(&["b"])]));
    let orchestrator = orchestrator_with_limits(
        db.clone(),
        Arc::new(RecordingTransport::default()),
        Arc::clone(&backend),
        &["key-1"],
        OrchestratorConfig::default(),
        PoolLimits::default(),
    );

    assert!(orchestrator.handle(&inbound(PRIVATE_CHAT, 1, "one")).await.is_persisted());
    assert!(orchestrator.handle(&inbound(PRIVATE_CHAT, 2, "two")).await.is_persisted());

    let submitted = backend.submitted();
    assert_eq!(submitted.len(), 2);
    assert!(submitted[1] - submitted[0] >= Duration::from_secs(60));
}

#[tokio::test(start_paused = true)]
async fn concurrent_chats_share_one_key_quota() {
    let db = database().await;
    let backend = Arc::new(
        ScriptedBackend::new(vec![texts(&["a"]), texts(&["b"])]).slow(Duration::from_millis(50)),
    );
    let orchestrator = orchestrator_with_limits(
        db.clone(),
        Arc::new(RecordingTransport::default()),
        Arc::clone(&backend),
        &["key-1"],
        OrchestratorConfig::default(),
        PoolLimits::default(),
    );

    let private = inbound(PRIVATE_CHAT, 1, "hi");
    let group = inbound(GROUP_CHAT, 2, "hey swifie");
    let (a, b) = tokio::join!(orchestrator.handle(&private), orchestrator.handle(&group));
    assert!(a.is_persisted() && b.is_persisted());

    let submitted = backend.submitted();
    assert_eq!(submitted.len(), 2);
    let gap = if submitted[1] > submitted[0] {
        submitted[1] - submitted[0]
    } else {
        submitted[0] - submitted[1]
    };
    assert!(gap >= Duration::from_secs(60));
}
