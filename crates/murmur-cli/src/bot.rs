//! Subcommand: `murmur bot` -- Telegram bot gateway.
//!
//! Long-polls Telegram, reassembles media groups, and feeds each chat's
//! messages in arrival order to a per-chat worker. Workers register the
//! sender, answer chat commands, and hand addressed messages to the
//! [`ReplyOrchestrator`].

use std::collections::HashMap;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use murmur_adapters::{AdapterError, MediaGroupCollector, TelegramAdapter};
use murmur_agent::{
    ChatTransport, Collaborators, ConversationStore, CredentialPool, GeminiClient, GeminiConfig,
    InboundMessage, Persona, ReplyOrchestrator, SendOptions, TurnOutcome,
};
use murmur_store::{BotState, ChatStore, UserStore};

use crate::bot_config::load_config;
use crate::helpers::{api_keys_from_env, env_non_empty, init_tracing, open_database};
use crate::messages::{Messages, keys};

/// Sessions kept in memory at once.
const MAX_CACHED_SESSIONS: u64 = 10_000;

/// A chat worker with nothing to do for this long exits.
const WORKER_IDLE: Duration = Duration::from_secs(15 * 60);

/// Pause after a failed poll.
const POLL_RETRY: Duration = Duration::from_secs(5);

/// Run the Telegram bot gateway.
pub async fn cmd_bot(config_path: &Path, poll_timeout: Option<u64>) -> Result<()> {
    init_tracing("info");
    info!("starting Telegram bot gateway");

    let config = load_config(config_path)?;
    let bot_cfg = config.bot;
    let poll_timeout = poll_timeout.unwrap_or(bot_cfg.poll_timeout);

    let messages_dir = config_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("messages");
    let msgs = Messages::load(&bot_cfg.language, &messages_dir)?;

    // Telegram.
    let bot_token = env_non_empty("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
        anyhow::anyhow!("TELEGRAM_BOT_TOKEN is required. Create a bot at https://t.me/BotFather")
    })?;
    let telegram = Arc::new(TelegramAdapter::new(bot_token)?);
    let me = telegram
        .get_me()
        .await
        .context("failed to reach Telegram API")?;

    // Gemini.
    let api_keys = api_keys_from_env();
    if api_keys.is_empty() {
        anyhow::bail!("no Gemini API key found. Set GEMINI_KEY (and optionally GEMINI_SECOND_KEY or GEMINI_KEYS)");
    }
    let key_count = api_keys.len();
    let credentials = Arc::new(CredentialPool::new(api_keys, bot_cfg.pool_limits()));
    let backend = Arc::new(
        GeminiClient::new(GeminiConfig::new(bot_cfg.model.clone()))
            .context("failed to create Gemini client")?,
    );

    let db = open_database(&bot_cfg.database).await?;

    let persona: Persona = config.persona.into();
    let persona_name = persona.name.clone();
    let transport: Arc<dyn ChatTransport> = telegram.clone();
    let orchestrator = Arc::new(ReplyOrchestrator::new(
        Collaborators {
            transport,
            backend,
            credentials,
            conversations: ConversationStore::new(MAX_CACHED_SESSIONS, bot_cfg.session_idle()),
            database: db.clone(),
        },
        persona,
        bot_cfg.pacer(),
        bot_cfg.orchestrator_config(msgs.get(keys::ERROR_GENERAL)),
    ));

    let ctx = Arc::new(GatewayContext {
        telegram: Arc::clone(&telegram),
        orchestrator,
        users: UserStore::new(db.clone()),
        chats: ChatStore::new(db.clone()),
        messages: msgs,
        bot_id: me.id,
        bot_username: me.username.clone(),
        persona_name,
        trigger: bot_cfg.trigger_pattern()?,
    });

    let bot_name = me.username.as_deref().unwrap_or(&me.first_name);
    println!();
    println!("  murmur Telegram gateway v{}", env!("CARGO_PKG_VERSION"));
    println!("  Bot: @{bot_name}");
    println!("  Model: {}", bot_cfg.model);
    println!("  API keys: {key_count}");
    println!("  Database: {}", bot_cfg.database.display());
    println!("  Long-poll timeout: {poll_timeout}s");
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    // Polling runs in its own task so media-group deadlines fire while a
    // long poll is outstanding.
    let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel();
    let poller = tokio::spawn(poll_updates(
        Arc::clone(&telegram),
        BotState::new(db),
        poll_timeout,
        inbound_tx,
    ));

    let mut collector = MediaGroupCollector::new(bot_cfg.media_group_wait());
    let (idle_tx, mut idle_rx) = mpsc::unbounded_channel();
    let handler = move |message: InboundMessage| {
        let ctx = Arc::clone(&ctx);
        async move { process(&ctx, &message).await }
    };
    let mut dispatcher = Dispatcher::new(handler, WORKER_IDLE, idle_tx);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        let deadline = collector.next_deadline();
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown requested");
                break;
            }
            maybe = inbound_rx.recv() => {
                let Some(message) = maybe else {
                    warn!("update poller stopped");
                    break;
                };
                if message.forwarded {
                    debug!(chat_id = message.chat.id, "ignoring forwarded message");
                    continue;
                }
                if let Some(message) = collector.push(message) {
                    dispatcher.dispatch(message);
                }
            }
            _ = sleep_until(deadline) => {
                for message in collector.drain_ready() {
                    dispatcher.dispatch(message);
                }
            }
            Some(chat_id) = idle_rx.recv() => dispatcher.retire(chat_id),
        }
    }

    poller.abort();
    info!(workers = dispatcher.len(), "gateway stopped");
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ---------------------------------------------------------------------------
// Polling
// ---------------------------------------------------------------------------

async fn poll_updates(
    telegram: Arc<TelegramAdapter>,
    state: BotState,
    poll_timeout: u64,
    tx: mpsc::UnboundedSender<InboundMessage>,
) {
    let mut offset = match state.polling_offset().await {
        Ok(Some(offset)) => {
            info!(offset, "restored Telegram polling offset from database");
            Some(offset)
        }
        Ok(None) => None,
        Err(e) => {
            warn!(error = %e, "failed to read polling offset");
            None
        }
    };

    loop {
        let updates = match telegram.get_updates(offset, poll_timeout).await {
            Ok(updates) => updates,
            Err(e) => {
                let pause = match &e {
                    AdapterError::Api {
                        retry_after: Some(secs),
                        ..
                    } => Duration::from_secs(*secs),
                    _ => POLL_RETRY,
                };
                warn!(error = %e, retry_in = ?pause, "Telegram poll failed");
                tokio::time::sleep(pause).await;
                continue;
            }
        };

        for update in updates {
            let next = update.update_id + 1;
            offset = Some(next);
            // Persist so messages are not reprocessed after a restart.
            if let Err(e) = state.set_polling_offset(next).await {
                warn!(error = %e, "failed to persist polling offset");
            }
            if let Some(message) = update.into_message()
                && tx.send(message).is_err()
            {
                return;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Per-chat dispatch
// ---------------------------------------------------------------------------

struct GatewayContext {
    telegram: Arc<TelegramAdapter>,
    orchestrator: Arc<ReplyOrchestrator>,
    users: UserStore,
    chats: ChatStore,
    messages: Messages,
    bot_id: i64,
    bot_username: Option<String>,
    persona_name: String,
    trigger: Option<Regex>,
}

struct Worker {
    tx: mpsc::UnboundedSender<InboundMessage>,
    task: JoinHandle<()>,
}

/// Routes messages to one FIFO worker task per chat.
///
/// An idle worker asks to be retired over `idle_tx` instead of closing its
/// own queue. Only the dispatcher removes a worker, so a message is either
/// queued to the old worker or goes to a successor, and a successor does not
/// start until its predecessor has finished.
struct Dispatcher<H> {
    handler: H,
    idle_after: Duration,
    idle_tx: mpsc::UnboundedSender<i64>,
    workers: HashMap<i64, Worker>,
    /// Retired workers that may still be draining their queue.
    retiring: HashMap<i64, JoinHandle<()>>,
}

impl<H, Fut> Dispatcher<H>
where
    H: Fn(InboundMessage) -> Fut + Clone + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn new(handler: H, idle_after: Duration, idle_tx: mpsc::UnboundedSender<i64>) -> Self {
        Self {
            handler,
            idle_after,
            idle_tx,
            workers: HashMap::new(),
            retiring: HashMap::new(),
        }
    }

    fn len(&self) -> usize {
        self.workers.len()
    }

    fn dispatch(&mut self, message: InboundMessage) {
        let chat_id = message.chat.id;
        let message = match self.workers.get(&chat_id) {
            Some(worker) => match worker.tx.send(message) {
                Ok(()) => return,
                // The worker died; its successor takes over.
                Err(mpsc::error::SendError(message)) => message,
            },
            None => message,
        };

        let previous = match self.workers.remove(&chat_id) {
            Some(worker) => Some(worker.task),
            None => self.retiring.remove(&chat_id),
        };
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(chat_worker(
            self.handler.clone(),
            chat_id,
            rx,
            self.idle_after,
            self.idle_tx.clone(),
            previous,
        ));
        // The receiver is alive: it was just handed to the worker.
        let _ = tx.send(message);
        self.workers.insert(chat_id, Worker { tx, task });
    }

    /// Drop the chat's queue so its worker exits once the queue is drained.
    fn retire(&mut self, chat_id: i64) {
        let Some(worker) = self.workers.remove(&chat_id) else {
            return;
        };
        debug!(chat_id, "retiring idle chat worker");
        self.retiring.retain(|_, task| !task.is_finished());
        self.retiring.insert(chat_id, worker.task);
    }
}

async fn chat_worker<H, Fut>(
    handler: H,
    chat_id: i64,
    mut rx: mpsc::UnboundedReceiver<InboundMessage>,
    idle_after: Duration,
    idle_tx: mpsc::UnboundedSender<i64>,
    previous: Option<JoinHandle<()>>,
) where
    H: Fn(InboundMessage) -> Fut,
    Fut: Future<Output = ()>,
{
    if let Some(previous) = previous {
        if let Err(e) = previous.await {
            warn!(chat_id, error = %e, "previous chat worker failed");
        }
    }
    debug!(chat_id, "chat worker started");

    let mut idle_reported = false;
    loop {
        let next = if idle_reported {
            rx.recv().await
        } else {
            match tokio::time::timeout(idle_after, rx.recv()).await {
                Ok(next) => next,
                Err(_) => {
                    idle_reported = idle_tx.send(chat_id).is_ok();
                    if !idle_reported {
                        break;
                    }
                    continue;
                }
            }
        };
        match next {
            Some(message) => handler(message).await,
            None => break,
        }
    }
    debug!(chat_id, "chat worker stopped");
}

async fn process(ctx: &GatewayContext, message: &InboundMessage) {
    if let Err(e) = process_inner(ctx, message).await {
        error!(chat_id = message.chat.id, error = %e, "failed to process message");
    }
}

async fn process_inner(ctx: &GatewayContext, message: &InboundMessage) -> Result<()> {
    let chat_id = message.chat.id;
    ctx.users
        .find_or_create(message.from.id, &message.from.display_name())
        .await?;
    ctx.chats.find_or_create(chat_id).await?;

    if let Some(command) = parse_command(message.text(), ctx.bot_username.as_deref()) {
        info!(chat_id, user_id = message.from.id, ?command, "chat command");
        let reply = run_command(ctx, chat_id, command).await?;
        let options = SendOptions::plain()
            .replying_to((!message.is_private()).then_some(message.message_id));
        ctx.telegram.send_message(chat_id, &reply, &options).await?;
        return Ok(());
    }

    if !is_addressed(message, ctx.bot_id, ctx.trigger.as_ref()) {
        return Ok(());
    }

    match ctx.orchestrator.handle(message).await {
        TurnOutcome::Persisted { sent, .. } => debug!(chat_id, sent, "reply delivered"),
        TurnOutcome::Dropped => debug!(chat_id, "turn dropped"),
        TurnOutcome::Failed { stage, .. } => warn!(chat_id, %stage, "turn failed"),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Commands
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Command<'a> {
    Start,
    Clear,
    Prompt(&'a str),
}

/// Parse `/start`, `/clear` and `/prompt [text]`, accepting the
/// `/cmd@botname` form only when it names this bot.
fn parse_command<'a>(text: &'a str, bot_username: Option<&str>) -> Option<Command<'a>> {
    let rest = text.trim_start().strip_prefix('/')?;
    let (head, args) = match rest.find(char::is_whitespace) {
        Some(i) => (&rest[..i], rest[i..].trim()),
        None => (rest, ""),
    };
    let name = match head.split_once('@') {
        Some((name, target)) => {
            let ours = bot_username.is_some_and(|u| u.eq_ignore_ascii_case(target));
            if !ours {
                return None;
            }
            name
        }
        None => head,
    };
    match name.to_ascii_lowercase().as_str() {
        "start" => Some(Command::Start),
        "clear" => Some(Command::Clear),
        "prompt" => Some(Command::Prompt(args)),
        _ => None,
    }
}

async fn run_command(ctx: &GatewayContext, chat_id: i64, command: Command<'_>) -> Result<String> {
    let msgs = &ctx.messages;
    let reply = match command {
        Command::Start => msgs.get_with(keys::GREETING, &[("name", &ctx.persona_name)]),
        Command::Clear => {
            ctx.orchestrator.reset_chat(chat_id).await?;
            msgs.get(keys::CLEARED)
        }
        Command::Prompt("") => {
            let chat = ctx.chats.find_or_create(chat_id).await?;
            match chat.instructions() {
                Some(prompt) => msgs.get_with(keys::PROMPT_CURRENT, &[("prompt", prompt)]),
                None => msgs.get(keys::PROMPT_DEFAULT),
            }
        }
        Command::Prompt(text) if text.eq_ignore_ascii_case("reset") => {
            ctx.orchestrator.update_instructions(chat_id, "").await?;
            msgs.get(keys::PROMPT_RESET)
        }
        Command::Prompt(text) => {
            ctx.orchestrator.update_instructions(chat_id, text).await?;
            msgs.get(keys::PROMPT_UPDATED)
        }
    };
    Ok(reply)
}

// ---------------------------------------------------------------------------
// Trigger rule
// ---------------------------------------------------------------------------

/// Whether the bot should answer: private chats always, groups when the
/// message replies to the bot or mentions a trigger name.
fn is_addressed(message: &InboundMessage, bot_id: i64, trigger: Option<&Regex>) -> bool {
    if message.is_private() {
        return true;
    }
    let replies_to_bot = message
        .reply_to
        .as_ref()
        .and_then(|r| r.from.as_ref())
        .is_some_and(|from| from.id == bot_id);
    replies_to_bot || trigger.is_some_and(|re| re.is_match(message.text()))
}
