//! Human-like pacing: typing indicator and per-character send delay.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::transport::ChatTransport;

// ---------------------------------------------------------------------------
// Latency
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacer {
    pub min_char_delay: Duration,
    pub max_char_delay: Duration,
}

impl Pacer {
    pub fn new(min_char_delay: Duration, max_char_delay: Duration) -> Self {
        let (min, max) = if min_char_delay <= max_char_delay {
            (min_char_delay, max_char_delay)
        } else {
            (max_char_delay, min_char_delay)
        };
        Self {
            min_char_delay: min,
            max_char_delay: max,
        }
    }

    /// No delay at all. Used by tests and batch tooling.
    pub fn instant() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Delay for `text_len` characters: a per-character delay drawn
    /// uniformly from `[min, max]`, times the length.
    pub fn delay_for(&self, text_len: usize) -> Duration {
        let min = self.min_char_delay.as_micros() as u64;
        let max = self.max_char_delay.as_micros() as u64;
        let per_char = if min == max {
            min
        } else {
            rand::thread_rng().gen_range(min..=max)
        };
        Duration::from_micros(per_char.saturating_mul(text_len as u64))
    }

    pub async fn simulate_latency(&self, text_len: usize) {
        let delay = self.delay_for(text_len);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for Pacer {
    fn default() -> Self {
        Self::new(Duration::from_millis(30), Duration::from_millis(60))
    }
}

// ---------------------------------------------------------------------------
// Typing indicator
// ---------------------------------------------------------------------------

/// Starts repeating typing indicators for a chat.
#[derive(Clone)]
pub struct TypingIndicator {
    transport: Arc<dyn ChatTransport>,
    interval: Duration,
}

impl TypingIndicator {
    pub fn new(transport: Arc<dyn ChatTransport>, interval: Duration) -> Self {
        Self {
            transport,
            interval,
        }
    }

    /// Signal "typing" now and every `interval` until the returned guard is
    /// stopped or dropped.
    pub fn begin(&self, chat_id: i64) -> TypingGuard {
        let token = CancellationToken::new();
        let child = token.child_token();
        let transport = Arc::clone(&self.transport);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    result = transport.send_typing(chat_id) => {
                        if let Err(e) = result {
                            debug!(chat_id, error = %e, "typing indicator failed");
                        }
                    }
                }
                tokio::select! {
                    biased;
                    _ = child.cancelled() => break,
                    _ = tokio::time::sleep(interval) => {}
                }
            }
        });

        TypingGuard {
            token,
            task: Some(task),
        }
    }
}

/// Keeps a typing indicator alive. Dropping the guard stops it.
#[derive(Debug)]
pub struct TypingGuard {
    token: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl TypingGuard {
    /// Stop the indicator and wait for the background task to exit.
    /// Calling it again is a no-op.
    pub async fn stop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl Drop for TypingGuard {
    fn drop(&mut self) {
        self.token.cancel();
    }
}
