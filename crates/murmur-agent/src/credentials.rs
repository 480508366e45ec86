//! Rotating pool of generative API keys.
//!
//! Keys are handed out least-recently-used first, skipping any key that has
//! reached its lifetime query cap. Each key also has a rolling cooldown
//! window with a small per-window quota; callers reserve a request with
//! [`CredentialPool::wait_and_reserve`] before submitting, which waits out
//! the cooldown if the window is full.
//!
//! Counters live only in memory. A restart resets them, which is acceptable
//! because the cap is advisory.

use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{AgentError, Result};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Usage limits applied to every key in the pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolLimits {
    /// Lifetime queries per key before it is retired.
    pub query_cap: u64,
    /// Length of the rolling cooldown window.
    pub window: Duration,
    /// Queries allowed per key within one window.
    pub window_quota: u32,
}

impl Default for PoolLimits {
    fn default() -> Self {
        Self {
            query_cap: 1000,
            window: Duration::from_secs(60),
            window_quota: 1,
        }
    }
}

// ---------------------------------------------------------------------------
// Keys
// ---------------------------------------------------------------------------

/// A secret API key. `Debug` never prints the secret.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(Arc<str>);

impl ApiKey {
    pub fn expose(&self) -> &str {
        &self.0
    }

    /// Last four characters, for log lines.
    pub fn hint(&self) -> String {
        let chars: Vec<char> = self.0.chars().collect();
        let tail: String = chars[chars.len().saturating_sub(4)..].iter().collect();
        format!("…{tail}")
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ApiKey").field(&self.hint()).finish()
    }
}

/// A key selected by [`CredentialPool::acquire`].
#[derive(Debug, Clone)]
pub struct KeyLease {
    index: usize,
    key: ApiKey,
}

impl KeyLease {
    pub fn key(&self) -> &ApiKey {
        &self.key
    }
}

/// Result of asking the pool to count one request against a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The request was counted and may be sent now.
    Reserved,
    /// The key's window is full for this long.
    Wait(Duration),
    /// The key reached its lifetime cap.
    Exhausted,
}

/// Point-in-time usage of one key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyUsage {
    pub hint: String,
    pub total_queries: u64,
    pub current_queries: u32,
    pub last_query: Option<Instant>,
}

#[derive(Debug)]
struct Slot {
    key: ApiKey,
    total_queries: u64,
    current_queries: u32,
    last_query: Option<Instant>,
}

// ---------------------------------------------------------------------------
// Pool
// ---------------------------------------------------------------------------

/// Shared pool of API keys. Counter updates happen under one mutex that is
/// never held across an `.await`.
#[derive(Debug)]
pub struct CredentialPool {
    slots: Mutex<Vec<Slot>>,
    limits: PoolLimits,
}

impl CredentialPool {
    /// Build a pool from raw key strings. Blank and duplicate keys are
    /// dropped.
    pub fn new(keys: impl IntoIterator<Item = String>, limits: PoolLimits) -> Self {
        let mut slots: Vec<Slot> = Vec::new();
        for key in keys {
            let key = key.trim();
            if key.is_empty() || slots.iter().any(|s| s.key.expose() == key) {
                continue;
            }
            slots.push(Slot {
                key: ApiKey(Arc::from(key)),
                total_queries: 0,
                current_queries: 0,
                last_query: None,
            });
        }
        info!(keys = slots.len(), cap = limits.query_cap, "credential pool ready");
        Self {
            slots: Mutex::new(slots),
            limits,
        }
    }

    pub fn limits(&self) -> PoolLimits {
        self.limits
    }

    pub fn len(&self) -> usize {
        self.slots().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The least recently used key still under the lifetime cap, or `None`
    /// when every key is exhausted. Never-used keys come first.
    pub fn acquire(&self) -> Option<KeyLease> {
        let slots = self.slots();
        let lease = slots
            .iter()
            .enumerate()
            .filter(|(_, s)| s.total_queries < self.limits.query_cap)
            .min_by_key(|(_, s)| s.last_query)
            .map(|(index, s)| KeyLease {
                index,
                key: s.key.clone(),
            });
        match &lease {
            Some(lease) => debug!(key = %lease.key.hint(), "credential acquired"),
            None => warn!("credential pool exhausted"),
        }
        lease
    }

    /// Check the leased key's quota and, if it has room, count one request
    /// against it. The check and the update happen under one lock, so two
    /// callers can never both take the last slot of a window.
    pub fn try_reserve(&self, lease: &KeyLease) -> Admission {
        self.try_reserve_at(lease, Instant::now())
    }

    pub fn try_reserve_at(&self, lease: &KeyLease, now: Instant) -> Admission {
        let limits = self.limits;
        let mut slots = self.slots();
        let Some(slot) = slots.get_mut(lease.index) else {
            return Admission::Exhausted;
        };
        if slot.total_queries >= limits.query_cap {
            return Admission::Exhausted;
        }

        let current = match slot.last_query {
            Some(last) if now < last + limits.window => {
                if slot.current_queries >= limits.window_quota {
                    return Admission::Wait(last + limits.window - now);
                }
                slot.current_queries
            }
            _ => 0,
        };

        slot.total_queries += 1;
        slot.current_queries = current + 1;
        slot.last_query = Some(now);
        if slot.total_queries >= limits.query_cap {
            warn!(key = %slot.key.hint(), "credential reached its query cap");
        }
        Admission::Reserved
    }

    /// Sleep until the leased key has room in its window, then reserve one
    /// request on it. Fails if the key hit its lifetime cap meanwhile.
    pub async fn wait_and_reserve(&self, lease: &KeyLease) -> Result<()> {
        loop {
            match self.try_reserve(lease) {
                Admission::Reserved => return Ok(()),
                Admission::Wait(delay) => {
                    debug!(key = %lease.key.hint(), delay_ms = delay.as_millis() as u64, "throttling");
                    tokio::time::sleep(delay).await;
                }
                Admission::Exhausted => return Err(AgentError::CapacityExhausted),
            }
        }
    }

    /// Usage of every key, in pool order.
    pub fn usage(&self) -> Vec<KeyUsage> {
        self.slots()
            .iter()
            .map(|s| KeyUsage {
                hint: s.key.hint(),
                total_queries: s.total_queries,
                current_queries: s.current_queries,
                last_query: s.last_query,
            })
            .collect()
    }

    fn slots(&self) -> MutexGuard<'_, Vec<Slot>> {
        // Counters stay meaningful after a panic elsewhere; keep serving.
        self.slots.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
