//! Reassembly of Telegram media groups.
//!
//! An album arrives as one update per item, all sharing a
//! `media_group_id`. The collector folds siblings into the first message and
//! releases the merged message once no sibling has arrived for the quiet
//! period. Later messages from a chat with an album still held wait behind
//! it, so each chat's messages leave in arrival order.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use murmur_agent::InboundMessage;
use tokio::time::Instant;
use tracing::debug;

#[derive(Debug)]
enum Held {
    Group {
        id: String,
        message: InboundMessage,
        last_seen: Instant,
    },
    Plain(InboundMessage),
}

#[derive(Debug)]
pub struct MediaGroupCollector {
    quiet: Duration,
    /// Per chat, in arrival order. A queue is never empty and always starts
    /// with a group.
    pending: HashMap<i64, VecDeque<Held>>,
}

impl MediaGroupCollector {
    pub fn new(quiet: Duration) -> Self {
        Self {
            quiet,
            pending: HashMap::new(),
        }
    }

    /// Accept a message. A message outside any media group is returned
    /// straight back unless its chat has an album held; everything else is
    /// held.
    pub fn push(&mut self, message: InboundMessage) -> Option<InboundMessage> {
        self.push_at(message, Instant::now())
    }

    pub fn push_at(&mut self, message: InboundMessage, now: Instant) -> Option<InboundMessage> {
        let chat_id = message.chat.id;
        let Some(group_id) = message.media_group_id.clone() else {
            return match self.pending.get_mut(&chat_id) {
                Some(queue) => {
                    debug!(chat_id, message_id = message.message_id, "queued behind media group");
                    queue.push_back(Held::Plain(message));
                    None
                }
                None => Some(message),
            };
        };

        let queue = self.pending.entry(chat_id).or_default();
        let sibling = queue.iter_mut().find_map(|held| match held {
            Held::Group {
                id,
                message,
                last_seen,
            } if *id == group_id => Some((message, last_seen)),
            _ => None,
        });
        match sibling {
            Some((group, last_seen)) => {
                group.absorb(message);
                *last_seen = now;
                debug!(group_id = %group_id, items = group.attachments.len(), "media group grew");
            }
            None => queue.push_back(Held::Group {
                id: group_id,
                message,
                last_seen: now,
            }),
        }
        None
    }

    /// Remove and return every message that may be dispatched now: quiet
    /// groups and whatever was queued behind them, per chat in arrival order.
    pub fn drain_ready(&mut self) -> Vec<InboundMessage> {
        self.drain_ready_at(Instant::now())
    }

    pub fn drain_ready_at(&mut self, now: Instant) -> Vec<InboundMessage> {
        let quiet = self.quiet;
        let mut ready = Vec::new();
        for queue in self.pending.values_mut() {
            while let Some(front) = queue.front() {
                let waiting = matches!(
                    front,
                    Held::Group { last_seen, .. } if now.duration_since(*last_seen) < quiet
                );
                if waiting {
                    break;
                }
                match queue.pop_front() {
                    Some(Held::Group { message, .. } | Held::Plain(message)) => {
                        ready.push(message)
                    }
                    None => break,
                }
            }
        }
        self.pending.retain(|_, queue| !queue.is_empty());
        ready
    }

    /// When the next held message becomes ready, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.pending
            .values()
            .filter_map(|queue| match queue.front() {
                Some(Held::Group { last_seen, .. }) => Some(*last_seen + self.quiet),
                _ => None,
            })
            .min()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
