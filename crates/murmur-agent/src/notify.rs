//! Operator notifications.
//!
//! Capacity exhaustion and failed turns are reported to every user with the
//! developer role or above, plus any statically configured ids.

use std::sync::Arc;

use murmur_store::UserStore;
use tracing::{error, warn};

use crate::render::{chunk, escape_html};
use crate::transport::{ChatTransport, SendOptions};

/// Room left for the `<pre>` wrapper and entity expansion.
const MAX_REPORT_CHARS: usize = 3500;

#[derive(Clone)]
pub struct OperatorNotifier {
    users: UserStore,
    transport: Arc<dyn ChatTransport>,
    extra: Vec<i64>,
}

impl OperatorNotifier {
    pub fn new(users: UserStore, transport: Arc<dyn ChatTransport>, extra: Vec<i64>) -> Self {
        Self {
            users,
            transport,
            extra,
        }
    }

    /// Telegram ids of everyone who should be notified.
    pub async fn recipients(&self) -> Vec<i64> {
        let mut ids = match self.users.list_developers().await {
            Ok(users) => users.into_iter().map(|u| u.telegram_id).collect(),
            Err(e) => {
                error!(error = %e, "cannot list operators");
                Vec::new()
            }
        };
        for id in &self.extra {
            if !ids.contains(id) {
                ids.push(*id);
            }
        }
        ids
    }

    /// Send `report` to every operator, split into as many `<pre>` blocks as
    /// it needs. Delivery failures are logged and otherwise ignored.
    pub async fn notify(&self, report: &str) {
        let recipients = self.recipients().await;
        if recipients.is_empty() {
            warn!("no operators to notify");
            return;
        }
        let parts: Vec<String> = chunk(report, MAX_REPORT_CHARS)
            .iter()
            .map(|part| format!("<pre>{}</pre>", escape_html(part)))
            .collect();

        for chat_id in recipients {
            for text in &parts {
                if let Err(e) = self
                    .transport
                    .send_text(chat_id, text, &SendOptions::html())
                    .await
                {
                    warn!(chat_id, error = %e, "operator notification failed");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use murmur_store::{Database, UserRole};

    use super::*;
    use crate::error::{AgentError, Result};
    use crate::transport::ChatMember;

    #[derive(Default)]
    struct Outbox {
        sent: Mutex<Vec<(i64, String)>>,
    }

    #[async_trait]
    impl ChatTransport for Outbox {
        async fn send_text(&self, chat_id: i64, text: &str, _: &SendOptions) -> Result<i64> {
            if chat_id == 666 {
                return Err(AgentError::transport("blocked"));
            }
            self.sent.lock().unwrap().push((chat_id, text.to_owned()));
            Ok(1)
        }
        async fn send_typing(&self, _: i64) -> Result<()> {
            Ok(())
        }
        async fn file_url(&self, _: &str) -> Result<String> {
            Ok(String::new())
        }
        async fn download(&self, _: &str) -> Result<Vec<u8>> {
            Ok(Vec::new())
        }
        async fn chat_administrators(&self, _: i64) -> Result<Vec<ChatMember>> {
            Ok(Vec::new())
        }
        async fn chat_member_count(&self, _: i64) -> Result<u32> {
            Ok(0)
        }
    }

    #[tokio::test]
    async fn developers_and_extra_ids_are_notified() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let users = UserStore::new(db);
        users.find_or_create(1, "plain").await.unwrap();
        users.find_or_create(2, "dev").await.unwrap();
        users.set_role(2, UserRole::Developer).await.unwrap();
        users.find_or_create(666, "gone").await.unwrap();
        users.set_role(666, UserRole::Admin).await.unwrap();

        let outbox = Arc::new(Outbox::default());
        let notifier = OperatorNotifier::new(users, outbox.clone(), vec![2, 3]);
        assert_eq!(notifier.recipients().await.len(), 3);

        notifier.notify("a < b").await;
        let sent = outbox.sent.lock().unwrap().clone();
        let ids: Vec<i64> = sent.iter().map(|(id, _)| *id).collect();
        assert!(ids.contains(&2) && ids.contains(&3));
        assert!(!ids.contains(&1));
        assert_eq!(sent[0].1, "<pre>a &lt; b</pre>");
    }

    #[tokio::test]
    async fn long_reports_are_sent_in_full() {
        let db = Database::open_in_memory().unwrap();
        db.run_migrations().await.unwrap();
        let outbox = Arc::new(Outbox::default());
        let notifier = OperatorNotifier::new(UserStore::new(db), outbox.clone(), vec![7]);

        let report = format!("{}{}", "a".repeat(MAX_REPORT_CHARS), "b".repeat(100));
        notifier.notify(&report).await;

        let sent = outbox.sent.lock().unwrap().clone();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|(id, _)| *id == 7));
        assert_eq!(sent[0].1, format!("<pre>{}</pre>", "a".repeat(MAX_REPORT_CHARS)));
        assert_eq!(sent[1].1, format!("<pre>{}</pre>", "b".repeat(100)));
    }
}
