//! New-ad notifications.
//!
//! Ingestion only enqueues; a dispatcher task hands each notification to
//! the `Notifier` on its own task, so a slow or failing recipient never
//! holds up a crawl or another recipient.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::models::SubscriberId;

/// Delivery side of notifications (chat bot, mail, ...)
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(
        &self,
        recipient: SubscriberId,
        text: &str,
        image_url: Option<&str>,
    ) -> anyhow::Result<()>;
}

/// Notifier that only writes the message to the log
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send(
        &self,
        recipient: SubscriberId,
        text: &str,
        image_url: Option<&str>,
    ) -> anyhow::Result<()> {
        info!(%recipient, text, image_url, "New ad");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub recipient: SubscriberId,
    pub text: String,
    pub image_url: Option<String>,
}

/// Sending half of the notification channel
#[derive(Debug, Clone)]
pub struct NotificationQueue {
    tx: mpsc::UnboundedSender<Notification>,
}

impl NotificationQueue {
    /// Queue plus the raw receiving end, for callers that drain it themselves
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Notification>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Queue whose notifications are delivered through `notifier` by a
    /// background task. The task ends once every queue clone is dropped.
    pub fn spawn(notifier: Arc<dyn Notifier>) -> (Self, JoinHandle<()>) {
        let (queue, rx) = Self::channel();
        let handle = tokio::spawn(dispatch(notifier, rx));
        (queue, handle)
    }

    /// Fire and forget
    pub fn enqueue(&self, notification: Notification) {
        if let Err(err) = self.tx.send(notification) {
            warn!(recipient = %err.0.recipient, "Notification dropped, dispatcher is gone");
        }
    }
}

async fn dispatch(notifier: Arc<dyn Notifier>, mut rx: mpsc::UnboundedReceiver<Notification>) {
    let mut in_flight = tokio::task::JoinSet::new();

    while let Some(notification) = rx.recv().await {
        let notifier = Arc::clone(&notifier);
        in_flight.spawn(async move {
            let Notification {
                recipient,
                text,
                image_url,
            } = notification;
            if let Err(err) = notifier.send(recipient, &text, image_url.as_deref()).await {
                warn!(%recipient, error = %err, "Failed to deliver notification");
            }
        });

        // reap finished sends so the set does not grow with the backlog
        while in_flight.try_join_next().is_some() {}
    }

    while in_flight.join_next().await.is_some() {}
    debug!("Notification dispatcher stopped");
}
