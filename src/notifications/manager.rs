//! Notification hub for broadcasting engine events.

use crossbeam_channel::{bounded, Sender};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use super::types::{
    DropReason, Notification, NotificationConfig, NotificationHandle, SubscriptionId,
};

/// One subscriber: its filter and the sending half of its channel.
struct Subscription {
    config: NotificationConfig,
    sender: Sender<Notification>,
}

impl Subscription {
    /// Try to send. Returns false if the buffer is full or the receiver is gone.
    fn try_send(&self, notification: Notification) -> bool {
        self.sender.try_send(notification).is_ok()
    }
}

/// Fans engine notifications out to subscribers.
pub struct NotificationHub {
    /// Live subscribers.
    subscriptions: RwLock<HashMap<SubscriptionId, Subscription>>,
    next_id: AtomicU64,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self {
            subscriptions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a subscriber with its own bounded buffer.
    pub fn subscribe(&self, config: NotificationConfig) -> NotificationHandle {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, receiver) = bounded(config.buffer_size.max(1));

        self.subscriptions
            .write()
            .insert(id, Subscription { config, sender });

        NotificationHandle { id, receiver }
    }

    /// Remove a subscriber, sending it a final `Dropped` notice.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        if let Some(sub) = self.subscriptions.write().remove(&id) {
            let _ = sub.sender.try_send(Notification::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Drop every subscription, telling each why.
    pub fn close_all(&self, reason: DropReason) {
        let mut subs = self.subscriptions.write();
        for (_, sub) in subs.drain() {
            let _ = sub.sender.try_send(Notification::Dropped { reason });
        }
    }

    pub fn subscription_count(&self) -> usize {
        self.subscriptions.read().len()
    }

    /// Send to every matching subscriber. Subscribers that can't take the
    /// notification are dropped.
    pub fn broadcast(&self, notification: Notification) {
        let mut to_remove = Vec::new();

        {
            let subs = self.subscriptions.read();
            for (id, sub) in subs.iter() {
                if sub.config.filter.matches(&notification)
                    && !sub.try_send(notification.clone())
                {
                    to_remove.push(*id);
                }
            }
        }

        if !to_remove.is_empty() {
            let mut subs = self.subscriptions.write();
            for id in to_remove {
                if let Some(sub) = subs.remove(&id) {
                    tracing::debug!(subscription = id.0, "dropping slow notification subscriber");
                    let _ = sub.sender.try_send(Notification::Dropped {
                        reason: DropReason::BufferOverflow,
                    });
                }
            }
        }
    }
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new()
    }
}
