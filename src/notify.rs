//! Notification Bus: per-connection queues of topic-change events. One
//! [`NotificationBus`] is shared by the [`crate::index::Index`] (the
//! producer, on behalf of whichever connection posted) and every live
//! connection (each a single consumer of its own queue).

use crate::topic::Topic;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

/// Registry of live connections' notification queues, keyed by a
/// monotonically increasing connection id so iteration order is stable.
/// A plain mutex-protected ordered map is sufficient here —
/// contention is a registration/deregistration per connection lifetime,
/// not a per-message hot path.
pub struct NotificationBus {
    next_id: AtomicU64,
    senders: Mutex<BTreeMap<u64, UnboundedSender<Arc<Topic>>>>,
}

/// A connection's handle into the bus — a connection id and the receiving
/// half of its unbounded queue. Dropping it does not auto-deregister; call
/// [`NotificationBus::deregister`] explicitly so the id keeps meaning
/// "currently live" for as long as the caller needs it (e.g. the
/// Listener's own connection set).
pub struct Subscription {
    pub id: u64,
    pub receiver: UnboundedReceiver<Arc<Topic>>,
}

impl NotificationBus {
    pub fn new() -> Self {
        NotificationBus {
            next_id: AtomicU64::new(0),
            senders: Mutex::new(BTreeMap::new()),
        }
    }

    /// Register a new connection and return its queue's receiving half.
    pub fn register(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.senders.lock().unwrap().insert(id, tx);
        Subscription { id, receiver: rx }
    }

    /// Remove a connection's queue. Safe to call more than once.
    pub fn deregister(&self, id: u64) {
        self.senders.lock().unwrap().remove(&id);
    }

    /// Hand `updated` to every currently registered connection. Never
    /// drops a notification for a live connection; a send that
    /// fails only happens for a receiver that is being torn down
    /// concurrently, which is fine to ignore since that connection is on
    /// its way out anyway.
    pub fn broadcast(&self, updated: Arc<Topic>) {
        let senders = self.senders.lock().unwrap();
        for tx in senders.values() {
            let _ = tx.send(updated.clone());
        }
    }
}

impl Default for NotificationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain whatever is currently queued, deduplicating by topic name and
/// keeping the entry with the greatest `latest` per name, then
/// sorted descending by `latest` ready for the `N` response line.
pub fn drain(receiver: &mut UnboundedReceiver<Arc<Topic>>) -> Vec<Arc<Topic>> {
    let mut by_name: BTreeMap<String, Arc<Topic>> = BTreeMap::new();
    while let Ok(topic) = receiver.try_recv() {
        by_name
            .entry(topic.name.clone())
            .and_modify(|existing| {
                if topic.latest > existing.latest {
                    *existing = topic.clone();
                }
            })
            .or_insert(topic);
    }
    let mut out: Vec<Arc<Topic>> = by_name.into_values().collect();
    out.sort_by(|a, b| b.latest.cmp(&a.latest));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn topic(name: &str, latest: u64) -> Arc<Topic> {
        Arc::new(Topic {
            name: name.to_owned(),
            dir: PathBuf::new(),
            messages: Vec::new(),
            latest,
        })
    }

    #[test]
    fn broadcast_reaches_every_registered_connection() {
        let bus = NotificationBus::new();
        let mut a = bus.register();
        let mut b = bus.register();

        bus.broadcast(topic("hello", 1000));

        assert_eq!(drain(&mut a.receiver).len(), 1);
        assert_eq!(drain(&mut b.receiver).len(), 1);
    }

    #[test]
    fn deregistered_connection_receives_nothing_further() {
        let bus = NotificationBus::new();
        let mut sub = bus.register();
        bus.deregister(sub.id);

        bus.broadcast(topic("hello", 1000));
        assert!(drain(&mut sub.receiver).is_empty());
    }

    #[test]
    fn drain_dedups_by_name_keeping_greatest_latest() {
        let bus = NotificationBus::new();
        let mut sub = bus.register();

        bus.broadcast(topic("hello", 1000));
        bus.broadcast(topic("world", 999));
        bus.broadcast(topic("hello", 1005));

        let drained = drain(&mut sub.receiver);
        assert_eq!(drained.len(), 2);
        assert_eq!(drained[0].name, "hello");
        assert_eq!(drained[0].latest, 1005);
        assert_eq!(drained[1].name, "world");
    }

    #[test]
    fn drain_on_empty_queue_is_empty() {
        let bus = NotificationBus::new();
        let mut sub = bus.register();
        assert!(drain(&mut sub.receiver).is_empty());
    }
}
