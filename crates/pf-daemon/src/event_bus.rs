use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Observability events emitted by the worker loops. Durability never
/// depends on this bus; everything here is derivable from the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PostEvent {
    Published {
        variant_id: Uuid,
        platform: String,
        published_at: DateTime<Utc>,
    },
    CheckbacksProcessed {
        succeeded: usize,
        failed: usize,
        skipped: usize,
    },
    LensesRecomputed {
        updated: u32,
    },
}

/// A broadcast-style event bus built on flume channels.
///
/// Each call to [`subscribe`] creates a new receiver that observes all
/// messages published afterwards. Cloning is cheap (the sender list lives
/// behind an `Arc`); disconnected subscribers are pruned on publish.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<Mutex<Vec<flume::Sender<PostEvent>>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Register a new subscriber and return its receiving end.
    pub fn subscribe(&self) -> flume::Receiver<PostEvent> {
        let (tx, rx) = flume::unbounded();
        let mut senders = self.inner.lock().expect("event bus lock poisoned");
        senders.push(tx);
        rx
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: PostEvent) {
        let mut senders = self.inner.lock().expect("event bus lock poisoned");
        senders.retain(|tx| tx.send(event.clone()).is_ok());
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().expect("event bus lock poisoned").len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribers_receive_events() {
        let bus = EventBus::new();
        let rx = bus.subscribe();

        bus.publish(PostEvent::LensesRecomputed { updated: 3 });

        match rx.try_recv().expect("event") {
            PostEvent::LensesRecomputed { updated } => assert_eq!(updated, 3),
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::new();
        let rx = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 1);

        drop(rx);
        bus.publish(PostEvent::LensesRecomputed { updated: 0 });
        assert_eq!(bus.subscriber_count(), 0);
    }
}
