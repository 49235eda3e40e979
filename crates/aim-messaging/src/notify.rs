//! The notification hub: bounded-history pub/sub with per-subscriber
//! cursors.
//!
//! Every published event gets a strictly monotonic sequence number and is
//! appended to a bounded ring. Subscribers replay history past their
//! cursor and then receive live events through a bounded channel; a
//! subscriber that stops draining is dropped rather than stalling the hub.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use aim_types::events::NotificationEvent;

/// Default history retention.
pub const DEFAULT_HISTORY: usize = 2048;

/// Per-subscriber channel capacity; overflowing it drops the subscriber.
pub const SUBSCRIBER_BUFFER: usize = 128;

struct Subscriber {
    id: u64,
    sender: mpsc::Sender<NotificationEvent>,
}

struct HubInner {
    seq: i64,
    next_subscriber: u64,
    history: VecDeque<NotificationEvent>,
    subscribers: Vec<Subscriber>,
}

/// A live subscription handle.
pub struct Subscription {
    /// Events with `seq > cursor` that were already in the hub.
    pub replay: Vec<NotificationEvent>,
    /// Live events published after `subscribe`.
    pub receiver: mpsc::Receiver<NotificationEvent>,
    /// Pass to [`NotificationHub::cancel`] to detach early.
    pub id: u64,
}

/// The hub. Internally synchronized; safe for concurrent publishers.
pub struct NotificationHub {
    limit: usize,
    inner: Mutex<HubInner>,
}

impl Default for NotificationHub {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY)
    }
}

impl NotificationHub {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            inner: Mutex::new(HubInner {
                seq: 0,
                next_subscriber: 0,
                history: VecDeque::new(),
                subscribers: Vec::new(),
            }),
        }
    }

    /// Publish an event, fanning it out to every live subscriber. A
    /// subscriber whose buffer is full is closed and removed.
    pub fn publish(&self, method: &str, payload: serde_json::Value) -> NotificationEvent {
        let mut inner = self.lock();
        inner.seq += 1;
        let event = NotificationEvent {
            seq: inner.seq,
            method: method.to_string(),
            payload,
            timestamp: Utc::now(),
        };

        inner.history.push_back(event.clone());
        while inner.history.len() > self.limit {
            inner.history.pop_front();
        }

        inner.subscribers.retain(|subscriber| {
            match subscriber.sender.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    warn!(subscriber = subscriber.id, "slow subscriber dropped");
                    false
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });

        event
    }

    /// Subscribe with a cursor: replay everything with `seq > from_seq`,
    /// then stream live events.
    pub fn subscribe(&self, from_seq: i64) -> Subscription {
        let (sender, receiver) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;

        let replay: Vec<NotificationEvent> = inner
            .history
            .iter()
            .filter(|event| event.seq > from_seq)
            .cloned()
            .collect();

        inner.subscribers.push(Subscriber { id, sender });
        debug!(subscriber = id, replayed = replay.len(), "subscriber attached");
        Subscription {
            replay,
            receiver,
            id,
        }
    }

    /// Detach a subscriber.
    pub fn cancel(&self, id: u64) {
        self.lock().subscribers.retain(|s| s.id != id);
    }

    /// The latest sequence number.
    pub fn current_seq(&self) -> i64 {
        self.lock().seq
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HubInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seq_is_strictly_monotonic() {
        let hub = NotificationHub::default();
        let a = hub.publish("notify.test", serde_json::json!({}));
        let b = hub.publish("notify.test", serde_json::json!({}));
        assert!(b.seq > a.seq);
        assert_eq!(hub.current_seq(), b.seq);
    }

    #[test]
    fn replay_honors_cursor() {
        let hub = NotificationHub::default();
        for i in 0..5 {
            hub.publish("notify.test", serde_json::json!({ "i": i }));
        }
        let sub = hub.subscribe(2);
        let seqs: Vec<i64> = sub.replay.iter().map(|e| e.seq).collect();
        assert_eq!(seqs, vec![3, 4, 5]);
    }

    #[tokio::test]
    async fn live_events_follow_replay() {
        let hub = NotificationHub::default();
        hub.publish("notify.test", serde_json::json!({"n": 1}));
        let mut sub = hub.subscribe(0);
        assert_eq!(sub.replay.len(), 1);

        hub.publish("notify.test", serde_json::json!({"n": 2}));
        let live = sub.receiver.recv().await.expect("live event");
        assert_eq!(live.seq, 2);
    }

    #[test]
    fn ring_is_bounded() {
        let hub = NotificationHub::new(4);
        for _ in 0..10 {
            hub.publish("notify.test", serde_json::json!({}));
        }
        let sub = hub.subscribe(0);
        assert_eq!(sub.replay.len(), 4);
        assert_eq!(sub.replay[0].seq, 7);
    }

    #[test]
    fn slow_subscriber_is_dropped() {
        let hub = NotificationHub::default();
        let mut sub = hub.subscribe(0);
        for _ in 0..(SUBSCRIBER_BUFFER + 10) {
            hub.publish("notify.test", serde_json::json!({}));
        }
        // The channel was closed by the hub once the buffer overflowed;
        // draining yields at most the buffered events then None.
        let mut drained = 0;
        while sub.receiver.try_recv().is_ok() {
            drained += 1;
        }
        assert_eq!(drained, SUBSCRIBER_BUFFER);
        assert!(sub.receiver.try_recv().is_err());
    }

    #[test]
    fn cancel_detaches() {
        let hub = NotificationHub::default();
        let sub = hub.subscribe(0);
        hub.cancel(sub.id);
        hub.publish("notify.test", serde_json::json!({}));
        // No panic, no delivery: the subscriber list is empty.
        assert_eq!(hub.lock().subscribers.len(), 0);
    }
}
