//! Fan-out of status snapshots to live subscribers.
//!
//! Each subscriber owns a small bounded queue. Publishing never waits: a
//! subscriber whose queue is full (or whose receiver is gone) is dropped on
//! the spot, so one stalled consumer can only ever hurt itself.

use crate::snapshot::StatusSnapshot;
use log::{debug, warn};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Opaque subscriber identity, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Receiving end of a subscription. Snapshots arrive in publish order.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Arc<StatusSnapshot>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next snapshot, or `None` once the hub dropped this subscriber and the
    /// queue is drained.
    pub async fn recv(&mut self) -> Option<Arc<StatusSnapshot>> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<StatusSnapshot>> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    sender: mpsc::Sender<Arc<StatusSnapshot>>,
    last_delivered: Option<Instant>,
}

struct HubInner {
    next_id: u64,
    subscribers: HashMap<SubscriberId, Subscriber>,
    latest: Option<Arc<StatusSnapshot>>,
    closed: bool,
}

/// Outcome of one [`BroadcastHub::publish`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
}

pub struct BroadcastHub {
    capacity: usize,
    inner: Mutex<HubInner>,
}

impl BroadcastHub {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(HubInner {
                next_id: 1,
                subscribers: HashMap::new(),
                latest: None,
                closed: false,
            }),
        }
    }

    /// Registers a subscriber. The latest snapshot, if any, is queued at once.
    pub fn subscribe(&self) -> Subscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let mut inner = self.inner.lock();

        let id = SubscriberId(inner.next_id);
        inner.next_id += 1;

        // A closed hub hands out already-finished streams
        if inner.closed {
            return Subscription { id, receiver };
        }

        // Late joiners start from the current state
        let mut last_delivered = None;
        if let Some(latest) = &inner.latest {
            if sender.try_send(Arc::clone(latest)).is_ok() {
                last_delivered = Some(Instant::now());
            }
        }

        inner.subscribers.insert(
            id,
            Subscriber {
                sender,
                last_delivered,
            },
        );
        debug!("Subscriber {} added ({} total)", id, inner.subscribers.len());

        Subscription { id, receiver }
    }

    /// Removes a subscriber. Returns whether it was still registered.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.lock().subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscriber {} removed", id);
        }
        removed
    }

    /// Offers `snapshot` to every subscriber without blocking.
    pub fn publish(&self, snapshot: Arc<StatusSnapshot>) -> PublishReport {
        // Deliver against a copy so subscribe/unsubscribe never race the loop
        let targets: Vec<(SubscriberId, mpsc::Sender<Arc<StatusSnapshot>>)> = {
            let mut inner = self.inner.lock();
            if inner.closed {
                return PublishReport::default();
            }
            inner.latest = Some(Arc::clone(&snapshot));
            inner
                .subscribers
                .iter()
                .map(|(id, subscriber)| (*id, subscriber.sender.clone()))
                .collect()
        };

        let mut delivered = Vec::with_capacity(targets.len());
        let mut failed = Vec::new();

        // Never await here: a full queue is a failure, not a reason to wait
        for (id, sender) in targets {
            match sender.try_send(Arc::clone(&snapshot)) {
                Ok(()) => delivered.push(id),
                Err(TrySendError::Full(_)) => {
                    warn!("Subscriber {} is not keeping up, dropping it", id);
                    failed.push(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!("Subscriber {} went away", id);
                    failed.push(id);
                }
            }
        }

        // Second, short lock to apply the results
        if !delivered.is_empty() || !failed.is_empty() {
            let now = Instant::now();
            let mut inner = self.inner.lock();
            // Dropping the sender ends that subscriber's stream
            for id in &failed {
                inner.subscribers.remove(id);
            }
            // Skip ids that unsubscribed while we were delivering
            for id in &delivered {
                if let Some(subscriber) = inner.subscribers.get_mut(id) {
                    subscriber.last_delivered = Some(now);
                }
            }
        }

        PublishReport {
            delivered: delivered.len(),
            dropped: failed.len(),
        }
    }

    /// Most recently published snapshot.
    pub fn latest(&self) -> Option<Arc<StatusSnapshot>> {
        self.inner.lock().latest.clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.lock().subscribers.len()
    }

    pub fn last_delivered(&self, id: SubscriberId) -> Option<Instant> {
        self.inner
            .lock()
            .subscribers
            .get(&id)
            .and_then(|subscriber| subscriber.last_delivered)
    }

    /// Drops every subscriber and refuses further publishes. Queued snapshots
    /// stay readable; each stream then ends.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        inner.closed = true;
        let count = inner.subscribers.len();
        inner.subscribers.clear();
        debug!("Hub closed, released {} subscribers", count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::Metrics;

    fn snapshot(n: u64) -> Arc<StatusSnapshot> {
        Arc::new(StatusSnapshot::online("test", n as u32, 100, n, Metrics::default()))
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber() {
        let hub = BroadcastHub::new(8);
        let mut first = hub.subscribe();
        let mut second = hub.subscribe();

        let report = hub.publish(snapshot(1));
        assert_eq!(report, PublishReport { delivered: 2, dropped: 0 });

        assert_eq!(first.recv().await.unwrap().timestamp_utc, 1);
        assert_eq!(second.recv().await.unwrap().timestamp_utc, 1);
        assert!(hub.last_delivered(first.id()).is_some());
    }

    #[tokio::test]
    async fn test_slow_subscriber_is_isolated() {
        let hub = BroadcastHub::new(8);
        let mut responsive = hub.subscribe();
        let mut stalled = hub.subscribe();

        let mut received = Vec::new();
        let mut dropped = 0;
        for n in 0..100 {
            dropped += hub.publish(snapshot(n)).dropped;
            while let Some(s) = responsive.try_recv() {
                received.push(s.timestamp_utc);
            }
        }

        assert_eq!(received, (0..100).collect::<Vec<u64>>());
        assert_eq!(dropped, 1);
        assert_eq!(hub.subscriber_count(), 1);

        // The stalled subscriber keeps its full queue, then its stream ends
        let mut backlog = Vec::new();
        while let Some(s) = stalled.recv().await {
            backlog.push(s.timestamp_utc);
        }
        assert_eq!(backlog, (0..8).collect::<Vec<u64>>());
    }

    #[tokio::test]
    async fn test_publish_never_blocks_on_full_queues() {
        let hub = BroadcastHub::new(2);
        let _stalled: Vec<Subscription> = (0..10).map(|_| hub.subscribe()).collect();

        let result = tokio::time::timeout(std::time::Duration::from_secs(1), async {
            for n in 0..100 {
                hub.publish(snapshot(n));
            }
        })
        .await;

        assert!(result.is_ok());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_dropped_receiver_is_removed() {
        let hub = BroadcastHub::new(8);
        let subscription = hub.subscribe();
        drop(subscription);

        let report = hub.publish(snapshot(1));
        assert_eq!(report, PublishReport { delivered: 0, dropped: 1 });
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new(8);
        let subscription = hub.subscribe();

        assert!(hub.unsubscribe(subscription.id()));
        assert!(!hub.unsubscribe(subscription.id()));
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_new_subscriber_gets_latest() {
        let hub = BroadcastHub::new(8);
        assert!(hub.latest().is_none());

        hub.publish(snapshot(7));
        let mut late = hub.subscribe();

        assert_eq!(late.recv().await.unwrap().timestamp_utc, 7);
        assert_eq!(hub.latest().unwrap().timestamp_utc, 7);
    }

    #[tokio::test]
    async fn test_close_ends_streams() {
        let hub = BroadcastHub::new(8);
        let mut subscription = hub.subscribe();
        hub.publish(snapshot(1));

        hub.close();
        assert_eq!(subscription.recv().await.unwrap().timestamp_utc, 1);
        assert!(subscription.recv().await.is_none());

        assert_eq!(hub.publish(snapshot(2)), PublishReport::default());
        let mut after = hub.subscribe();
        assert!(after.recv().await.is_none());
    }

    #[test]
    fn test_subscriber_ids_are_unique() {
        let hub = BroadcastHub::new(8);
        let a = hub.subscribe();
        let b = hub.subscribe();
        assert_ne!(a.id(), b.id());
    }
}
