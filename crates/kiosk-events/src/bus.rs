use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use kiosk_types::{Clock, SystemClock};
use tokio::sync::broadcast;
use tracing::debug;

use crate::event::{EventEnvelope, EventKind, StoreEvent};

/// Default capacity of per-subscriber broadcast channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Filter for subscribing to a subset of store events.
#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// If set, only events of these kinds are delivered.
    pub kinds: Option<Vec<EventKind>>,
    /// If set, only events concerning this product are delivered.
    pub product_id: Option<String>,
}

impl EventFilter {
    /// Filter on a set of kinds.
    pub fn kinds(kinds: impl IntoIterator<Item = EventKind>) -> Self {
        Self {
            kinds: Some(kinds.into_iter().collect()),
            product_id: None,
        }
    }

    /// Filter on a single product.
    pub fn product(product_id: impl Into<String>) -> Self {
        Self {
            kinds: None,
            product_id: Some(product_id.into()),
        }
    }

    /// Returns `true` if the given event matches this filter.
    pub fn matches(&self, event: &StoreEvent) -> bool {
        if let Some(ref kinds) = self.kinds {
            if !kinds.contains(&event.kind()) {
                return false;
            }
        }
        if let Some(ref wanted) = self.product_id {
            if event.product_id() != Some(wanted.as_str()) {
                return false;
            }
        }
        true
    }
}

/// A broadcast channel receiver for store events.
pub type EventStream = broadcast::Receiver<EventEnvelope>;

struct Subscriber {
    filter: EventFilter,
    sender: broadcast::Sender<EventEnvelope>,
}

/// Fan-out bus delivering store events to filtered subscribers.
///
/// Emission never blocks and never fails: slow subscribers lag (and see a
/// `Lagged` error on their stream), closed ones are pruned.
pub struct EventBus {
    subscribers: RwLock<Vec<Subscriber>>,
    seq: AtomicU64,
    capacity: usize,
    clock: Arc<dyn Clock>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        Self::with_clock(capacity, Arc::new(SystemClock))
    }

    pub fn with_clock(capacity: usize, clock: Arc<dyn Clock>) -> Self {
        Self {
            subscribers: RwLock::new(Vec::new()),
            seq: AtomicU64::new(0),
            capacity: capacity.max(1),
            clock,
        }
    }

    /// Register a subscriber; returns its receiving end.
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        let (tx, rx) = broadcast::channel(self.capacity);
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber { filter, sender: tx });
        rx
    }

    /// Subscribe to every event.
    pub fn subscribe_all(&self) -> EventStream {
        self.subscribe(EventFilter::default())
    }

    /// Emit an event. Returns the number of subscribers it was delivered to.
    pub fn emit(&self, event: StoreEvent) -> usize {
        let envelope = EventEnvelope {
            seq: self.seq.fetch_add(1, Ordering::SeqCst) + 1,
            emitted_at_ms: self.clock.now_millis(),
            event,
        };

        let mut delivered = 0;
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        subs.retain(|sub| {
            if sub.filter.matches(&envelope.event) {
                let ok = sub.sender.send(envelope.clone()).is_ok();
                if ok {
                    delivered += 1;
                }
                ok
            } else {
                sub.sender.receiver_count() > 0
            }
        });

        debug!(
            seq = envelope.seq,
            kind = %envelope.event.kind(),
            delivered,
            "event emitted"
        );
        delivered
    }

    /// Number of live subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiosk_types::FixedClock;

    #[test]
    fn subscriber_receives_matching_events() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe(EventFilter::kinds([EventKind::ProductPurchased]));

        bus.emit(StoreEvent::ProductPurchased("pro".into()));
        bus.emit(StoreEvent::PurchaseDeferred("pro".into()));

        let received = stream.try_recv().unwrap();
        assert_eq!(received.event, StoreEvent::ProductPurchased("pro".into()));
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn product_filter() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe(EventFilter::product("sub.monthly"));

        bus.emit(StoreEvent::SubscriptionExpired("sub.yearly".into()));
        bus.emit(StoreEvent::SubscriptionExpired("sub.monthly".into()));
        bus.emit(StoreEvent::RestoredPurchases);

        let received = stream.try_recv().unwrap();
        assert_eq!(received.event.product_id(), Some("sub.monthly"));
        assert!(stream.try_recv().is_err());
    }

    #[test]
    fn sequence_numbers_increase_and_carry_clock_time() {
        let bus = EventBus::with_clock(16, Arc::new(FixedClock::new(42)));
        let mut stream = bus.subscribe_all();

        bus.emit(StoreEvent::RestoredPurchases);
        bus.emit(StoreEvent::RestoredPurchases);

        let a = stream.try_recv().unwrap();
        let b = stream.try_recv().unwrap();
        assert!(b.seq > a.seq);
        assert_eq!(a.emitted_at_ms, 42_000);
    }

    #[test]
    fn emit_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        assert_eq!(bus.emit(StoreEvent::RestoredPurchases), 0);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = EventBus::default();
        let stream = bus.subscribe_all();
        let _keep = bus.subscribe(EventFilter::kinds([EventKind::DownloadProgress]));
        assert_eq!(bus.subscriber_count(), 2);

        drop(stream);
        bus.emit(StoreEvent::RestoredPurchases);
        assert_eq!(bus.subscriber_count(), 1);
    }

    #[test]
    fn empty_filter_matches_everything() {
        let filter = EventFilter::default();
        assert!(filter.matches(&StoreEvent::RestoredPurchases));
        assert!(filter.matches(&StoreEvent::ProductPurchased("x".into())));
    }

    #[tokio::test]
    async fn async_receive() {
        let bus = EventBus::default();
        let mut stream = bus.subscribe_all();
        bus.emit(StoreEvent::PurchaseDeferred("pro".into()));
        let envelope = stream.recv().await.unwrap();
        assert_eq!(envelope.event.kind(), EventKind::PurchaseDeferred);
    }
}
