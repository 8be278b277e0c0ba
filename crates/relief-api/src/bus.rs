//! Realtime broadcast bus for change events.
//!
//! The bus is a single long-lived registry of observers. Each observer
//! owns an unbounded queue; [`BroadcastBus::publish`] enqueues onto every
//! matching queue synchronously and returns without waiting for anyone
//! to read. Delivery to the client happens in the observer's own task
//! (its `WebSocket` writer), so one slow observer never holds up another
//! or the producer.
//!
//! # Ordering
//!
//! Sequence numbers are stamped under the registry lock, so every
//! observer receives events in publish order with strictly increasing
//! sequences. Events published before an observer subscribed are never
//! replayed to it.
//!
//! # Observer lifecycle
//!
//! ```text
//! subscribe() --> Connecting --mark_connected()--> Connected
//!                      |                               |
//!                      +--------disconnect()/drop------+--> Disconnected
//! ```
//!
//! Events published while an observer is `Connecting` are buffered, so a
//! client that resynchronizes with a full read in that window misses
//! nothing (it may see a change twice; the sequence lets it drop the
//! duplicate).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};

use relief_types::{ChangeEvent, DisasterId};
use tokio::sync::mpsc;
use tracing::debug;

/// Which events an observer wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventScope {
    /// Every event.
    All,
    /// Only events about one disaster.
    Disaster(DisasterId),
}

impl EventScope {
    /// Whether `event` falls inside this scope.
    pub fn admits(&self, event: &ChangeEvent) -> bool {
        match self {
            Self::All => true,
            Self::Disaster(id) => event.disaster_id() == *id,
        }
    }
}

/// Lifecycle state of a [`Subscription`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserverState {
    /// Registered and buffering; not yet yielding events.
    Connecting,
    /// Yielding events.
    Connected,
    /// Unregistered. Terminal.
    Disconnected,
}

/// Errors surfaced to an observer. Publishers never see an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// `recv` was called before `mark_connected`.
    #[error("subscription is still connecting")]
    NotConnected,

    /// The subscription was disconnected.
    #[error("subscription is disconnected")]
    Disconnected,

    /// The bus itself was dropped.
    #[error("broadcast bus closed")]
    Closed,
}

struct Observer {
    scope: EventScope,
    tx: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Registry {
    next_sequence: u64,
    next_observer: u64,
    observers: BTreeMap<u64, Observer>,
}

/// Handle to the broadcast bus. Cheap to clone; all clones share one
/// registry.
#[derive(Clone, Default)]
pub struct BroadcastBus {
    registry: Arc<Mutex<Registry>>,
}

impl BroadcastBus {
    /// Create a bus with no observers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Stamp `event` with the next sequence number and enqueue it for
    /// every observer whose scope admits it.
    ///
    /// Returns the number of observers it was enqueued for. Observers
    /// whose queue has closed are pruned; that failure is not reported.
    pub fn publish(&self, mut event: ChangeEvent) -> usize {
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.next_sequence = registry.next_sequence.saturating_add(1);
        event.sequence = registry.next_sequence;

        let mut delivered: usize = 0;
        let mut closed = Vec::new();
        for (id, observer) in &registry.observers {
            if !observer.scope.admits(&event) {
                continue;
            }
            if observer.tx.send(event.clone()).is_ok() {
                delivered = delivered.saturating_add(1);
            } else {
                closed.push(*id);
            }
        }
        for id in closed {
            registry.observers.remove(&id);
            debug!(observer = id, "Dropped closed observer queue");
        }

        debug!(
            sequence = event.sequence,
            channel = event.channel.as_str(),
            kind = event.kind.as_str(),
            delivered,
            "Published change event"
        );
        delivered
    }

    /// Register a new observer. It starts buffering immediately.
    pub fn subscribe(&self, scope: EventScope) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut registry = self.registry.lock().unwrap_or_else(PoisonError::into_inner);
        registry.next_observer = registry.next_observer.saturating_add(1);
        let id = registry.next_observer;
        registry.observers.insert(id, Observer { scope, tx });
        debug!(observer = id, ?scope, "Observer subscribed");

        Subscription {
            id,
            scope,
            state: ObserverState::Connecting,
            rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .observers
            .len()
    }

    /// Sequence number of the most recently published event (0 if none).
    pub fn last_sequence(&self) -> u64 {
        self.registry
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .next_sequence
    }
}

/// One observer's view of the bus.
///
/// Dropping the subscription disconnects it.
pub struct Subscription {
    id: u64,
    scope: EventScope,
    state: ObserverState,
    rx: mpsc::UnboundedReceiver<ChangeEvent>,
    registry: Weak<Mutex<Registry>>,
}

impl Subscription {
    /// Current lifecycle state.
    pub const fn state(&self) -> ObserverState {
        self.state
    }

    /// Scope the subscription was registered with.
    pub const fn scope(&self) -> EventScope {
        self.scope
    }

    /// Finish resynchronization and start yielding buffered and new
    /// events.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::Disconnected`] if the subscription was already
    /// disconnected; a disconnected observer must subscribe again.
    pub const fn mark_connected(&mut self) -> Result<(), BusError> {
        match self.state {
            ObserverState::Disconnected => Err(BusError::Disconnected),
            ObserverState::Connecting | ObserverState::Connected => {
                self.state = ObserverState::Connected;
                Ok(())
            }
        }
    }

    /// Wait for the next event.
    ///
    /// Cancel-safe: dropping the future loses no event.
    ///
    /// # Errors
    ///
    /// Returns [`BusError::NotConnected`] before `mark_connected`,
    /// [`BusError::Disconnected`] after `disconnect`, and
    /// [`BusError::Closed`] once the bus is gone and the queue drained.
    pub async fn recv(&mut self) -> Result<ChangeEvent, BusError> {
        match self.state {
            ObserverState::Connecting => Err(BusError::NotConnected),
            ObserverState::Disconnected => Err(BusError::Disconnected),
            ObserverState::Connected => self.rx.recv().await.ok_or(BusError::Closed),
        }
    }

    /// Unregister from the bus. Buffered events are discarded.
    pub fn disconnect(&mut self) {
        if self.state == ObserverState::Disconnected {
            return;
        }
        self.state = ObserverState::Disconnected;
        self.rx.close();
        if let Some(registry) = self.registry.upgrade() {
            registry
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .observers
                .remove(&self.id);
        }
        debug!(observer = self.id, "Observer disconnected");
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.disconnect();
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::Utc;
    use relief_types::{AuditEntry, ChangeAction};

    use super::*;

    fn deleted(id: DisasterId) -> ChangeEvent {
        let audit = AuditEntry {
            action: ChangeAction::Delete,
            user_id: String::from("netrunnerX"),
            timestamp: Utc::now(),
        };
        ChangeEvent::disaster_deleted(id, audit, Utc::now())
    }

    fn resources(id: DisasterId) -> ChangeEvent {
        ChangeEvent::resources(ChangeAction::Create, id, Vec::new(), Utc::now())
    }

    #[tokio::test]
    async fn events_arrive_in_publish_order() {
        let bus = BroadcastBus::new();
        let mut sub = bus.subscribe(EventScope::All);
        sub.mark_connected().unwrap();

        let ids: Vec<DisasterId> = (0..5).map(|_| DisasterId::new()).collect();
        for id in &ids {
            assert_eq!(bus.publish(deleted(*id)), 1);
        }

        let mut last = 0;
        for id in &ids {
            let event = sub.recv().await.unwrap();
            assert_eq!(event.disaster_id(), *id);
            assert!(event.sequence > last);
            last = event.sequence;
        }
        assert_eq!(bus.last_sequence(), last);
    }

    #[tokio::test]
    async fn recv_waits_for_mark_connected() {
        let bus = BroadcastBus::new();
        let mut sub = bus.subscribe(EventScope::All);
        assert_eq!(sub.state(), ObserverState::Connecting);

        let id = DisasterId::new();
        bus.publish(deleted(id));
        assert_eq!(sub.recv().await.unwrap_err(), BusError::NotConnected);

        sub.mark_connected().unwrap();
        assert_eq!(sub.recv().await.unwrap().disaster_id(), id);
    }

    #[tokio::test]
    async fn late_subscriber_gets_no_replay() {
        let bus = BroadcastBus::new();
        bus.publish(deleted(DisasterId::new()));

        let mut sub = bus.subscribe(EventScope::All);
        sub.mark_connected().unwrap();
        let later = DisasterId::new();
        bus.publish(deleted(later));
        assert_eq!(sub.recv().await.unwrap().disaster_id(), later);
    }

    #[tokio::test]
    async fn scope_filters_other_disasters() {
        let bus = BroadcastBus::new();
        let watched = DisasterId::new();
        let mut scoped = bus.subscribe(EventScope::Disaster(watched));
        let mut all = bus.subscribe(EventScope::All);
        scoped.mark_connected().unwrap();
        all.mark_connected().unwrap();

        assert_eq!(bus.publish(resources(DisasterId::new())), 1);
        assert_eq!(bus.publish(resources(watched)), 2);

        assert_eq!(scoped.recv().await.unwrap().disaster_id(), watched);
        all.recv().await.unwrap();
        assert_eq!(all.recv().await.unwrap().disaster_id(), watched);
    }

    #[tokio::test]
    async fn unread_observer_does_not_block_others() {
        let bus = BroadcastBus::new();
        let _idle = bus.subscribe(EventScope::All);
        let mut active = bus.subscribe(EventScope::All);
        active.mark_connected().unwrap();

        for _ in 0..1_000 {
            bus.publish(resources(DisasterId::new()));
        }
        assert_eq!(active.recv().await.unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn disconnect_is_terminal_and_unregisters() {
        let bus = BroadcastBus::new();
        let mut sub = bus.subscribe(EventScope::All);
        assert_eq!(bus.observer_count(), 1);

        sub.disconnect();
        assert_eq!(sub.state(), ObserverState::Disconnected);
        assert_eq!(bus.observer_count(), 0);
        assert_eq!(sub.mark_connected().unwrap_err(), BusError::Disconnected);
        assert_eq!(sub.recv().await.unwrap_err(), BusError::Disconnected);
        assert_eq!(bus.publish(deleted(DisasterId::new())), 0);
    }

    #[tokio::test]
    async fn dropped_subscription_unregisters() {
        let bus = BroadcastBus::new();
        {
            let _sub = bus.subscribe(EventScope::All);
            assert_eq!(bus.observer_count(), 1);
        }
        assert_eq!(bus.observer_count(), 0);
    }

    #[tokio::test]
    async fn dropped_bus_closes_subscription() {
        let bus = BroadcastBus::new();
        let mut sub = bus.subscribe(EventScope::All);
        sub.mark_connected().unwrap();
        bus.publish(deleted(DisasterId::new()));
        drop(bus);

        assert!(sub.recv().await.is_ok());
        assert_eq!(sub.recv().await.unwrap_err(), BusError::Closed);
    }
}
