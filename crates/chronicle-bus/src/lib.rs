#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-bus** – In-process publish/subscribe event bus for Chronicle.
//!
//! Decouples the moment a domain object mutates from the moment that
//! mutation is durably appended: application code publishes a
//! [`DomainEvent`] here, and any number of independently-registered
//! handlers react to it — typically exactly one of which is the standing
//! persistence subscriber in `chronicle-eventstore`.
//!
//! Unlike `chronicle-store-memory`'s broadcast channel (fire-and-forget,
//! built for fan-out to readers that can tolerate missed events), this bus
//! dispatches exactly once per matching handler, in registration order, and
//! a handler's failure fails the whole `publish` call — the persistence
//! subscriber relies on this so domain code always knows whether its event
//! became durable.

use std::sync::{Arc, RwLock};

use futures::future::BoxFuture;
use tracing::warn;

use chronicle_types::DomainEvent;

//─────────────────────────────
//  Predicates and handlers
//─────────────────────────────

/// A filter deciding whether a handler should see a given event.
pub type Predicate = Arc<dyn Fn(&DomainEvent) -> bool + Send + Sync>;

/// The future a [`Handler`] returns, borrowing the event for its lifetime.
pub type HandlerFuture<'a> = BoxFuture<'a, anyhow::Result<()>>;

/// A callback invoked for each event it's subscribed to. Async so handlers
/// that must do I/O (the persistence subscriber, chiefly) can await it
/// directly rather than bridging to a background task.
pub type Handler = Arc<dyn for<'a> Fn(&'a DomainEvent) -> HandlerFuture<'a> + Send + Sync>;

/// Predicate matching every event, for handlers that want everything.
pub fn all_events() -> Predicate {
    Arc::new(|_| true)
}

/// Wrap a plain, infallible, synchronous callback as a [`Handler`] — the
/// common case for handlers that don't need to await anything.
pub fn handler_fn<F>(f: F) -> Handler
where
    F: Fn(&DomainEvent) + Send + Sync + 'static,
{
    Arc::new(move |event: &DomainEvent| {
        f(event);
        Box::pin(async { Ok(()) }) as HandlerFuture<'_>
    })
}

/// Opaque handle returned by [`EventBus::subscribe`], needed to
/// [`EventBus::unsubscribe`] later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Registration {
    id: SubscriptionId,
    predicate: Predicate,
    handler: Handler,
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors raised by bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A subscribed handler failed while processing a published event.
    /// `publish` stops dispatching to any handler not yet run and returns
    /// this — the caller, not the bus, decides what "the event is not
    /// durable" means for its domain.
    #[error("handler failed while processing event: {0}")]
    HandlerFailed(#[source] anyhow::Error),
    /// [`EventBus::assert_handlers_empty`] found leftover subscriptions —
    /// almost always a test that subscribed and forgot to unsubscribe.
    #[error("{0} handler(s) still subscribed")]
    HandlersStillSubscribed(usize),
}

//─────────────────────────────
//  Bus
//─────────────────────────────

/// In-process publish/subscribe bus.
///
/// Registration order is preserved: [`EventBus::publish`] dispatches to
/// matching handlers in the order they were subscribed. If the same handler
/// is reachable through more than one matching registration for a given
/// event, it still runs only once — the first time it would have matched.
#[derive(Default)]
pub struct EventBus {
    registrations: RwLock<Vec<Registration>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` to run on every event matching `predicate`.
    pub fn subscribe(&self, predicate: Predicate, handler: Handler) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, std::sync::atomic::Ordering::SeqCst));
        self.registrations
            .write()
            .expect("bus lock poisoned")
            .push(Registration { id, predicate, handler });
        id
    }

    /// Remove a previously-registered subscription. A no-op if `id` is not
    /// (or is no longer) registered.
    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.registrations.write().expect("bus lock poisoned").retain(|r| r.id != id);
    }

    /// Dispatch `event` to every matching handler, in registration order,
    /// each exactly once, awaiting each handler before starting the next.
    ///
    /// Stops and returns [`BusError::HandlerFailed`] at the first handler
    /// that fails — subsequent matching handlers for this event do not run.
    /// Dispatch reads a snapshot of the registration table taken at entry,
    /// so a handler that (un)subscribes during its own run can't invalidate
    /// the in-flight iteration.
    pub async fn publish(&self, event: &DomainEvent) -> Result<(), BusError> {
        let matched: Vec<Handler> = {
            let registrations = self.registrations.read().expect("bus lock poisoned");
            let mut matched: Vec<Handler> = Vec::new();
            for reg in registrations.iter() {
                if (reg.predicate)(event) && !matched.iter().any(|h| Arc::ptr_eq(h, &reg.handler)) {
                    matched.push(reg.handler.clone());
                }
            }
            matched
        };
        for handler in matched {
            if let Err(err) = handler(event).await {
                warn!(entity_id = %event.entity_id(), %err, "bus handler failed, aborting dispatch");
                return Err(BusError::HandlerFailed(err));
            }
        }
        Ok(())
    }

    /// The number of subscriptions currently registered.
    pub fn subscriber_count(&self) -> usize {
        self.registrations.read().expect("bus lock poisoned").len()
    }

    /// Assert no subscriptions remain, failing loudly if some do.
    ///
    /// Meant to be called at the end of a test that is expected to clean up
    /// after itself — a dangling subscription usually means a handler will
    /// keep firing (and keep a stale `Arc` alive) into the next test.
    pub fn assert_handlers_empty(&self) -> Result<(), BusError> {
        let count = self.subscriber_count();
        if count == 0 {
            Ok(())
        } else {
            Err(BusError::HandlersStillSubscribed(count))
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("subscriber_count", &self.subscriber_count()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_types::{EntityId, Topic};
    use serde_json::Map;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn event(kind: &str) -> DomainEvent {
        DomainEvent::new(EntityId::new(), 0, Topic::new(kind), Map::new())
    }

    #[tokio::test]
    async fn matching_handler_is_invoked() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let id = bus.subscribe(all_events(), handler_fn(move |_| { calls_clone.fetch_add(1, Ordering::SeqCst); }));
        bus.publish(&event("acct#Opened")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        bus.unsubscribe(id);
        assert!(bus.assert_handlers_empty().is_ok());
    }

    #[tokio::test]
    async fn non_matching_predicate_is_skipped() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let predicate: Predicate = Arc::new(|e: &DomainEvent| e.kind().as_str() == "acct#Closed");
        bus.subscribe(predicate, handler_fn(move |_| { calls_clone.fetch_add(1, Ordering::SeqCst); }));
        bus.publish(&event("acct#Opened")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn same_handler_fires_once_even_if_matched_twice() {
        let bus = EventBus::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let handler: Handler = handler_fn(move |_| { calls_clone.fetch_add(1, Ordering::SeqCst); });
        bus.subscribe(all_events(), handler.clone());
        bus.subscribe(all_events(), handler);
        bus.publish(&event("acct#Opened")).await.unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn assert_handlers_empty_fails_when_subscriptions_remain() {
        let bus = EventBus::new();
        bus.subscribe(all_events(), handler_fn(|_| {}));
        let err = bus.assert_handlers_empty().unwrap_err();
        assert!(matches!(err, BusError::HandlersStillSubscribed(1)));
    }

    #[tokio::test]
    async fn dispatch_preserves_registration_order() {
        let bus = EventBus::new();
        let order = Arc::new(RwLock::new(Vec::new()));
        for i in 0..3 {
            let order = order.clone();
            bus.subscribe(all_events(), handler_fn(move |_| order.write().unwrap().push(i)));
        }
        bus.publish(&event("acct#Opened")).await.unwrap();
        assert_eq!(*order.read().unwrap(), vec![0, 1, 2]);
    }

    #[tokio::test]
    async fn failing_handler_fails_publish_and_stops_dispatch() {
        let bus = EventBus::new();
        let later_ran = Arc::new(AtomicUsize::new(0));
        let later_ran_clone = later_ran.clone();

        bus.subscribe(
            all_events(),
            Arc::new(|_: &DomainEvent| Box::pin(async { Err(anyhow::anyhow!("append failed")) }) as HandlerFuture<'_>),
        );
        bus.subscribe(all_events(), handler_fn(move |_| { later_ran_clone.fetch_add(1, Ordering::SeqCst); }));

        let err = bus.publish(&event("acct#Opened")).await.unwrap_err();
        assert!(matches!(err, BusError::HandlerFailed(_)));
        assert_eq!(later_ran.load(Ordering::SeqCst), 0);
    }
}
