//! The persistence subscriber: a standing bus subscription that makes every
//! published [`DomainEvent`] durable.
//!
//! Its handler calls [`EventStore::append`] directly and lets
//! [`EventBus::publish`](chronicle_bus::EventBus::publish) propagate a
//! failed append straight back to the publisher as a
//! [`BusError::HandlerFailed`](chronicle_bus::BusError::HandlerFailed) — so
//! domain code always knows, from the result of its own `publish` call,
//! whether the event it just published is durable.

use std::sync::Arc;

use chronicle_bus::{all_events, EventBus, Handler, HandlerFuture, SubscriptionId};
use chronicle_store_core::LogBackend;
use chronicle_types::DomainEvent;

use crate::EventStore;

/// Standing subscription that persists every event published on a bus.
pub struct PersistenceSubscriber {
    bus: Arc<EventBus>,
    subscription: Option<SubscriptionId>,
}

impl PersistenceSubscriber {
    /// Subscribe `store` to `bus`. Every event published from this point on
    /// (until [`close`](Self::close) is called) is appended to `store`
    /// before `publish` returns to its caller.
    pub fn open<B: LogBackend + 'static>(bus: Arc<EventBus>, store: EventStore<B>) -> Self {
        let handler: Handler = Arc::new(move |event: &DomainEvent| {
            let store = store.clone();
            let event = event.clone();
            Box::pin(async move { store.append(&event).await.map_err(anyhow::Error::new) }) as HandlerFuture<'_>
        });

        let subscription = bus.subscribe(all_events(), handler);
        Self { bus, subscription: Some(subscription) }
    }

    /// Unsubscribe from the bus. Events published after this returns are no
    /// longer persisted by this subscriber.
    pub fn close(mut self) {
        if let Some(id) = self.subscription.take() {
            self.bus.unsubscribe(id);
        }
    }
}
