#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-eventstore** – Typed event store facade and persistence
//! subscriber for Chronicle (spec components 4.E, 4.G).
//!
//! [`EventStore`] is a thin, typed wrapper around a [`LogBackend`] and a
//! [`Transcoder`]: it turns [`DomainEvent`]s into stream appends and back,
//! so nothing above this layer touches [`chronicle_store_core::StoredEvent`]
//! directly. [`subscriber::PersistenceSubscriber`] bridges that facade to
//! `chronicle-bus`: subscribe it once at startup and every event published
//! on the bus becomes durable without callers needing to call `append`
//! themselves.

use std::sync::Arc;

use chronicle_codec::{CodecError, Transcoder};
use chronicle_store_core::{LogBackend, NewStoredEvent, SelectEventsQuery, StorageError, StreamId};
use chronicle_types::{DomainEvent, EntityId};

pub mod subscriber;

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Failures raised by [`EventStore`] operations.
#[derive(Debug, thiserror::Error)]
pub enum EventStoreError {
    /// The backing log rejected or failed the operation.
    #[error(transparent)]
    Storage(#[from] StorageError),
    /// The transcoder could not encode or decode an event payload.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

//─────────────────────────────
//  Event store
//─────────────────────────────

/// Typed facade over a [`LogBackend`], encoding and decoding
/// [`DomainEvent`]s via a [`Transcoder`] on the way in and out.
pub struct EventStore<B: LogBackend> {
    backend: Arc<B>,
    transcoder: Transcoder,
}

impl<B: LogBackend> Clone for EventStore<B> {
    fn clone(&self) -> Self {
        Self { backend: self.backend.clone(), transcoder: self.transcoder }
    }
}

impl<B: LogBackend> EventStore<B> {
    /// Wrap a backend. The backend's schema, if any, must already be
    /// installed via [`LogBackend::create_table`].
    pub fn new(backend: Arc<B>) -> Self {
        Self { backend, transcoder: Transcoder::new() }
    }

    /// Borrow the underlying backend directly, for collaborators (such as
    /// `chronicle-player`'s snapshot service) that need to address a
    /// different logical stream than the entity event stream this facade
    /// encodes/decodes for.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Encode `event` and append it to its entity's stream.
    ///
    /// Fails with [`StorageError::ConcurrencyConflict`] (wrapped in
    /// [`EventStoreError::Storage`]) if `event.entity_version()` has
    /// already been written for this entity — the caller raced another
    /// writer and should re-read and retry.
    pub async fn append(&self, event: &DomainEvent) -> Result<(), EventStoreError> {
        let bytes = self.transcoder.encode_event(event)?;
        let record = NewStoredEvent::new(
            StreamId::entity(&event.entity_id()),
            event.entity_version(),
            event.kind().clone(),
            bytes,
        );
        self.backend.insert_events(vec![record]).await?;
        Ok(())
    }

    /// Fetch an entity's events in ascending version order, optionally
    /// starting after a given version.
    pub async fn get_events(
        &self,
        entity_id: EntityId,
        after_version: Option<u64>,
    ) -> Result<Vec<DomainEvent>, EventStoreError> {
        self.get_events_page(entity_id, after_version, None).await
    }

    /// Like [`get_events`](Self::get_events), but caps the number of events
    /// returned — the primitive `chronicle-player` builds paged replay on
    /// top of.
    pub async fn get_events_page(
        &self,
        entity_id: EntityId,
        after_version: Option<u64>,
        limit: Option<usize>,
    ) -> Result<Vec<DomainEvent>, EventStoreError> {
        let stream = StreamId::entity(&entity_id);
        let query = SelectEventsQuery { after_version, limit, ..SelectEventsQuery::default() };
        let stored = self.backend.select_events(&stream, query).await?;
        stored
            .into_iter()
            .map(|record| {
                self.transcoder
                    .decode_event(entity_id, record.originator_version, record.topic, &record.state)
                    .map_err(EventStoreError::from)
            })
            .collect()
    }

    /// Fetch an entity's single most recent event, if any.
    pub async fn get_most_recent_event(&self, entity_id: EntityId) -> Result<Option<DomainEvent>, EventStoreError> {
        let stream = StreamId::entity(&entity_id);
        let stored = self.backend.select_events(&stream, SelectEventsQuery::most_recent()).await?;
        stored
            .into_iter()
            .next()
            .map(|record| {
                self.transcoder.decode_event(entity_id, record.originator_version, record.topic, &record.state)
            })
            .transpose()
            .map_err(EventStoreError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_store_memory::MemoryBackend;
    use chronicle_types::Topic;
    use serde_json::{json, Map};

    fn payload(value: i64) -> Map<String, serde_json::Value> {
        let mut m = Map::new();
        m.insert("balance".to_string(), json!(value));
        m
    }

    #[tokio::test]
    async fn append_then_get_events_round_trips_in_order() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();
        let first = DomainEvent::new(id, 0, Topic::new("acct#Opened"), payload(0));
        let second = DomainEvent::new(id, 1, Topic::new("acct#Credited"), payload(100));

        store.append(&first).await.unwrap();
        store.append(&second).await.unwrap();

        let events = store.get_events(id, None).await.unwrap();
        assert_eq!(events, vec![first, second]);
    }

    #[tokio::test]
    async fn get_events_after_version_skips_earlier_events() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();
        store.append(&DomainEvent::new(id, 0, Topic::new("acct#Opened"), payload(0))).await.unwrap();
        let second = DomainEvent::new(id, 1, Topic::new("acct#Credited"), payload(50));
        store.append(&second).await.unwrap();

        let events = store.get_events(id, Some(0)).await.unwrap();
        assert_eq!(events, vec![second]);
    }

    #[tokio::test]
    async fn get_most_recent_event_returns_highest_version() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();
        store.append(&DomainEvent::new(id, 0, Topic::new("acct#Opened"), payload(0))).await.unwrap();
        let second = DomainEvent::new(id, 1, Topic::new("acct#Credited"), payload(50));
        store.append(&second).await.unwrap();

        assert_eq!(store.get_most_recent_event(id).await.unwrap(), Some(second));
    }

    #[tokio::test]
    async fn get_most_recent_event_is_none_for_unknown_entity() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        assert_eq!(store.get_most_recent_event(EntityId::new()).await.unwrap(), None);
    }

    #[tokio::test]
    async fn conflicting_version_surfaces_as_concurrency_conflict() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        let id = EntityId::new();
        store.append(&DomainEvent::new(id, 0, Topic::new("acct#Opened"), payload(0))).await.unwrap();
        let err = store.append(&DomainEvent::new(id, 0, Topic::new("acct#Opened"), payload(0))).await.unwrap_err();
        assert!(matches!(err, EventStoreError::Storage(StorageError::ConcurrencyConflict { .. })));
    }
}
