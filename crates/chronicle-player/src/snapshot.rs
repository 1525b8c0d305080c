//! The snapshot service: persists and retrieves entity-state snapshots used
//! to short-circuit replay (spec component 4.I).
//!
//! A snapshot is an ordinary stored event living in a dedicated stream keyed
//! by [`StreamId::snapshot`] rather than the entity's own event stream, so it
//! coexists with — but never interleaves with — the entity's events, encoded
//! as plain JSON under a fixed snapshot topic.

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use chronicle_eventstore::EventStore;
use chronicle_store_core::{LogBackend, NewStoredEvent, SelectEventsQuery, StreamId};
use chronicle_types::{EntityId, Topic};

use crate::PlayerError;

/// Topic every snapshot record is stored under, regardless of the entity
/// type it snapshots — the snapshot stream is keyed by entity id already,
/// so there's nothing further to discriminate on.
const SNAPSHOT_TOPIC: &str = "chronicle#Snapshot";

/// Field name holding the entity's version at the moment the snapshot was
/// taken.
const VERSION_FIELD: &str = "__version__";

/// Field name holding the serialized entity state.
const STATE_FIELD: &str = "__state__";

/// Persists and retrieves entity snapshots, sharing a backend with an
/// [`EventStore`] but writing to a distinct logical stream per entity.
pub struct SnapshotService<B: LogBackend> {
    store: EventStore<B>,
}

impl<B: LogBackend> Clone for SnapshotService<B> {
    fn clone(&self) -> Self {
        Self { store: self.store.clone() }
    }
}

impl<B: LogBackend> SnapshotService<B> {
    /// Build a snapshot service sharing `store`'s backend.
    pub fn new(store: EventStore<B>) -> Self {
        Self { store }
    }

    /// Serialize `state` and persist it as the entity's most recent
    /// snapshot, recording the version it was taken at.
    pub async fn take_snapshot<S: Serialize>(
        &self,
        entity_id: EntityId,
        at_version: u64,
        state: &S,
    ) -> Result<(), PlayerError> {
        let mut fields = Map::new();
        fields.insert(VERSION_FIELD.to_string(), Value::from(at_version));
        fields.insert(STATE_FIELD.to_string(), serde_json::to_value(state).map_err(|e| {
            PlayerError::EventStore(chronicle_eventstore::EventStoreError::Codec(
                chronicle_codec::CodecError::EncoderTypeError(e.to_string()),
            ))
        })?);

        let stream = StreamId::snapshot(&entity_id);
        let snapshot_version = self.next_snapshot_version(&stream).await?;
        let bytes = serde_json::to_vec(&fields).map_err(|e| {
            PlayerError::EventStore(chronicle_eventstore::EventStoreError::Codec(
                chronicle_codec::CodecError::EncoderTypeError(e.to_string()),
            ))
        })?;
        let record = NewStoredEvent::new(stream, snapshot_version, Topic::new(SNAPSHOT_TOPIC), bytes);
        self.store.backend().insert_events(vec![record]).await.map_err(|e| {
            PlayerError::EventStore(chronicle_eventstore::EventStoreError::Storage(e))
        })?;
        Ok(())
    }

    /// Fetch the most recent snapshot for `entity_id`, decoded into `S`,
    /// paired with the entity version it was taken at. Returns `None` if no
    /// snapshot has ever been taken.
    pub async fn get_snapshot<S: DeserializeOwned>(
        &self,
        entity_id: EntityId,
    ) -> Result<Option<(S, u64)>, PlayerError> {
        let stream = StreamId::snapshot(&entity_id);
        let stored = self
            .store
            .backend()
            .select_events(&stream, SelectEventsQuery::most_recent())
            .await
            .map_err(|e| PlayerError::EventStore(chronicle_eventstore::EventStoreError::Storage(e)))?;

        let Some(record) = stored.into_iter().next() else {
            return Ok(None);
        };

        let fields: Map<String, Value> = serde_json::from_slice(&record.state).map_err(|e| {
            PlayerError::EventStore(chronicle_eventstore::EventStoreError::Codec(
                chronicle_codec::CodecError::DecodeFailed(e.to_string()),
            ))
        })?;

        let at_version = fields
            .get(VERSION_FIELD)
            .and_then(|v| v.as_u64())
            .ok_or_else(|| PlayerError::LogIntegrity {
                entity_id,
                reason: format!("snapshot record is missing `{VERSION_FIELD}`"),
            })?;
        let state_value = fields.get(STATE_FIELD).cloned().ok_or_else(|| PlayerError::LogIntegrity {
            entity_id,
            reason: format!("snapshot record is missing `{STATE_FIELD}`"),
        })?;
        let state = serde_json::from_value(state_value).map_err(|e| {
            PlayerError::EventStore(chronicle_eventstore::EventStoreError::Codec(
                chronicle_codec::CodecError::DecodeFailed(e.to_string()),
            ))
        })?;

        Ok(Some((state, at_version)))
    }

    async fn next_snapshot_version(&self, stream: &StreamId) -> Result<u64, PlayerError> {
        let latest = self
            .store
            .backend()
            .select_events(stream, SelectEventsQuery::most_recent())
            .await
            .map_err(|e| PlayerError::EventStore(chronicle_eventstore::EventStoreError::Storage(e)))?;
        Ok(latest.into_iter().next().map(|r| r.originator_version + 1).unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chronicle_store_memory::MemoryBackend;
    use serde::Deserialize;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Account {
        balance: i64,
    }

    #[tokio::test]
    async fn round_trips_a_snapshot() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        let service = SnapshotService::new(store);
        let id = EntityId::new();

        service.take_snapshot(id, 4, &Account { balance: 250 }).await.unwrap();

        let (state, version): (Account, u64) = service.get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(state, Account { balance: 250 });
        assert_eq!(version, 4);
    }

    #[tokio::test]
    async fn missing_snapshot_is_none() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        let service = SnapshotService::new(store);
        let result: Option<(Account, u64)> = service.get_snapshot(EntityId::new()).await.unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn later_snapshot_supersedes_earlier_one() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        let service = SnapshotService::new(store);
        let id = EntityId::new();

        service.take_snapshot(id, 0, &Account { balance: 0 }).await.unwrap();
        service.take_snapshot(id, 3, &Account { balance: 90 }).await.unwrap();

        let (state, version): (Account, u64) = service.get_snapshot(id).await.unwrap().unwrap();
        assert_eq!(state, Account { balance: 90 });
        assert_eq!(version, 3);
    }

    #[tokio::test]
    async fn snapshot_stream_does_not_interleave_with_event_stream() {
        let store = EventStore::new(Arc::new(MemoryBackend::new()));
        let service = SnapshotService::new(store.clone());
        let id = EntityId::new();

        store
            .append(&chronicle_types::DomainEvent::new(
                id,
                0,
                Topic::new("acct#Opened"),
                Map::new(),
            ))
            .await
            .unwrap();
        service.take_snapshot(id, 0, &Account { balance: 0 }).await.unwrap();

        let events = store.get_events(id, None).await.unwrap();
        assert_eq!(events.len(), 1);
    }
}
