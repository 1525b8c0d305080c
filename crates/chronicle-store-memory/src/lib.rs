#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-store-memory** – In-memory log backend for Chronicle.
//!
//! A fast, non-persistent [`LogBackend`] suitable for tests and development.
//! All state lives behind a single lock, which makes the optimistic
//! concurrency check trivial: a batch either finds every requested version
//! free and commits as a whole, or the whole batch is rejected.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::{broadcast, RwLock};
use tracing::trace;

use chronicle_store_core::{LogBackend, NewStoredEvent, SelectEventsQuery, StorageError, StoredEvent, StreamId};

/// Default buffer size for the live event broadcast channel.
const DEFAULT_BUFFER: usize = 1024;

struct Inner {
    log: Vec<StoredEvent>,
    by_stream: HashMap<StreamId, Vec<usize>>,
}

/// An in-memory, non-persistent event log.
///
/// Also exposes a live broadcast stream of freshly-committed records, used
/// by `chronicle-bus` to bridge durable appends back into in-process
/// subscribers.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<RwLock<Inner>>,
    broadcast_tx: broadcast::Sender<StoredEvent>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Creates a new, empty in-memory log.
    pub fn new() -> Self {
        Self::with_buffer_size(DEFAULT_BUFFER)
    }

    /// Creates a new in-memory log with a custom broadcast buffer size.
    pub fn with_buffer_size(buffer_size: usize) -> Self {
        let (broadcast_tx, _) = broadcast::channel(buffer_size);
        Self {
            inner: Arc::new(RwLock::new(Inner { log: Vec::new(), by_stream: HashMap::new() })),
            broadcast_tx,
        }
    }

    /// Subscribe to the live stream of committed records.
    pub fn subscribe(&self) -> broadcast::Receiver<StoredEvent> {
        self.broadcast_tx.subscribe()
    }

    /// Total number of records committed so far.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.log.len()
    }
}

#[async_trait::async_trait]
impl LogBackend for MemoryBackend {
    async fn create_table(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn insert_events(&self, events: Vec<NewStoredEvent>) -> Result<(), StorageError> {
        if events.is_empty() {
            return Ok(());
        }

        let mut inner = self.inner.write().await;

        let mut seen_in_batch: HashMap<&StreamId, Vec<u64>> = HashMap::new();
        for event in &events {
            let already_stored = inner
                .by_stream
                .get(&event.originator_id)
                .map(|indices| indices.iter().any(|&idx| inner.log[idx].originator_version == event.originator_version))
                .unwrap_or(false);
            let already_in_batch = seen_in_batch
                .get(&event.originator_id)
                .map(|versions| versions.contains(&event.originator_version))
                .unwrap_or(false);
            if already_stored || already_in_batch {
                return Err(StorageError::ConcurrencyConflict {
                    stream: event.originator_id.to_string(),
                    version: event.originator_version,
                });
            }
            seen_in_batch.entry(&event.originator_id).or_default().push(event.originator_version);
        }

        for event in events {
            let notification_id = inner.log.len() as u64 + 1;
            let stored = StoredEvent {
                notification_id,
                originator_id: event.originator_id,
                originator_version: event.originator_version,
                topic: event.topic,
                state: event.state,
                timestamp: Utc::now(),
            };
            let idx = inner.log.len();
            inner.by_stream.entry(stored.originator_id.clone()).or_default().push(idx);
            inner.log.push(stored.clone());
            trace!(stream = %stored.originator_id, version = stored.originator_version, "committed event");
            let _ = self.broadcast_tx.send(stored);
        }

        Ok(())
    }

    async fn select_events(&self, stream: &StreamId, query: SelectEventsQuery) -> Result<Vec<StoredEvent>, StorageError> {
        let inner = self.inner.read().await;
        let mut events: Vec<StoredEvent> = inner
            .by_stream
            .get(stream)
            .into_iter()
            .flatten()
            .map(|&idx| inner.log[idx].clone())
            .filter(|e| query.after_version.map(|v| e.originator_version > v).unwrap_or(true))
            .filter(|e| query.before_or_eq_version.map(|v| e.originator_version <= v).unwrap_or(true))
            .collect();
        events.sort_by_key(|e| e.originator_version);
        if query.descending {
            events.reverse();
        }
        if let Some(limit) = query.limit {
            events.truncate(limit);
        }
        Ok(events)
    }

    async fn select_notifications(&self, start: u64, limit: usize) -> Result<Vec<StoredEvent>, StorageError> {
        let inner = self.inner.read().await;
        Ok(inner
            .log
            .iter()
            .filter(|e| e.notification_id >= start)
            .take(limit)
            .cloned()
            .collect())
    }

    async fn max_notification_id(&self) -> Result<u64, StorageError> {
        Ok(self.inner.read().await.log.len() as u64)
    }
}
