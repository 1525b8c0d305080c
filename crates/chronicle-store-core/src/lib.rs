#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-store-core** – Core storage abstractions for Chronicle.
//!
//! This crate defines the append-only log's contract without providing a
//! concrete implementation. Drivers (in-memory, SQLite, Postgres) implement
//! [`LogBackend`] in their own crates; callers depend only on this crate and
//! swap the driver in at construction time.
//!
//! The log is keyed by [`StreamId`] rather than directly by
//! `chronicle_types::EntityId`: every entity's events live under the stream
//! named for its id, but a second, separate stream (`snapshot:<entity_id>`)
//! holds that entity's most recent snapshot. Both coexist in the same
//! backend and the same uniqueness/ordering guarantees apply to each.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use chronicle_types::{EntityId, Topic};

//─────────────────────────────
//  Stream identity
//─────────────────────────────

/// The backend-facing key for a stream of stored events.
///
/// Distinct from [`EntityId`] so that a single entity can own more than one
/// stream – its event stream and its snapshot stream – without the backend
/// needing to know anything about snapshots as a concept.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(String);

impl StreamId {
    /// The stream an entity's domain events are appended to.
    pub fn entity(id: &EntityId) -> Self {
        Self(id.to_string())
    }

    /// The stream an entity's snapshots are appended to.
    pub fn snapshot(id: &EntityId) -> Self {
        Self(format!("snapshot:{id}"))
    }

    /// Borrow the raw stream key.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for StreamId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for StreamId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for StreamId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

//─────────────────────────────
//  Stored event records
//─────────────────────────────

/// A record awaiting insertion into the log.
///
/// Carries no notification id: the backend assigns one, atomically, at
/// insert time, which is what makes the notification id a reliable global
/// ordering even under concurrent writers.
#[derive(Debug, Clone, PartialEq)]
pub struct NewStoredEvent {
    /// Stream this record belongs to.
    pub originator_id: StreamId,
    /// Version of the record within its stream (0-based, strictly
    /// sequential per stream).
    pub originator_version: u64,
    /// Topic naming the encoded event's type, for later resolution.
    pub topic: Topic,
    /// Canonical JSON bytes produced by the transcoder.
    pub state: Vec<u8>,
}

impl NewStoredEvent {
    /// Build a record ready for [`LogBackend::insert_events`].
    pub fn new(originator_id: StreamId, originator_version: u64, topic: Topic, state: Vec<u8>) -> Self {
        Self { originator_id, originator_version, topic, state }
    }
}

/// A record as persisted in the log, with backend-assigned identity.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredEvent {
    /// Global, monotonically increasing id assigned at insert time. Used to
    /// page through the whole log in commit order regardless of stream.
    pub notification_id: u64,
    /// Stream this record belongs to.
    pub originator_id: StreamId,
    /// Version of the record within its stream.
    pub originator_version: u64,
    /// Topic naming the encoded event's type.
    pub topic: Topic,
    /// Canonical JSON bytes produced by the transcoder.
    pub state: Vec<u8>,
    /// Wall-clock time the backend accepted the record.
    pub timestamp: DateTime<Utc>,
}

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Errors that can occur during log operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// Insertion would have produced two records with the same
    /// `(originator_id, originator_version)` – another writer beat this one
    /// to that version. Callers should re-read the stream and retry.
    #[error("concurrency conflict writing version {version} of stream {stream}")]
    ConcurrencyConflict {
        /// Stream where the conflicting version was attempted.
        stream: String,
        /// Version that was already taken.
        version: u64,
    },
    /// The backend failed for a reason unrelated to concurrency (I/O,
    /// connection loss, a malformed row, etc).
    #[error("storage backend operation failed: {0}")]
    BackendError(String),
}

//─────────────────────────────
//  Queries
//─────────────────────────────

/// Bounds and ordering for [`LogBackend::select_events`].
///
/// The default (`SelectEventsQuery::default()`) returns every record in a
/// stream, ascending by version.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SelectEventsQuery {
    /// Only return records with `originator_version > after_version`.
    pub after_version: Option<u64>,
    /// Only return records with `originator_version <= before_or_eq_version`.
    pub before_or_eq_version: Option<u64>,
    /// Cap the number of records returned.
    pub limit: Option<usize>,
    /// Return records in descending version order instead of ascending.
    pub descending: bool,
}

impl SelectEventsQuery {
    /// The query `get_most_recent_event` uses: the single highest-version
    /// record in the stream.
    pub fn most_recent() -> Self {
        Self { limit: Some(1), descending: true, ..Self::default() }
    }
}

//─────────────────────────────
//  Log backend trait
//─────────────────────────────

/// Abstraction over an append-only, per-stream event log with a global
/// notification ordering.
///
/// Implementations must uphold two invariants: inserting a batch of records
/// is atomic (all records land, or none do), and `(originator_id,
/// originator_version)` is enforced unique across the whole log, which is
/// what gives callers optimistic concurrency control for free.
#[async_trait]
pub trait LogBackend: Send + Sync {
    /// Install the backend's schema, if it has one. Idempotent: safe to
    /// call on every startup.
    async fn create_table(&self) -> Result<(), StorageError>;

    /// Atomically append a batch of records.
    ///
    /// Fails with [`StorageError::ConcurrencyConflict`] if any record's
    /// `(originator_id, originator_version)` is already taken; in that case
    /// none of the batch is persisted.
    async fn insert_events(&self, events: Vec<NewStoredEvent>) -> Result<(), StorageError>;

    /// Read a stream's records matching `query`.
    async fn select_events(
        &self,
        stream: &StreamId,
        query: SelectEventsQuery,
    ) -> Result<Vec<StoredEvent>, StorageError>;

    /// Read up to `limit` records with `notification_id` in
    /// `[start, start + limit)`, in ascending notification order, across
    /// every stream. Returns fewer than `limit` once the tail of the log is
    /// reached; never skips an already-assigned id in that range.
    async fn select_notifications(
        &self,
        start: u64,
        limit: usize,
    ) -> Result<Vec<StoredEvent>, StorageError>;

    /// The highest notification id assigned so far, or `0` if the log is
    /// empty.
    async fn max_notification_id(&self) -> Result<u64, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_stream_is_distinct_from_entity_stream() {
        let id = EntityId::new();
        assert_ne!(StreamId::entity(&id), StreamId::snapshot(&id));
        assert!(StreamId::snapshot(&id).as_str().starts_with("snapshot:"));
    }

    #[test]
    fn stream_id_display_matches_backend_key() {
        let stream = StreamId::from("acct-1");
        assert_eq!(stream.to_string(), "acct-1");
    }
}
