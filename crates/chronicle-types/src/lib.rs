#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-types** – Shared primitive data model for Chronicle.
//!
//! This crate sits at the bottom of the crate graph: it defines the
//! [`EntityId`], [`Topic`] and [`DomainEvent`] value types shared by every
//! other Chronicle crate, and makes no assumptions about I/O, persistence,
//! or wire formats. Storage, codec, and bus crates depend on this one, never
//! the reverse.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

//─────────────────────────────
//  Entity identity
//─────────────────────────────

/// Opaque identifier for an event-sourced entity.
///
/// Backed by a UUID as recommended by the data model; construct with
/// [`EntityId::new`] for a fresh random id or [`EntityId::from`] to wrap an
/// id recovered from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(Uuid);

impl EntityId {
    /// Generate a fresh, random entity id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// The underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for EntityId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

//─────────────────────────────
//  Topic (stable discriminator)
//─────────────────────────────

/// A stable string discriminator identifying an event kind (or any other
/// registered class) across processes.
///
/// Produced by the topic registry (`chronicle-topic`); stored verbatim as
/// [`DomainEvent::kind`] and, once encoded, as the stored-event `topic`
/// field. See §6 of the design notes for the `"<module path>#<qualified
/// name>"` format.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Topic(String);

impl Topic {
    /// Wrap an already-formatted topic string.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the topic as a plain string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Topic {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Topic {
    fn from(value: &str) -> Self {
        Self(value.to_owned())
    }
}

//─────────────────────────────
//  DomainEvent
//─────────────────────────────

/// An immutable fact recording a state transition of an entity.
///
/// Once constructed, a `DomainEvent` is frozen: there are no setters, only
/// accessors. Equality and hashing are structural over `(kind, all
/// fields)`, matching the invariant in the data model – two events compare
/// equal iff they carry the same kind, entity id, version, timestamp and
/// payload.
///
/// The payload is an open field map (`serde_json::Map`) rather than a
/// statically typed struct: this keeps the type usable as a generic
/// infrastructure primitive, with strongly typed domain events round-tripped
/// through it by the transcoder (`chronicle-codec`).
#[derive(Debug, Clone, PartialEq)]
pub struct DomainEvent {
    entity_id: EntityId,
    entity_version: u64,
    timestamp: DateTime<Utc>,
    kind: Topic,
    payload: Map<String, Value>,
}

impl DomainEvent {
    /// Construct a new domain event, stamping it with the current wall-clock
    /// time.
    ///
    /// The first event of an entity's life must use `entity_version == 0`;
    /// the backend enforces strictly increasing, gap-free versions per
    /// entity on append.
    pub fn new(
        entity_id: EntityId,
        entity_version: u64,
        kind: Topic,
        payload: Map<String, Value>,
    ) -> Self {
        Self::with_timestamp(entity_id, entity_version, kind, payload, Utc::now())
    }

    /// Construct a new domain event with an explicit timestamp.
    ///
    /// Mainly useful for tests and for replaying events recovered from
    /// storage, where the original timestamp must be preserved rather than
    /// overwritten with "now".
    pub fn with_timestamp(
        entity_id: EntityId,
        entity_version: u64,
        kind: Topic,
        payload: Map<String, Value>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            entity_id,
            entity_version,
            timestamp,
            kind,
            payload,
        }
    }

    /// The entity this event belongs to.
    pub fn entity_id(&self) -> EntityId {
        self.entity_id
    }

    /// The post-condition version this event sets on the entity.
    pub fn entity_version(&self) -> u64 {
        self.entity_version
    }

    /// Wall-clock instant the event was constructed (or recovered from
    /// storage).
    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    /// The event's stable discriminator.
    pub fn kind(&self) -> &Topic {
        &self.kind
    }

    /// The event's field map.
    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Consume the event, yielding its field map.
    pub fn into_payload(self) -> Map<String, Value> {
        self.payload
    }
}

impl Eq for DomainEvent {}

impl Hash for DomainEvent {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.entity_id.hash(state);
        self.entity_version.hash(state);
        self.kind.hash(state);
        // `serde_json::Value` has no `Hash` impl; the payload map is
        // serialized to its canonical (sorted-key) byte form instead, which
        // is stable across processes because `Map` is BTreeMap-backed.
        let mut hasher = DefaultHasher::new();
        if let Ok(bytes) = serde_json::to_vec(&self.payload) {
            bytes.hash(&mut hasher);
        }
        hasher.finish().hash(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn payload(n: i64) -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("n".to_string(), json!(n));
        m
    }

    #[test]
    fn equality_is_structural() {
        let id = EntityId::new();
        let ts = Utc::now();
        let a = DomainEvent::with_timestamp(id, 0, Topic::new("t#A"), payload(1), ts);
        let b = DomainEvent::with_timestamp(id, 0, Topic::new("t#A"), payload(1), ts);
        let c = DomainEvent::with_timestamp(id, 0, Topic::new("t#A"), payload(2), ts);
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn accessors_reflect_constructor_arguments() {
        let id = EntityId::new();
        let event = DomainEvent::new(id, 3, Topic::new("acct#Credited"), payload(42));
        assert_eq!(event.entity_id(), id);
        assert_eq!(event.entity_version(), 3);
        assert_eq!(event.kind().as_str(), "acct#Credited");
        assert_eq!(event.payload().get("n"), Some(&json!(42)));
    }

    #[test]
    fn entity_id_roundtrips_through_string() {
        let id = EntityId::new();
        let printed = id.to_string();
        let parsed: EntityId = printed.parse().unwrap();
        assert_eq!(id, parsed);
    }
}
