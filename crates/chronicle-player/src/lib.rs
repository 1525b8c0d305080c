#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **chronicle-player** – Entity reconstructor and snapshot service for
//! Chronicle (spec components 4.H, 4.I).
//!
//! [`Player::play`] folds an entity's event stream through a caller-supplied
//! mutator to rebuild its current state, optionally short-circuiting from a
//! [`SnapshotService`]-provided snapshot instead of replaying from the
//! beginning. [`Player::play_chained`] additionally verifies a
//! `__previous_hash__` hash chain while folding, for domains that opt into
//! tamper-evidence.

use serde::de::DeserializeOwned;
use tracing::{trace, warn};

use chronicle_eventstore::{EventStore, EventStoreError};
use chronicle_store_core::LogBackend;
use chronicle_types::{DomainEvent, EntityId};

pub mod snapshot;

pub use snapshot::SnapshotService;

/// Number of events fetched per page when no explicit page size is
/// configured.
const DEFAULT_PAGE_SIZE: usize = 1000;

//─────────────────────────────
//  Errors
//─────────────────────────────

/// Failures raised by [`Player::play`] / [`Player::play_chained`].
#[derive(Debug, thiserror::Error)]
pub enum PlayerError {
    /// The event store or codec failed underneath the player.
    #[error(transparent)]
    EventStore(#[from] EventStoreError),
    /// Folding finished with no state — either the entity never existed, or
    /// its mutator chain ended in `None` (e.g. a `Discarded` event).
    #[error("entity {0} not found")]
    EntityNotFound(EntityId),
    /// The event stream was not strictly consecutive from its starting
    /// version, or (in [`Player::play_chained`]) a `__previous_hash__`
    /// value didn't match the hash of the prior event.
    #[error("log integrity violation for entity {entity_id}: {reason}")]
    LogIntegrity {
        /// The entity whose stream failed the check.
        entity_id: EntityId,
        /// Human-readable description of what was expected vs. found.
        reason: String,
    },
}

//─────────────────────────────
//  Mutator
//─────────────────────────────

/// Folds one event into an entity's state, or `None` to signal the entity's
/// state has ended (e.g. after a `Discarded`/`Closed` event).
///
/// Implemented automatically for any matching closure.
pub trait Mutator<S> {
    /// Apply `event` to `state`, returning the next state.
    fn apply(&self, state: Option<S>, event: &DomainEvent) -> Option<S>;
}

impl<F, S> Mutator<S> for F
where
    F: Fn(Option<S>, &DomainEvent) -> Option<S>,
{
    fn apply(&self, state: Option<S>, event: &DomainEvent) -> Option<S> {
        self(state, event)
    }
}

//─────────────────────────────
//  Hash chain
//─────────────────────────────

/// Payload field name carrying the previous event's chain hash.
pub const PREVIOUS_HASH_FIELD: &str = "__previous_hash__";

/// The chain hash a stream's first event is expected to reference.
pub fn genesis_hash() -> blake3::Hash {
    blake3::hash(b"")
}

fn chain_hash_of(event: &DomainEvent) -> Result<blake3::Hash, EventStoreError> {
    let bytes = serde_json::to_vec(event.payload()).map_err(|e| {
        EventStoreError::Codec(chronicle_codec::CodecError::EncoderTypeError(e.to_string()))
    })?;
    Ok(blake3::hash(&bytes))
}

//─────────────────────────────
//  Player
//─────────────────────────────

/// Reconstructs entity state by folding its event stream, optionally
/// short-circuiting from a snapshot.
pub struct Player<B: LogBackend> {
    store: EventStore<B>,
    snapshots: Option<SnapshotService<B>>,
    page_size: usize,
}

impl<B: LogBackend> Player<B> {
    /// Build a player with no snapshot service and the default page size.
    pub fn new(store: EventStore<B>) -> Self {
        Self { store, snapshots: None, page_size: DEFAULT_PAGE_SIZE }
    }

    /// Attach a snapshot service: [`Player::play`] will fetch a snapshot
    /// before replaying events, short-circuiting the fold to start from the
    /// snapshot's version instead of the beginning of the stream.
    pub fn with_snapshots(mut self, snapshots: SnapshotService<B>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    /// Override the number of events fetched per page during replay.
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Reconstruct an entity's state by folding its events through
    /// `mutator`.
    ///
    /// Fails with [`PlayerError::EntityNotFound`] if the fold never
    /// produces a state (no events, or the mutator chain ends in `None`),
    /// and with [`PlayerError::LogIntegrity`] if the stream's versions
    /// aren't strictly consecutive starting just after the snapshot (or
    /// from `0`, with no snapshot).
    pub async fn play<S, M>(&self, entity_id: EntityId, mutator: M) -> Result<S, PlayerError>
    where
        S: DeserializeOwned + Send,
        M: Mutator<S>,
    {
        self.fold(entity_id, mutator, None).await
    }

    /// Like [`Player::play`], but additionally verifies the
    /// [`PREVIOUS_HASH_FIELD`] hash chain while folding, failing with
    /// [`PlayerError::LogIntegrity`] on the first mismatch.
    pub async fn play_chained<S, M>(&self, entity_id: EntityId, mutator: M) -> Result<S, PlayerError>
    where
        S: DeserializeOwned + Send,
        M: Mutator<S>,
    {
        self.fold(entity_id, mutator, Some(genesis_hash())).await
    }

    async fn fold<S, M>(
        &self,
        entity_id: EntityId,
        mutator: M,
        mut expected_hash: Option<blake3::Hash>,
    ) -> Result<S, PlayerError>
    where
        S: DeserializeOwned + Send,
        M: Mutator<S>,
    {
        let (mut state, mut after_version) = match &self.snapshots {
            Some(svc) => match svc.get_snapshot::<S>(entity_id).await? {
                Some((state, version)) => (Some(state), Some(version)),
                None => (None, None),
            },
            None => (None, None),
        };
        let mut next_version = after_version.map(|v| v + 1).unwrap_or(0);

        loop {
            let page = self.store.get_events_page(entity_id, after_version, Some(self.page_size)).await?;
            if page.is_empty() {
                break;
            }
            let page_len = page.len();

            for event in &page {
                if event.entity_version() != next_version {
                    warn!(%entity_id, next_version, found = event.entity_version(), "version gap during replay");
                    return Err(PlayerError::LogIntegrity {
                        entity_id,
                        reason: format!("expected version {next_version}, found {}", event.entity_version()),
                    });
                }

                if let Some(expected) = expected_hash {
                    verify_chain_link(entity_id, event, expected)?;
                    expected_hash = Some(chain_hash_of(event)?);
                }

                state = mutator.apply(state, event);
                next_version += 1;
            }

            after_version = Some(next_version - 1);
            if page_len < self.page_size {
                break;
            }
        }

        if state.is_none() {
            trace!(%entity_id, "replay produced no state");
        }
        state.ok_or(PlayerError::EntityNotFound(entity_id))
    }
}

fn verify_chain_link(entity_id: EntityId, event: &DomainEvent, expected: blake3::Hash) -> Result<(), PlayerError> {
    let recorded = event
        .payload()
        .get(PREVIOUS_HASH_FIELD)
        .and_then(|v| v.as_str())
        .ok_or_else(|| PlayerError::LogIntegrity {
            entity_id,
            reason: format!("event at version {} is missing `{PREVIOUS_HASH_FIELD}`", event.entity_version()),
        })?;
    if recorded != expected.to_hex().as_str() {
        warn!(%entity_id, version = event.entity_version(), "hash chain mismatch during replay");
        return Err(PlayerError::LogIntegrity {
            entity_id,
            reason: format!(
                "event at version {} carries previous-hash {recorded}, expected {}",
                event.entity_version(),
                expected.to_hex()
            ),
        });
    }
    Ok(())
}
