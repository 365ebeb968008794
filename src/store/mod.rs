//! Delivery persistence.
//!
//! The store is the system of record for delivery state and the gate that
//! keeps two dispatches of the same delivery from running concurrently. The
//! [`DeliveryStore`] trait abstracts the backing key-value storage; the
//! in-memory implementation ships here, and a durable backend plugs in behind
//! the same trait.
//!
//! # Claim Protocol
//!
//! Every dispatch follows **claim → run handlers → mark or release**:
//!
//! 1. [`claim`](DeliveryStore::claim) takes the per-delivery lock. At most one
//!    caller holds it at a time.
//! 2. `mark_processed` / `mark_failed` / `mark_duplicate` record the result
//!    and drop the claim in one step.
//! 3. [`release`](DeliveryStore::release) drops the claim without recording
//!    anything (the cancellation path).

mod memory;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{
    Delivery, DeliveryId, DeliveryReceipt, DeliveryStatus, DeliverySummary, PayloadHash,
};

pub use memory::InMemoryDeliveryStore;

/// How long a payload hash stays in the replay index before pruning.
pub const DEFAULT_REPLAY_TTL_HOURS: i64 = 24;

/// Errors from the delivery store.
///
/// Both variants are transient from the sender's point of view: the delivery
/// was not consumed, and the sender should redeliver.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backing storage cannot be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The operation does not fit the record's current state.
    #[error("store conflict: {0}")]
    Conflict(String),
}

/// Result of recording an inbound delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordOutcome {
    /// First sighting of this delivery ID; a pending record was created.
    Created,
    /// The ID was already on file. The existing record is untouched.
    AlreadyRecorded(DeliveryStatus),
}

/// Result of attempting to claim a delivery for dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The caller now holds the claim and must mark or release it.
    Acquired,
    /// The record already reached a terminal status; nothing to run.
    AlreadyTerminal(DeliveryStatus),
    /// Another dispatch currently holds the claim.
    Busy,
    /// No record exists for this ID.
    NotFound,
}

/// Storage abstraction for delivery records.
///
/// Implementations must make each method atomic with respect to the others:
/// the claim gate only excludes concurrent dispatches if `claim` and the
/// `mark_*` methods observe a consistent record.
#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Records an inbound delivery as `Pending`.
    ///
    /// Re-recording a known ID is not an error; the existing record wins and
    /// its status is reported so the caller can short-circuit.
    async fn record_received(&self, receipt: DeliveryReceipt) -> Result<RecordOutcome, StoreError>;

    /// Looks up the status of a delivery.
    async fn status(&self, id: &DeliveryId) -> Result<Option<DeliveryStatus>, StoreError>;

    /// Fetches the full delivery record.
    async fn get(&self, id: &DeliveryId) -> Result<Option<Delivery>, StoreError>;

    /// Attempts to claim a delivery for dispatch.
    async fn claim(&self, id: &DeliveryId) -> Result<ClaimOutcome, StoreError>;

    /// Drops a held claim without recording a result.
    ///
    /// The record keeps its current status and stays claimable.
    async fn release(&self, id: &DeliveryId) -> Result<(), StoreError>;

    /// Marks a claimed delivery as `Processed` and drops the claim.
    ///
    /// The attempt's summary is merged over any earlier attempt's outcomes.
    /// Fails with [`StoreError::Conflict`] if the record is already terminal.
    async fn mark_processed(
        &self,
        id: &DeliveryId,
        summary: DeliverySummary,
    ) -> Result<(), StoreError>;

    /// Marks a claimed delivery as `Failed` and drops the claim.
    ///
    /// `Failed` is not terminal: the record can be claimed again for retry,
    /// and each retry's summary is merged over the previous one.
    async fn mark_failed(
        &self,
        id: &DeliveryId,
        summary: DeliverySummary,
    ) -> Result<(), StoreError>;

    /// Marks a claimed delivery as `Duplicate` of `original` and drops the
    /// claim.
    async fn mark_duplicate(
        &self,
        id: &DeliveryId,
        original: DeliveryId,
    ) -> Result<(), StoreError>;

    /// Returns the delivery that first carried `hash`, if it was a different
    /// delivery than `id`.
    ///
    /// `None` means `id` is not a payload replay: either the hash is fresh,
    /// `id` itself was the first carrier, or the index entry already expired.
    async fn replay_of(
        &self,
        hash: &PayloadHash,
        id: &DeliveryId,
    ) -> Result<Option<DeliveryId>, StoreError>;

    /// Prunes replay-index entries older than `ttl_hours`.
    ///
    /// Returns the number of entries removed.
    async fn prune_replay_index(&self, ttl_hours: i64) -> Result<usize, StoreError>;
}
