//! In-memory delivery store.
//!
//! Backs the store trait with `HashMap`s behind a `tokio::sync::RwLock`.
//! Suitable for single-process deployments and tests; state does not survive
//! a restart.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::types::{
    Delivery, DeliveryId, DeliveryReceipt, DeliveryStatus, DeliverySummary, PayloadHash,
};

use super::{ClaimOutcome, DeliveryStore, RecordOutcome, StoreError};

/// A replay-index entry: which delivery first carried a payload hash, and
/// when, for TTL pruning.
#[derive(Debug, Clone)]
struct ReplayEntry {
    delivery_id: DeliveryId,
    recorded_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Inner {
    deliveries: HashMap<DeliveryId, Delivery>,
    /// Delivery IDs currently claimed by a dispatch.
    in_flight: HashSet<DeliveryId>,
    /// First carrier of each payload hash seen within the TTL window.
    replay_index: HashMap<PayloadHash, ReplayEntry>,
}

/// In-memory [`DeliveryStore`].
///
/// All operations take the single inner lock, so each is atomic with respect
/// to the others.
#[derive(Debug, Default)]
pub struct InMemoryDeliveryStore {
    inner: RwLock<Inner>,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of delivery records currently held.
    pub async fn len(&self) -> usize {
        self.inner.read().await.deliveries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.deliveries.is_empty()
    }

    #[cfg(test)]
    pub(crate) async fn backdate_replay_entry(&self, hash: &PayloadHash, recorded_at: DateTime<Utc>) {
        let mut inner = self.inner.write().await;
        if let Some(entry) = inner.replay_index.get_mut(hash) {
            entry.recorded_at = recorded_at;
        }
    }
}

/// Applies one attempt's summary on top of whatever earlier attempts left.
fn merged_summary(record: &mut Delivery, summary: DeliverySummary) {
    record.summary = Some(match record.summary.take() {
        Some(existing) => existing.merge(summary),
        None => summary,
    });
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn record_received(&self, receipt: DeliveryReceipt) -> Result<RecordOutcome, StoreError> {
        let mut inner = self.inner.write().await;

        if let Some(existing) = inner.deliveries.get(&receipt.id) {
            return Ok(RecordOutcome::AlreadyRecorded(existing.status));
        }

        let now = Utc::now();

        // First carrier of a hash owns the index entry; later deliveries with
        // the same hash are the replays.
        inner
            .replay_index
            .entry(receipt.payload_hash.clone())
            .or_insert_with(|| ReplayEntry {
                delivery_id: receipt.id.clone(),
                recorded_at: now,
            });

        let record = Delivery::pending(receipt, now);
        inner.deliveries.insert(record.id.clone(), record);

        Ok(RecordOutcome::Created)
    }

    async fn status(&self, id: &DeliveryId) -> Result<Option<DeliveryStatus>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.deliveries.get(id).map(|d| d.status))
    }

    async fn get(&self, id: &DeliveryId) -> Result<Option<Delivery>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner.deliveries.get(id).cloned())
    }

    async fn claim(&self, id: &DeliveryId) -> Result<ClaimOutcome, StoreError> {
        let mut inner = self.inner.write().await;

        let Some(record) = inner.deliveries.get(id) else {
            return Ok(ClaimOutcome::NotFound);
        };

        if record.status.is_terminal() {
            return Ok(ClaimOutcome::AlreadyTerminal(record.status));
        }

        if !inner.in_flight.insert(id.clone()) {
            return Ok(ClaimOutcome::Busy);
        }

        Ok(ClaimOutcome::Acquired)
    }

    async fn release(&self, id: &DeliveryId) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.in_flight.remove(id);
        Ok(())
    }

    async fn mark_processed(
        &self,
        id: &DeliveryId,
        summary: DeliverySummary,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.in_flight.remove(id);

        let record = inner
            .deliveries
            .get_mut(id)
            .ok_or_else(|| StoreError::Conflict(format!("unknown delivery {}", id)))?;

        if record.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "delivery {} is already {:?}",
                id, record.status
            )));
        }

        record.status = DeliveryStatus::Processed;
        record.attempts += 1;
        record.completed_at = Some(Utc::now());
        merged_summary(record, summary);

        Ok(())
    }

    async fn mark_failed(
        &self,
        id: &DeliveryId,
        summary: DeliverySummary,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.in_flight.remove(id);

        let record = inner
            .deliveries
            .get_mut(id)
            .ok_or_else(|| StoreError::Conflict(format!("unknown delivery {}", id)))?;

        if record.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "delivery {} is already {:?}",
                id, record.status
            )));
        }

        record.status = DeliveryStatus::Failed;
        record.attempts += 1;
        merged_summary(record, summary);

        Ok(())
    }

    async fn mark_duplicate(
        &self,
        id: &DeliveryId,
        original: DeliveryId,
    ) -> Result<(), StoreError> {
        let mut inner = self.inner.write().await;
        inner.in_flight.remove(id);

        let record = inner
            .deliveries
            .get_mut(id)
            .ok_or_else(|| StoreError::Conflict(format!("unknown delivery {}", id)))?;

        if record.status.is_terminal() {
            return Err(StoreError::Conflict(format!(
                "delivery {} is already {:?}",
                id, record.status
            )));
        }

        record.status = DeliveryStatus::Duplicate;
        record.completed_at = Some(Utc::now());
        record.duplicate_of = Some(original);

        Ok(())
    }

    async fn replay_of(
        &self,
        hash: &PayloadHash,
        id: &DeliveryId,
    ) -> Result<Option<DeliveryId>, StoreError> {
        let inner = self.inner.read().await;
        Ok(inner
            .replay_index
            .get(hash)
            .filter(|entry| entry.delivery_id != *id)
            .map(|entry| entry.delivery_id.clone()))
    }

    async fn prune_replay_index(&self, ttl_hours: i64) -> Result<usize, StoreError> {
        let mut inner = self.inner.write().await;
        let cutoff = Utc::now() - chrono::Duration::hours(ttl_hours);
        let before_len = inner.replay_index.len();
        inner
            .replay_index
            .retain(|_, entry| entry.recorded_at > cutoff);
        Ok(before_len - inner.replay_index.len())
    }
}
