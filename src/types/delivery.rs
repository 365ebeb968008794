//! Delivery records and their processing lifecycle.
//!
//! A `Delivery` is the store-side view of one inbound webhook request: when it
//! arrived, whether its signature checked out, what its handlers did with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DeliveryId, PayloadHash};

/// The processing status of a delivery.
///
/// Transitions are monotonic: `Pending` moves to exactly one of the other
/// states. `Processed` and `Duplicate` are final. `Failed` may move to
/// `Processed` (or stay `Failed`) when the sender re-delivers and the retry
/// succeeds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Recorded but not yet dispatched to completion.
    Pending,

    /// Every handler in the chain succeeded.
    Processed,

    /// At least one handler failed; eligible for external re-delivery.
    Failed,

    /// The payload was already processed under a different delivery ID.
    Duplicate,
}

impl DeliveryStatus {
    /// Returns true if no further dispatch may touch this record.
    pub fn is_terminal(&self) -> bool {
        matches!(self, DeliveryStatus::Processed | DeliveryStatus::Duplicate)
    }

    /// Returns true if an external re-delivery would re-run handlers.
    pub fn is_retriable(&self) -> bool {
        matches!(self, DeliveryStatus::Pending | DeliveryStatus::Failed)
    }
}

/// The outcome of one handler invocation within a delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HandlerOutcome {
    /// The registered handler name.
    pub handler: String,

    /// The failure message, or `None` if the handler succeeded.
    pub error: Option<String>,
}

impl HandlerOutcome {
    pub fn succeeded(handler: impl Into<String>) -> Self {
        HandlerOutcome {
            handler: handler.into(),
            error: None,
        }
    }

    pub fn failed(handler: impl Into<String>, error: impl Into<String>) -> Self {
        HandlerOutcome {
            handler: handler.into(),
            error: Some(error.into()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-delivery record of handler results.
///
/// On a retried delivery the summary is merged: outcomes for re-run handlers
/// replace their previous entries (matched by handler name), everything else
/// is carried over unchanged. Handler names are therefore expected to be
/// unique within a registry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySummary {
    pub outcomes: Vec<HandlerOutcome>,
}

impl DeliverySummary {
    pub fn new(outcomes: Vec<HandlerOutcome>) -> Self {
        DeliverySummary { outcomes }
    }

    /// Number of handlers that failed.
    pub fn failure_count(&self) -> usize {
        self.outcomes.iter().filter(|o| o.is_failure()).count()
    }

    /// Returns true if every recorded handler succeeded (vacuously true for
    /// an empty chain).
    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }

    /// Names of the handlers that failed, in invocation order.
    pub fn failed_handlers(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|o| o.is_failure())
            .map(|o| o.handler.as_str())
    }

    /// Merges a newer attempt over this summary.
    ///
    /// Entries in `newer` replace same-named entries in `self` in place
    /// (preserving the original invocation order); handlers that only appear
    /// in `newer` are appended.
    pub fn merge(mut self, newer: DeliverySummary) -> DeliverySummary {
        let mut fresh = Vec::new();
        for outcome in newer.outcomes {
            match self
                .outcomes
                .iter_mut()
                .find(|o| o.handler == outcome.handler)
            {
                Some(existing) => *existing = outcome,
                None => fresh.push(outcome),
            }
        }
        self.outcomes.extend(fresh);
        self
    }
}

/// A new inbound delivery, as handed to the store's idempotent creator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub id: DeliveryId,
    pub payload_hash: PayloadHash,
    pub signature_valid: bool,
}

impl DeliveryReceipt {
    pub fn new(id: DeliveryId, payload_hash: PayloadHash, signature_valid: bool) -> Self {
        DeliveryReceipt {
            id,
            payload_hash,
            signature_valid,
        }
    }
}

/// One recorded webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Delivery {
    /// The sender-assigned delivery ID. Immutable for the record's lifetime.
    pub id: DeliveryId,

    /// When the delivery was recorded.
    pub received_at: DateTime<Utc>,

    /// Whether the signature header verified against the shared secret.
    pub signature_valid: bool,

    /// SHA-256 of the raw request body; the replay-detection key.
    pub payload_hash: PayloadHash,

    /// Current lifecycle status.
    pub status: DeliveryStatus,

    /// Number of dispatch attempts that reached the handler chain.
    pub attempts: u32,

    /// When the record reached `Processed`, `Failed`, or `Duplicate`.
    pub completed_at: Option<DateTime<Utc>>,

    /// The already-processed delivery this one duplicates, when known.
    pub duplicate_of: Option<DeliveryId>,

    /// Handler outcomes, merged across retry attempts.
    pub summary: Option<DeliverySummary>,
}

impl Delivery {
    /// Creates a fresh `Pending` record from a receipt.
    pub fn pending(receipt: DeliveryReceipt, received_at: DateTime<Utc>) -> Self {
        Delivery {
            id: receipt.id,
            received_at,
            signature_valid: receipt.signature_valid,
            payload_hash: receipt.payload_hash,
            status: DeliveryStatus::Pending,
            attempts: 0,
            completed_at: None,
            duplicate_of: None,
            summary: None,
        }
    }
}
