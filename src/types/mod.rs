//! Core domain types for the webhook receiver.
//!
//! This module contains the fundamental types used throughout the crate,
//! designed to encode invariants via the type system.

pub mod delivery;
pub mod ids;

// Re-export commonly used types at the module level
pub use delivery::{Delivery, DeliveryReceipt, DeliveryStatus, DeliverySummary, HandlerOutcome};
pub use ids::{DeliveryId, PayloadHash, PrNumber, Sha};
