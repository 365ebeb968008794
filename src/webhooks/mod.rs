//! Webhook intake for source-control events.
//!
//! This module provides:
//! - Signature verification for webhook payloads (HMAC-SHA256)
//! - Total classification of verified payloads into typed [`Event`]s

pub mod classify;
pub mod events;
pub mod verify;

pub use classify::classify;
pub use events::{
    BranchRef, Commit, Event, EventKind, MergeEvent, PullRequestAction, PullRequestEvent,
    PushEvent, UnknownEvent,
};
pub use verify::{
    compute_signature, format_signature_header, parse_signature_header, verify, VerificationError,
    VerifiedPayload,
};
