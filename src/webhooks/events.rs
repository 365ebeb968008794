//! Typed webhook event representations.
//!
//! This module defines the internal event vocabulary of the receiver. Each
//! inbound delivery classifies into exactly one of these variants; handlers
//! register per [`EventKind`] and receive the typed event by reference.
//!
//! # Event Types
//!
//! - `Push` - commits pushed to a ref
//! - `PullRequest` - a pull request opened or synchronized
//! - `Merge` - a pull request closed with `merged = true`
//! - `Unknown` - the total-mapping catch-all for everything else

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::types::{PrNumber, Sha};

/// A classified webhook event.
///
/// `Unknown` is a first-class variant, not an error: classification is total,
/// and handlers may register for `Unknown` to observe unrecognized traffic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    /// Commits were pushed to a ref.
    Push(PushEvent),

    /// A pull request was opened or its head was updated.
    PullRequest(PullRequestEvent),

    /// A pull request was closed by merging.
    ///
    /// The provider delivers this as `pull_request` with `action = "closed"`
    /// and `merged = true`; classification surfaces it as its own variant so
    /// merge handlers never need to re-inspect the closed/merged flags.
    Merge(MergeEvent),

    /// Anything that did not match a known shape: unrecognized event-type
    /// headers, unhandled actions, and payloads missing required fields.
    Unknown(UnknownEvent),
}

impl Event {
    /// The registry key of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Event::Push(_) => EventKind::Push,
            Event::PullRequest(_) => EventKind::PullRequest,
            Event::Merge(_) => EventKind::Merge,
            Event::Unknown(_) => EventKind::Unknown,
        }
    }
}

/// The variant tag of an [`Event`], used as the handler-registry key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Push,
    PullRequest,
    Merge,
    Unknown,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventKind::Push => "push",
            EventKind::PullRequest => "pull_request",
            EventKind::Merge => "merge",
            EventKind::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// A commit carried in a push payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// The commit SHA.
    pub id: Sha,

    /// The commit message.
    pub message: String,

    /// The commit author's name.
    pub author: String,
}

/// One side of a pull request (head or base).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchRef {
    /// The branch name (e.g., "main" or "feature/login").
    pub ref_name: String,

    /// The head SHA of the branch.
    pub sha: Sha,
}

/// Commits pushed to a ref.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushEvent {
    /// The full ref that was pushed to (e.g., "refs/heads/main").
    pub ref_name: String,

    /// The name of the user who pushed.
    pub pusher: String,

    /// The new head commit after the push.
    ///
    /// Absent for pushes that delete a ref.
    pub head_commit: Option<Commit>,

    /// The commits contained in the push, oldest first.
    pub commits: Vec<Commit>,
}

/// Action performed on a pull request.
///
/// Only the actions this receiver dispatches on; everything else (reopened,
/// edited, unmerged close, ...) classifies as `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PullRequestAction {
    /// PR was opened.
    Opened,
    /// PR head was updated (new commits pushed).
    Synchronize,
}

/// A pull request was opened or synchronized.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestEvent {
    /// The PR number.
    pub number: PrNumber,

    /// The action that triggered this event.
    pub action: PullRequestAction,

    /// The PR's source branch.
    pub head: BranchRef,

    /// The branch the PR targets.
    pub base: BranchRef,
}

/// A pull request was closed by merging.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeEvent {
    /// The PR number.
    pub number: PrNumber,

    /// Login of the user who performed the merge.
    pub merged_by: String,

    /// When the merge happened, if the provider included it.
    pub merged_at: Option<DateTime<Utc>>,

    /// The PR's source branch at merge time.
    pub head: BranchRef,

    /// The branch the PR was merged into.
    pub base: BranchRef,
}

/// A delivery that did not match any known event shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnknownEvent {
    /// The raw event-type header value.
    pub event_type: String,

    /// The full verified payload, untouched.
    pub payload: serde_json::Value,
}
