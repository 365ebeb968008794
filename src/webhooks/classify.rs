//! Webhook payload classification.
//!
//! This module maps a verified payload plus its event-type header to a typed
//! [`Event`]. Classification is pure and total: every verified payload
//! produces exactly one variant, with `Unknown` as the catch-all. There is no
//! error path; a payload that does not fit a known shape is data, not a
//! failure, and handlers may register for `Unknown` to see it.
//!
//! # Classification Rules
//!
//! 1. Header `push` → [`Event::Push`]
//! 2. Header `pull_request`, action `opened`/`synchronize` → [`Event::PullRequest`]
//! 3. Header `pull_request`, action `closed` with `merged = true` → [`Event::Merge`]
//! 4. Anything else → [`Event::Unknown`], including unrecognized headers,
//!    unhandled actions, unmerged closes, and payloads missing required fields

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{PrNumber, Sha};

use super::events::{
    BranchRef, Commit, Event, MergeEvent, PullRequestAction, PullRequestEvent, PushEvent,
    UnknownEvent,
};
use super::verify::VerifiedPayload;

/// Classifies a verified payload into a typed event.
///
/// # Arguments
///
/// * `event_type` - The value of the event-type header
/// * `payload` - The verified, parsed delivery body
///
/// # Examples
///
/// ```
/// use hookwire::webhooks::{classify, compute_signature, format_signature_header, verify, Event};
///
/// let body = br#"{"ref":"refs/heads/main","pusher":{"name":"octocat"},"commits":[]}"#;
/// let secret = b"secret";
/// let header = format_signature_header(&compute_signature(body, secret));
/// let verified = verify(body, &header, secret).unwrap();
///
/// match classify("push", verified) {
///     Event::Push(push) => assert_eq!(push.ref_name, "refs/heads/main"),
///     other => panic!("expected Push, got {:?}", other),
/// }
/// ```
pub fn classify(event_type: &str, payload: VerifiedPayload) -> Event {
    let body = payload.into_body();

    let known = match event_type {
        "push" => classify_push(&body),
        "pull_request" => classify_pull_request(&body),
        // Unrecognized event types go straight to the catch-all
        _ => None,
    };

    known.unwrap_or_else(|| {
        Event::Unknown(UnknownEvent {
            event_type: event_type.to_string(),
            payload: body,
        })
    })
}

// ============================================================================
// Raw payload structures for deserialization
//
// These mirror the provider's webhook JSON. Fields the provider may omit are
// Option<T> (or defaulted); a payload missing a field that the target variant
// requires fails deserialization, and the caller falls back to Unknown.
// ============================================================================

#[derive(Debug, Deserialize)]
struct RawPushPayload {
    #[serde(rename = "ref")]
    ref_name: String,
    pusher: RawPusher,
    head_commit: Option<RawCommit>,
    #[serde(default)]
    commits: Vec<RawCommit>,
}

#[derive(Debug, Deserialize)]
struct RawPusher {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawCommit {
    id: String,
    message: Option<String>,
    author: Option<RawAuthor>,
}

#[derive(Debug, Deserialize)]
struct RawAuthor {
    name: String,
}

#[derive(Debug, Deserialize)]
struct RawPullRequestPayload {
    action: String,
    pull_request: RawPullRequest,
}

#[derive(Debug, Deserialize)]
struct RawPullRequest {
    number: u64,
    merged: Option<bool>,
    merged_by: Option<RawUser>,
    merged_at: Option<DateTime<Utc>>,
    head: RawRef,
    base: RawRef,
}

#[derive(Debug, Deserialize)]
struct RawRef {
    sha: String,
    #[serde(rename = "ref")]
    ref_name: String,
}

#[derive(Debug, Deserialize)]
struct RawUser {
    login: String,
}

// ============================================================================
// Per-shape classification
// ============================================================================

fn classify_push(body: &serde_json::Value) -> Option<Event> {
    let raw = RawPushPayload::deserialize(body).ok()?;

    Some(Event::Push(PushEvent {
        ref_name: raw.ref_name,
        pusher: raw.pusher.name,
        head_commit: raw.head_commit.map(commit_from_raw),
        commits: raw.commits.into_iter().map(commit_from_raw).collect(),
    }))
}

fn commit_from_raw(raw: RawCommit) -> Commit {
    Commit {
        id: Sha(raw.id),
        message: raw.message.unwrap_or_default(),
        author: raw.author.map(|a| a.name).unwrap_or_default(),
    }
}

fn classify_pull_request(body: &serde_json::Value) -> Option<Event> {
    let raw = RawPullRequestPayload::deserialize(body).ok()?;
    let pr = raw.pull_request;

    let head = BranchRef {
        ref_name: pr.head.ref_name,
        sha: Sha(pr.head.sha),
    };
    let base = BranchRef {
        ref_name: pr.base.ref_name,
        sha: Sha(pr.base.sha),
    };

    match raw.action.as_str() {
        "opened" => Some(Event::PullRequest(PullRequestEvent {
            number: PrNumber(pr.number),
            action: PullRequestAction::Opened,
            head,
            base,
        })),
        "synchronize" => Some(Event::PullRequest(PullRequestEvent {
            number: PrNumber(pr.number),
            action: PullRequestAction::Synchronize,
            head,
            base,
        })),
        "closed" if pr.merged == Some(true) => {
            // A merged close without merged_by does not fit the Merge shape;
            // let it degrade rather than invent an actor.
            let merged_by = pr.merged_by?;

            Some(Event::Merge(MergeEvent {
                number: PrNumber(pr.number),
                merged_by: merged_by.login,
                merged_at: pr.merged_at,
                head,
                base,
            }))
        }
        // Unmerged closes and all other actions (reopened, labeled, ...) are
        // not dispatch targets
        _ => None,
    }
}
