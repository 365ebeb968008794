//! Shared test utilities: handler doubles and event builders.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::registry::{EventHandler, HandlerError};
use crate::types::Sha;
use crate::webhooks::{
    BranchRef, Commit, Event, MergeEvent, PullRequestAction, PullRequestEvent, PushEvent,
};

/// Handler that always succeeds and counts its invocations.
///
/// With [`RecordingHandler::with_log`], invocations also append the handler
/// name to a shared log, which makes cross-handler ordering observable.
pub struct RecordingHandler {
    name: String,
    calls: AtomicUsize,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl RecordingHandler {
    pub fn new(name: impl Into<String>) -> Self {
        RecordingHandler {
            name: name.into(),
            calls: AtomicUsize::new(0),
            log: None,
        }
    }

    pub fn with_log(name: impl Into<String>, log: Arc<Mutex<Vec<String>>>) -> Self {
        RecordingHandler {
            name: name.into(),
            calls: AtomicUsize::new(0),
            log: Some(log),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for RecordingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.clone());
        }
        Ok(())
    }
}

/// Handler that always fails with the given message.
pub struct FailingHandler {
    name: String,
    error: String,
    calls: AtomicUsize,
}

impl FailingHandler {
    pub fn new(name: impl Into<String>, error: impl Into<String>) -> Self {
        FailingHandler {
            name: name.into(),
            error: error.into(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FailingHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError::Failed(self.error.clone()))
    }
}

/// Handler that fails for the first `failures` invocations, then succeeds.
pub struct FlakyHandler {
    name: String,
    failures_left: AtomicUsize,
    calls: AtomicUsize,
}

impl FlakyHandler {
    pub fn new(name: impl Into<String>, failures: usize) -> Self {
        FlakyHandler {
            name: name.into(),
            failures_left: AtomicUsize::new(failures),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EventHandler for FlakyHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();

        if failing {
            Err(HandlerError::Failed("transient failure".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Handler that sleeps before succeeding, for exercising timeouts.
pub struct SlowHandler {
    name: String,
    delay: Duration,
}

impl SlowHandler {
    pub fn new(name: impl Into<String>, delay: Duration) -> Self {
        SlowHandler {
            name: name.into(),
            delay,
        }
    }
}

#[async_trait]
impl EventHandler for SlowHandler {
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, _event: &Event) -> Result<(), HandlerError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}

/// A push event to `ref_name` with a single commit.
pub fn push_event(ref_name: &str) -> Event {
    let commit = Commit {
        id: Sha::new("a".repeat(40)),
        message: "Fix login bug".to_string(),
        author: "Mona Lisa".to_string(),
    };

    Event::Push(PushEvent {
        ref_name: ref_name.to_string(),
        pusher: "octocat".to_string(),
        head_commit: Some(commit.clone()),
        commits: vec![commit],
    })
}

/// A pull-request opened event.
pub fn pr_opened_event(number: u64) -> Event {
    Event::PullRequest(PullRequestEvent {
        number: number.into(),
        action: PullRequestAction::Opened,
        head: BranchRef {
            ref_name: "feature/login".to_string(),
            sha: Sha::new("b".repeat(40)),
        },
        base: BranchRef {
            ref_name: "main".to_string(),
            sha: Sha::new("c".repeat(40)),
        },
    })
}

/// A merge event for PR `number`.
pub fn merge_event(number: u64) -> Event {
    Event::Merge(MergeEvent {
        number: number.into(),
        merged_by: "release-bot".to_string(),
        merged_at: chrono::DateTime::from_timestamp(1_700_000_000, 0),
        head: BranchRef {
            ref_name: "feature/login".to_string(),
            sha: Sha::new("b".repeat(40)),
        },
        base: BranchRef {
            ref_name: "main".to_string(),
            sha: Sha::new("c".repeat(40)),
        },
    })
}
