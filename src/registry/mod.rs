//! Handler registration and lookup.
//!
//! Handlers subscribe to a single [`EventKind`] with an optional priority.
//! The registry hands dispatch an ordered slice per kind: higher priority
//! first, ties broken by registration order. Registration happens during
//! startup, before the registry is shared; the `&mut self` methods make that
//! a compile-time property rather than a locking discipline.
//!
//! # Ordering
//!
//! | Priority | Position |
//! |----------|----------|
//! | Higher number | Earlier |
//! | Equal numbers | Registration order |

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::webhooks::{Event, EventKind};

/// Default priority for handlers registered without one.
pub const DEFAULT_PRIORITY: i32 = 0;

/// Errors a handler invocation can produce.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// The handler exceeded the dispatcher's per-handler time limit.
    ///
    /// Injected by the dispatcher, not returned by handlers themselves.
    #[error("handler timed out after {}s", .limit.as_secs())]
    Timeout { limit: Duration },

    /// The handler ran and reported a failure.
    #[error("handler failed: {0}")]
    Failed(String),

    /// The handler observed state it cannot act on.
    #[error("invalid state: {0}")]
    InvalidState(String),
}

/// An event handler.
///
/// Handlers are invoked sequentially per delivery and must be safe to call
/// again for the same event: retries and full replays re-run them.
#[async_trait]
pub trait EventHandler: Send + Sync {
    /// Stable name for this handler, unique within its event kind.
    ///
    /// Outcome records and retry filtering key off this name.
    fn name(&self) -> &str;

    /// Processes one event.
    async fn handle(&self, event: &Event) -> Result<(), HandlerError>;
}

/// A single registration: a handler plus its dispatch-ordering inputs.
#[derive(Clone)]
pub struct Registration {
    priority: i32,
    seq: usize,
    handler: Arc<dyn EventHandler>,
}

impl Registration {
    pub fn name(&self) -> &str {
        self.handler.name()
    }

    pub fn priority(&self) -> i32 {
        self.priority
    }

    pub fn handler(&self) -> &Arc<dyn EventHandler> {
        &self.handler
    }
}

impl std::fmt::Debug for Registration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registration")
            .field("name", &self.name())
            .field("priority", &self.priority)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Registry of event handlers, keyed by event kind.
#[derive(Debug, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<EventKind, Vec<Registration>>,
    next_seq: usize,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a handler for `kind` at [`DEFAULT_PRIORITY`].
    pub fn register(&mut self, kind: EventKind, handler: Arc<dyn EventHandler>) {
        self.register_with_priority(kind, DEFAULT_PRIORITY, handler);
    }

    /// Registers a handler for `kind` at the given priority.
    ///
    /// Handler names must be unique within a kind: outcome records are keyed
    /// by name, and a duplicate would shadow its twin in retry filtering.
    pub fn register_with_priority(
        &mut self,
        kind: EventKind,
        priority: i32,
        handler: Arc<dyn EventHandler>,
    ) {
        let entries = self.handlers.entry(kind).or_default();

        debug_assert!(
            entries.iter().all(|r| r.name() != handler.name()),
            "duplicate handler name '{}' for kind '{}'",
            handler.name(),
            kind
        );

        entries.push(Registration {
            priority,
            seq: self.next_seq,
            handler,
        });
        self.next_seq += 1;

        // Re-sort on every registration; registration is a startup-time
        // operation on small sets.
        entries.sort_by_key(|r| (Reverse(r.priority), r.seq));
    }

    /// Returns the handlers for `kind` in dispatch order.
    pub fn handlers_for(&self, kind: EventKind) -> &[Registration] {
        self.handlers.get(&kind).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Total number of registrations across all kinds.
    pub fn len(&self) -> usize {
        self.handlers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}
