//! Delivery dispatch: claim, run handlers, record the result.
//!
//! The dispatcher drives one delivery through its lifecycle. It claims the
//! record (the store is the mutual-exclusion gate), checks for payload
//! replays, runs the registered handlers for the event's kind sequentially,
//! and writes the outcome back.
//!
//! # Lifecycle
//!
//! ```text
//!                          ┌─────────┐
//!        record_received   │ Pending │ ◄──────────────┐
//!                          └────┬────┘                │
//!            claim + handlers   │                     │ retry
//!         ┌─────────────────────┼──────────────────┐  │
//!         │ payload replay      │ all ok           │ any failure
//!         ▼                     ▼                  ▼  │
//!   ┌───────────┐         ┌───────────┐        ┌──────────┐
//!   │ Duplicate │         │ Processed │        │  Failed  │
//!   └───────────┘         └───────────┘        └──────────┘
//! ```
//!
//! # Isolation
//!
//! Handlers run one at a time, in priority order (ties by registration
//! order). A failing or timed-out handler is recorded and the chain
//! continues; one handler cannot prevent the others from seeing the event.
//!
//! # Cancellation
//!
//! The shutdown token is honored only between the claim and the first
//! handler. Once handlers start, the chain runs to completion so the
//! recorded summary always reflects a full pass.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::registry::{HandlerError, HandlerRegistry, Registration};
use crate::store::{ClaimOutcome, DeliveryStore, StoreError};
use crate::types::{DeliveryId, DeliveryStatus, DeliverySummary, HandlerOutcome};
use crate::webhooks::Event;

/// Errors that can occur during dispatch operations.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The store rejected or could not serve an operation.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// Dispatch was asked to run a delivery that was never recorded.
    #[error("no record of delivery {0}")]
    UnknownDelivery(DeliveryId),
}

/// Result type for dispatch operations.
pub type Result<T> = std::result::Result<T, DispatchError>;

/// Default per-handler time limit.
pub const DEFAULT_HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Which handlers re-run when a failed delivery is dispatched again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetryPolicy {
    /// Re-run only handlers whose last recorded outcome was a failure (or
    /// that have no recorded outcome yet). Succeeded handlers are skipped.
    #[default]
    FailedOnly,

    /// Re-run every registered handler, ignoring recorded outcomes.
    FullReplay,
}

/// Configuration for the dispatcher.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Time limit for a single handler invocation. A handler that exceeds it
    /// is recorded as failed and the chain moves on.
    pub handler_timeout: Duration,

    /// Retry behavior for deliveries re-dispatched after a failure.
    pub retry_policy: RetryPolicy,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            handler_timeout: DEFAULT_HANDLER_TIMEOUT,
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl DispatcherConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-handler time limit.
    pub fn with_handler_timeout(mut self, handler_timeout: Duration) -> Self {
        self.handler_timeout = handler_timeout;
        self
    }

    /// Sets the retry policy.
    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = retry_policy;
        self
    }
}

/// What a dispatch call did with the delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Every selected handler succeeded; the record is terminal.
    Processed(DeliverySummary),

    /// At least one handler failed; the record stays retriable.
    Failed(DeliverySummary),

    /// Nothing ran: the record was already settled, claimed by another
    /// dispatch, or a payload replay of an earlier delivery.
    Duplicate,

    /// Shutdown arrived before the first handler; the record is untouched
    /// and claimable again.
    Cancelled,
}

/// Drives deliveries through claim, handler execution, and result recording.
///
/// The dispatcher is cheap to share behind an `Arc` and safe to call from
/// concurrent tasks: the store's claim gate serializes work per delivery ID.
pub struct Dispatcher {
    registry: HandlerRegistry,
    store: Arc<dyn DeliveryStore>,
    config: DispatcherConfig,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Creates a dispatcher with default configuration.
    pub fn new(registry: HandlerRegistry, store: Arc<dyn DeliveryStore>) -> Self {
        Self::with_config(registry, store, DispatcherConfig::default())
    }

    /// Creates a dispatcher with the given configuration.
    pub fn with_config(
        registry: HandlerRegistry,
        store: Arc<dyn DeliveryStore>,
        config: DispatcherConfig,
    ) -> Self {
        Self::new_with_shutdown(registry, store, config, CancellationToken::new())
    }

    /// Creates a dispatcher with a custom shutdown token.
    pub fn new_with_shutdown(
        registry: HandlerRegistry,
        store: Arc<dyn DeliveryStore>,
        config: DispatcherConfig,
        shutdown: CancellationToken,
    ) -> Self {
        info!(
            handlers = registry.len(),
            handler_timeout_secs = config.handler_timeout.as_secs(),
            retry_policy = ?config.retry_policy,
            "Creating dispatcher"
        );

        Dispatcher {
            registry,
            store,
            config,
            shutdown,
        }
    }

    /// Returns the dispatcher configuration.
    pub fn config(&self) -> &DispatcherConfig {
        &self.config
    }

    /// Returns the shutdown token.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Dispatches one recorded delivery.
    ///
    /// The delivery must have been recorded in the store first; dispatching
    /// an unknown ID is an error. Re-dispatching a settled delivery is not:
    /// it short-circuits to [`DispatchOutcome::Duplicate`] without running
    /// any handler.
    ///
    /// # Async Safety
    ///
    /// Safe to call concurrently for the same delivery ID. The store's claim
    /// gate admits one dispatch at a time; the rest observe `Duplicate`.
    #[instrument(skip(self, event), fields(delivery_id = %id, event_kind = %event.kind()))]
    pub async fn dispatch(&self, id: &DeliveryId, event: &Event) -> Result<DispatchOutcome> {
        match self.store.claim(id).await? {
            ClaimOutcome::Acquired => {}
            ClaimOutcome::AlreadyTerminal(status) => {
                debug!(status = ?status, "Delivery already settled, skipping");
                return Ok(DispatchOutcome::Duplicate);
            }
            ClaimOutcome::Busy => {
                debug!("Delivery claimed by another dispatch, skipping");
                return Ok(DispatchOutcome::Duplicate);
            }
            ClaimOutcome::NotFound => {
                return Err(DispatchError::UnknownDelivery(id.clone()));
            }
        }

        // The claim is held from here on: every return path must mark the
        // record or release the claim.
        let record = match self.store.get(id).await {
            Ok(Some(record)) => record,
            Ok(None) => {
                let _ = self.store.release(id).await;
                return Err(DispatchError::UnknownDelivery(id.clone()));
            }
            Err(e) => {
                let _ = self.store.release(id).await;
                return Err(e.into());
            }
        };

        match self.store.replay_of(&record.payload_hash, id).await {
            Ok(Some(original)) => {
                debug!(original = %original, hash = %record.payload_hash.short(), "Payload replay, marking duplicate");
                self.store.mark_duplicate(id, original).await?;
                return Ok(DispatchOutcome::Duplicate);
            }
            Ok(None) => {}
            Err(e) => {
                let _ = self.store.release(id).await;
                return Err(e.into());
            }
        }

        if self.shutdown.is_cancelled() {
            debug!("Shutdown before first handler, releasing claim");
            self.store.release(id).await?;
            return Ok(DispatchOutcome::Cancelled);
        }

        let prior = match record.status {
            DeliveryStatus::Failed => record.summary.as_ref(),
            _ => None,
        };

        let mut outcomes = Vec::new();
        for registration in self.registry.handlers_for(event.kind()) {
            if !self.should_run(registration.name(), prior) {
                continue;
            }

            let outcome = self.run_handler(registration, event).await;
            if let Some(error) = &outcome.error {
                warn!(handler = registration.name(), error = %error, "Handler failed");
            }
            outcomes.push(outcome);
        }
        let summary = DeliverySummary::new(outcomes);

        if summary.is_clean() {
            self.store.mark_processed(id, summary.clone()).await?;
            info!(handlers = summary.outcomes.len(), "Delivery processed");
            Ok(DispatchOutcome::Processed(summary))
        } else {
            self.store.mark_failed(id, summary.clone()).await?;
            warn!(
                failures = summary.failure_count(),
                handlers = summary.outcomes.len(),
                "Delivery failed"
            );
            Ok(DispatchOutcome::Failed(summary))
        }
    }

    /// Decides whether a handler participates in this attempt.
    fn should_run(&self, name: &str, prior: Option<&DeliverySummary>) -> bool {
        match self.config.retry_policy {
            RetryPolicy::FullReplay => true,
            RetryPolicy::FailedOnly => match prior {
                None => true,
                Some(prior) => prior
                    .outcomes
                    .iter()
                    .find(|o| o.handler == name)
                    // No recorded outcome means the handler never ran for
                    // this delivery; run it now.
                    .is_none_or(HandlerOutcome::is_failure),
            },
        }
    }

    /// Runs one handler under the configured time limit.
    async fn run_handler(&self, registration: &Registration, event: &Event) -> HandlerOutcome {
        let name = registration.name();
        let limit = self.config.handler_timeout;

        match timeout(limit, registration.handler().handle(event)).await {
            Ok(Ok(())) => HandlerOutcome::succeeded(name),
            Ok(Err(error)) => HandlerOutcome::failed(name, error.to_string()),
            Err(_) => HandlerOutcome::failed(name, HandlerError::Timeout { limit }.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::InMemoryDeliveryStore;
    use crate::test_utils::{
        merge_event, pr_opened_event, push_event, FailingHandler, FlakyHandler, RecordingHandler,
        SlowHandler,
    };
    use crate::types::{DeliveryReceipt, PayloadHash};
    use crate::webhooks::EventKind;
    use async_trait::async_trait;
    use std::sync::Mutex;

    async fn record(store: &InMemoryDeliveryStore, id: &str, hash: &str) -> DeliveryId {
        let id = DeliveryId::new(id);
        store
            .record_received(DeliveryReceipt::new(
                id.clone(),
                PayloadHash::new(hash),
                true,
            ))
            .await
            .unwrap();
        id
    }

    // ========================================================================
    // Configuration
    // ========================================================================

    #[test]
    fn config_defaults() {
        let config = DispatcherConfig::default();
        assert_eq!(config.handler_timeout, Duration::from_secs(30));
        assert_eq!(config.retry_policy, RetryPolicy::FailedOnly);
    }

    #[test]
    fn config_builders() {
        let config = DispatcherConfig::new()
            .with_handler_timeout(Duration::from_secs(5))
            .with_retry_policy(RetryPolicy::FullReplay);

        assert_eq!(config.handler_timeout, Duration::from_secs(5));
        assert_eq!(config.retry_policy, RetryPolicy::FullReplay);
    }

    // ========================================================================
    // Happy path and ordering
    // ========================================================================

    #[tokio::test]
    async fn processes_delivery_and_runs_handlers_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let mut registry = HandlerRegistry::new();
        registry.register(
            EventKind::Push,
            Arc::new(RecordingHandler::with_log("first", Arc::clone(&log))),
        );
        registry.register(
            EventKind::Push,
            Arc::new(RecordingHandler::with_log("second", Arc::clone(&log))),
        );
        // Registered last but highest priority
        registry.register_with_priority(
            EventKind::Push,
            10,
            Arc::new(RecordingHandler::with_log("urgent", Arc::clone(&log))),
        );

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(registry, store.clone());
        let id = record(&store, "d-1", "hash-a").await;

        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();

        let DispatchOutcome::Processed(summary) = outcome else {
            panic!("expected Processed, got {:?}", outcome);
        };
        assert_eq!(*log.lock().unwrap(), ["urgent", "first", "second"]);

        // The summary lists outcomes in invocation order
        let names: Vec<_> = summary.outcomes.iter().map(|o| o.handler.as_str()).collect();
        assert_eq!(names, ["urgent", "first", "second"]);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Processed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn no_registered_handlers_is_trivially_processed() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(HandlerRegistry::new(), store.clone());
        let id = record(&store, "d-1", "hash-a").await;

        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();

        assert_eq!(outcome, DispatchOutcome::Processed(DeliverySummary::default()));
        assert_eq!(
            store.status(&id).await.unwrap(),
            Some(DeliveryStatus::Processed)
        );
    }

    #[tokio::test]
    async fn handlers_only_see_their_registered_kind() {
        let push_handler = Arc::new(RecordingHandler::new("push-watcher"));
        let merge_handler = Arc::new(RecordingHandler::new("merge-watcher"));

        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, push_handler.clone());
        registry.register(EventKind::Merge, merge_handler.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(registry, store.clone());

        let id = record(&store, "d-1", "hash-a").await;
        dispatcher.dispatch(&id, &merge_event(42)).await.unwrap();

        assert_eq!(push_handler.calls(), 0);
        assert_eq!(merge_handler.calls(), 1);

        // A kind nobody registered for runs nothing and touches no counters
        let id = record(&store, "d-2", "hash-b").await;
        dispatcher.dispatch(&id, &pr_opened_event(7)).await.unwrap();

        assert_eq!(push_handler.calls(), 0);
        assert_eq!(merge_handler.calls(), 1);
    }

    // ========================================================================
    // Failure isolation
    // ========================================================================

    #[tokio::test]
    async fn one_failing_handler_does_not_stop_the_chain() {
        let before = Arc::new(RecordingHandler::new("before"));
        let after = Arc::new(RecordingHandler::new("after"));

        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, before.clone());
        registry.register(
            EventKind::Push,
            Arc::new(FailingHandler::new("broken", "connection refused")),
        );
        registry.register(EventKind::Push, after.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(registry, store.clone());
        let id = record(&store, "d-1", "hash-a").await;

        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();

        let DispatchOutcome::Failed(summary) = outcome else {
            panic!("expected Failed, got {:?}", outcome);
        };
        assert_eq!(before.calls(), 1);
        assert_eq!(after.calls(), 1);
        assert_eq!(summary.outcomes.len(), 3);
        assert_eq!(summary.failure_count(), 1);
        assert_eq!(summary.failed_handlers().collect::<Vec<_>>(), ["broken"]);

        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn handler_exceeding_the_time_limit_counts_as_failed() {
        let after = Arc::new(RecordingHandler::new("after"));

        let mut registry = HandlerRegistry::new();
        registry.register(
            EventKind::Push,
            Arc::new(SlowHandler::new("sluggish", Duration::from_secs(5))),
        );
        registry.register(EventKind::Push, after.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let config = DispatcherConfig::new().with_handler_timeout(Duration::from_millis(20));
        let dispatcher = Dispatcher::with_config(registry, store.clone(), config);
        let id = record(&store, "d-1", "hash-a").await;

        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();

        let DispatchOutcome::Failed(summary) = outcome else {
            panic!("expected Failed, got {:?}", outcome);
        };
        let slow = summary
            .outcomes
            .iter()
            .find(|o| o.handler == "sluggish")
            .unwrap();
        assert!(slow.error.as_deref().unwrap().contains("timed out"));

        // The chain continued past the timeout
        assert_eq!(after.calls(), 1);
    }

    // ========================================================================
    // Idempotence and replay
    // ========================================================================

    #[tokio::test]
    async fn second_dispatch_of_a_processed_delivery_short_circuits() {
        let handler = Arc::new(RecordingHandler::new("only-once"));
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, handler.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(registry, store.clone());
        let id = record(&store, "d-1", "hash-a").await;
        let event = push_event("refs/heads/main");

        let first = dispatcher.dispatch(&id, &event).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Processed(_)));

        let second = dispatcher.dispatch(&id, &event).await.unwrap();
        assert_eq!(second, DispatchOutcome::Duplicate);

        assert_eq!(handler.calls(), 1);
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.attempts, 1);
    }

    #[tokio::test]
    async fn payload_replay_under_a_fresh_id_is_marked_duplicate() {
        let handler = Arc::new(RecordingHandler::new("only-once"));
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, handler.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(registry, store.clone());
        let event = push_event("refs/heads/main");

        let original = record(&store, "d-1", "hash-a").await;
        let replay = record(&store, "d-2", "hash-a").await;

        dispatcher.dispatch(&original, &event).await.unwrap();
        let outcome = dispatcher.dispatch(&replay, &event).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Duplicate);

        assert_eq!(handler.calls(), 1);
        let stored = store.get(&replay).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Duplicate);
        assert_eq!(stored.duplicate_of, Some(original));
        assert_eq!(stored.attempts, 0);
    }

    #[tokio::test]
    async fn busy_claim_reports_duplicate_without_running_handlers() {
        let handler = Arc::new(RecordingHandler::new("guarded"));
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, handler.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(registry, store.clone());
        let id = record(&store, "d-1", "hash-a").await;

        // Simulate a concurrent dispatch holding the claim
        assert_eq!(store.claim(&id).await.unwrap(), ClaimOutcome::Acquired);

        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Duplicate);
        assert_eq!(handler.calls(), 0);

        // Once the other dispatch releases, this one can run
        store.release(&id).await.unwrap();
        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Processed(_)));
        assert_eq!(handler.calls(), 1);
    }

    #[tokio::test]
    async fn dispatching_an_unrecorded_delivery_is_an_error() {
        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(HandlerRegistry::new(), store);

        let err = dispatcher
            .dispatch(&DeliveryId::new("ghost"), &push_event("refs/heads/main"))
            .await
            .unwrap_err();

        assert!(matches!(err, DispatchError::UnknownDelivery(id) if id.as_str() == "ghost"));
    }

    // ========================================================================
    // Retry policies
    // ========================================================================

    #[tokio::test]
    async fn failed_only_retry_skips_handlers_that_already_succeeded() {
        let audit = Arc::new(RecordingHandler::new("audit"));
        let notify = Arc::new(FlakyHandler::new("notify", 1));

        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, audit.clone());
        registry.register(EventKind::Push, notify.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(registry, store.clone());
        let id = record(&store, "d-1", "hash-a").await;
        let event = push_event("refs/heads/main");

        let first = dispatcher.dispatch(&id, &event).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Failed(_)));

        let second = dispatcher.dispatch(&id, &event).await.unwrap();
        let DispatchOutcome::Processed(summary) = second else {
            panic!("expected Processed, got {:?}", second);
        };

        // audit succeeded on the first attempt and was not re-run
        assert_eq!(audit.calls(), 1);
        assert_eq!(notify.calls(), 2);

        // This attempt only ran notify
        assert_eq!(summary.outcomes.len(), 1);

        // The record's merged summary still covers both handlers
        let stored = store.get(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Processed);
        assert_eq!(stored.attempts, 2);
        let merged = stored.summary.unwrap();
        assert_eq!(merged.outcomes.len(), 2);
        assert!(merged.is_clean());
    }

    #[tokio::test]
    async fn full_replay_retry_reruns_every_handler() {
        let audit = Arc::new(RecordingHandler::new("audit"));
        let notify = Arc::new(FlakyHandler::new("notify", 1));

        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, audit.clone());
        registry.register(EventKind::Push, notify.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let config = DispatcherConfig::new().with_retry_policy(RetryPolicy::FullReplay);
        let dispatcher = Dispatcher::with_config(registry, store.clone(), config);
        let id = record(&store, "d-1", "hash-a").await;
        let event = push_event("refs/heads/main");

        let first = dispatcher.dispatch(&id, &event).await.unwrap();
        assert!(matches!(first, DispatchOutcome::Failed(_)));

        let second = dispatcher.dispatch(&id, &event).await.unwrap();
        assert!(matches!(second, DispatchOutcome::Processed(_)));

        assert_eq!(audit.calls(), 2);
        assert_eq!(notify.calls(), 2);
    }

    #[tokio::test]
    async fn failed_only_runs_handlers_without_a_recorded_outcome() {
        let audit = Arc::new(RecordingHandler::new("audit"));
        let notify = Arc::new(RecordingHandler::new("notify"));

        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, audit.clone());
        registry.register(EventKind::Push, notify.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new(registry, store.clone());
        let id = record(&store, "d-1", "hash-a").await;

        // A previous attempt (e.g. before a restart) knew only about notify
        store
            .mark_failed(
                &id,
                DeliverySummary::new(vec![HandlerOutcome::failed("notify", "boom")]),
            )
            .await
            .unwrap();

        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Processed(_)));

        // audit had no outcome on file, so it ran alongside the failed notify
        assert_eq!(audit.calls(), 1);
        assert_eq!(notify.calls(), 1);
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    #[tokio::test]
    async fn shutdown_before_handlers_leaves_the_record_pending() {
        let handler = Arc::new(RecordingHandler::new("never-runs"));
        let mut registry = HandlerRegistry::new();
        registry.register(EventKind::Push, handler.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let shutdown = CancellationToken::new();
        let dispatcher = Dispatcher::new_with_shutdown(
            registry,
            store.clone(),
            DispatcherConfig::default(),
            shutdown.clone(),
        );
        let id = record(&store, "d-1", "hash-a").await;

        shutdown.cancel();

        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Cancelled);
        assert_eq!(handler.calls(), 0);

        // Untouched and claimable: a later dispatch (e.g. after restart or a
        // sender redelivery) still owns it
        assert_eq!(store.status(&id).await.unwrap(), Some(DeliveryStatus::Pending));
        assert_eq!(store.claim(&id).await.unwrap(), ClaimOutcome::Acquired);
    }

    struct CancellingHandler {
        token: CancellationToken,
    }

    #[async_trait]
    impl crate::registry::EventHandler for CancellingHandler {
        fn name(&self) -> &str {
            "trips-shutdown"
        }

        async fn handle(&self, _event: &Event) -> std::result::Result<(), HandlerError> {
            self.token.cancel();
            Ok(())
        }
    }

    #[tokio::test]
    async fn shutdown_during_a_running_chain_does_not_interrupt_it() {
        let shutdown = CancellationToken::new();
        let after = Arc::new(RecordingHandler::new("after"));

        let mut registry = HandlerRegistry::new();
        registry.register(
            EventKind::Push,
            Arc::new(CancellingHandler {
                token: shutdown.clone(),
            }),
        );
        registry.register(EventKind::Push, after.clone());

        let store = Arc::new(InMemoryDeliveryStore::new());
        let dispatcher = Dispatcher::new_with_shutdown(
            registry,
            store.clone(),
            DispatcherConfig::default(),
            shutdown,
        );
        let id = record(&store, "d-1", "hash-a").await;

        // The first handler cancels the token mid-chain; the chain still
        // runs to completion
        let outcome = dispatcher.dispatch(&id, &push_event("refs/heads/main")).await.unwrap();
        assert!(matches!(outcome, DispatchOutcome::Processed(_)));
        assert_eq!(after.calls(), 1);

        // But a delivery arriving after the cancellation is refused
        let late = record(&store, "d-2", "hash-b").await;
        let outcome = dispatcher.dispatch(&late, &push_event("refs/heads/main")).await.unwrap();
        assert_eq!(outcome, DispatchOutcome::Cancelled);
    }
}
