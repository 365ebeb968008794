use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use hookwire::dispatch::Dispatcher;
use hookwire::registry::{EventHandler, HandlerError, HandlerRegistry};
use hookwire::server::{AppState, build_router};
use hookwire::store::{DEFAULT_REPLAY_TTL_HOURS, DeliveryStore, InMemoryDeliveryStore};
use hookwire::webhooks::{Event, EventKind};

/// Logs every classified event. Registered for all kinds so that a bare
/// deployment still shows its traffic.
struct AuditHandler;

#[async_trait]
impl EventHandler for AuditHandler {
    fn name(&self) -> &str {
        "audit"
    }

    async fn handle(&self, event: &Event) -> Result<(), HandlerError> {
        match event {
            Event::Push(push) => {
                info!(
                    ref_name = %push.ref_name,
                    pusher = %push.pusher,
                    commits = push.commits.len(),
                    "push"
                );
            }
            Event::PullRequest(pr) => {
                info!(
                    number = %pr.number,
                    action = ?pr.action,
                    head = %pr.head.ref_name,
                    "pull request"
                );
            }
            Event::Merge(merge) => {
                info!(number = %merge.number, merged_by = %merge.merged_by, "merge");
            }
            Event::Unknown(unknown) => {
                info!(event_type = %unknown.event_type, "unrecognized event");
            }
        }
        Ok(())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "hookwire=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let secret = std::env::var("HOOKWIRE_WEBHOOK_SECRET")
        .context("HOOKWIRE_WEBHOOK_SECRET must be set")?;
    let bind_addr: SocketAddr = std::env::var("HOOKWIRE_BIND_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:3000".to_string())
        .parse()
        .context("HOOKWIRE_BIND_ADDR is not a valid socket address")?;

    let store = Arc::new(InMemoryDeliveryStore::new());

    let audit = Arc::new(AuditHandler);
    let mut registry = HandlerRegistry::new();
    registry.register(EventKind::Push, audit.clone());
    registry.register(EventKind::PullRequest, audit.clone());
    registry.register(EventKind::Merge, audit.clone());
    registry.register(EventKind::Unknown, audit);

    let dispatcher = Arc::new(Dispatcher::new(registry, store.clone()));
    let shutdown = dispatcher.shutdown_token();

    // Sweep expired replay-index entries in the background
    let prune_store = store.clone();
    let prune_shutdown = shutdown.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(3600));
        // The first tick completes immediately; skip it so the first sweep
        // happens an hour in
        interval.tick().await;
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match prune_store.prune_replay_index(DEFAULT_REPLAY_TTL_HOURS).await {
                        Ok(0) => {}
                        Ok(pruned) => info!(pruned, "Pruned replay index"),
                        Err(e) => warn!(error = %e, "Replay index prune failed"),
                    }
                }
                _ = prune_shutdown.cancelled() => break,
            }
        }
    });

    let app_state = AppState::new(secret.into_bytes(), store, dispatcher);
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    info!("listening on {}", bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutting down");
            shutdown.cancel();
        })
        .await
        .context("server error")?;

    Ok(())
}
