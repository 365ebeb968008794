//! HTTP server for the webhook receiver.
//!
//! This module implements the HTTP server that:
//! - Accepts webhook deliveries, verifies signatures, and records them
//! - Provides delivery inspection endpoints for observability
//! - Provides health checks for liveness probes
//!
//! # Endpoints
//!
//! - `POST /webhook` - Accepts webhook deliveries (returns 202 Accepted)
//! - `GET /api/v1/deliveries/{id}` - Returns one delivery record as JSON
//! - `GET /health` - Returns 200 if server is running

use std::sync::Arc;

pub mod deliveries;
pub mod health;
pub mod webhook;

pub use deliveries::delivery_handler;
pub use health::health_handler;
pub use webhook::webhook_handler;

use crate::dispatch::Dispatcher;
use crate::store::DeliveryStore;

/// Shared application state.
///
/// This is passed to all handlers via Axum's `State` extractor.
/// It holds the webhook secret, the delivery store, and the dispatcher
/// that runs handlers for accepted deliveries.
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    /// Webhook secret for HMAC-SHA256 signature verification.
    webhook_secret: Vec<u8>,

    /// Store holding delivery records and the replay index.
    store: Arc<dyn DeliveryStore>,

    /// Dispatcher that fans classified events out to registered handlers.
    dispatcher: Arc<Dispatcher>,
}

impl AppState {
    /// Creates a new `AppState` with the given configuration.
    ///
    /// # Arguments
    ///
    /// * `webhook_secret` - Secret for verifying webhook signatures
    /// * `store` - Delivery store, shared with the dispatcher
    /// * `dispatcher` - Dispatcher that runs handlers for accepted deliveries
    pub fn new(
        webhook_secret: impl Into<Vec<u8>>,
        store: Arc<dyn DeliveryStore>,
        dispatcher: Arc<Dispatcher>,
    ) -> Self {
        AppState {
            inner: Arc::new(AppStateInner {
                webhook_secret: webhook_secret.into(),
                store,
                dispatcher,
            }),
        }
    }

    /// Returns the webhook secret.
    pub fn webhook_secret(&self) -> &[u8] {
        &self.inner.webhook_secret
    }

    /// Returns the delivery store.
    pub fn store(&self) -> &Arc<dyn DeliveryStore> {
        &self.inner.store
    }

    /// Returns a shared handle to the dispatcher.
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.inner.dispatcher)
    }
}

/// Builds the axum Router with all endpoints.
pub fn build_router(app_state: AppState) -> axum::Router {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/webhook", post(webhook_handler))
        .route("/api/v1/deliveries/{id}", get(delivery_handler))
        .route("/health", get(health_handler))
        .with_state(app_state)
}
