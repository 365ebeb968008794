//! Delivery inspection endpoint.
//!
//! Serves the stored record of a single delivery so operators can see
//! whether it was processed, which handlers failed, and what it duplicates.

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::debug;

use super::AppState;
use crate::store::StoreError;
use crate::types::{Delivery, DeliveryId};

/// Errors that can occur when looking up a delivery.
#[derive(Debug, Error)]
pub enum DeliveryApiError {
    /// No delivery recorded under this ID.
    #[error("no delivery with id {0}")]
    NotFound(DeliveryId),

    /// The delivery store could not serve the lookup.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for DeliveryApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            DeliveryApiError::NotFound(_) => StatusCode::NOT_FOUND,
            DeliveryApiError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}

/// Delivery lookup handler.
///
/// Returns the full stored record for a delivery: status, attempt count,
/// per-handler outcomes, and duplicate linkage.
///
/// # Response
///
/// - 200 OK: JSON-serialized delivery record
/// - 404 Not Found: No delivery recorded under this ID
/// - 503 Service Unavailable: Store failure
pub async fn delivery_handler(
    State(app_state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Delivery>, DeliveryApiError> {
    let id = DeliveryId::new(id);
    debug!(delivery_id = %id, "Delivery lookup");

    let delivery = app_state
        .store()
        .get(&id)
        .await?
        .ok_or_else(|| DeliveryApiError::NotFound(id))?;

    Ok(Json(delivery))
}
