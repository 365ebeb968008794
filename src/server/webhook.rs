//! Webhook endpoint handler.
//!
//! Accepts webhook deliveries, verifies signatures, records the delivery, and
//! returns 202 Accepted. Handler execution happens asynchronously; the sender
//! never waits on it.

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::AppState;
use crate::store::{RecordOutcome, StoreError};
use crate::types::{DeliveryId, DeliveryReceipt};
use crate::webhooks::{classify, verify, VerificationError};

/// Header name for the event type.
pub const HEADER_EVENT: &str = "x-webhook-event";
/// Header name for the delivery ID.
pub const HEADER_DELIVERY: &str = "x-webhook-delivery";
/// Header name for the HMAC-SHA256 signature.
pub const HEADER_SIGNATURE: &str = "x-webhook-signature-256";

/// Errors that can occur when accepting a webhook.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Missing required header.
    #[error("missing required header: {0}")]
    MissingHeader(&'static str),

    /// Signature or payload verification failed.
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// The delivery store rejected or could not serve the operation.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        let status = match &self {
            WebhookError::MissingHeader(_) => StatusCode::BAD_REQUEST,
            WebhookError::Verification(VerificationError::InvalidSignature) => {
                StatusCode::UNAUTHORIZED
            }
            WebhookError::Verification(VerificationError::MalformedPayload(_)) => {
                StatusCode::BAD_REQUEST
            }
            // Store failures are transient from the sender's point of view:
            // the delivery was not consumed, redelivery is safe
            WebhookError::Store(_) => StatusCode::SERVICE_UNAVAILABLE,
        };

        (status, self.to_string()).into_response()
    }
}

/// Webhook handler.
///
/// Accepts webhook deliveries, verifies them, and records them for dispatch.
///
/// # Request
///
/// - Method: POST
/// - Required headers:
///   - `X-Webhook-Event`: Event type (e.g., "push", "pull_request")
///   - `X-Webhook-Delivery`: Unique delivery ID
///   - `X-Webhook-Signature-256`: HMAC-SHA256 signature of the payload
/// - Body: JSON webhook payload
///
/// # Response
///
/// - 202 Accepted: Delivery recorded, handlers run asynchronously
/// - 202 Accepted (duplicate): Delivery ID already settled; nothing re-runs
/// - 400 Bad Request: Missing header or non-JSON body
/// - 401 Unauthorized: Signature verification failed
/// - 503 Service Unavailable: Store failure; the sender should redeliver
///
/// # Example
///
/// ```ignore
/// POST /webhook HTTP/1.1
/// X-Webhook-Event: push
/// X-Webhook-Delivery: 550e8400-e29b-41d4-a716-446655440000
/// X-Webhook-Signature-256: sha256=...
/// Content-Type: application/json
///
/// {"ref": "refs/heads/main", "pusher": {...}, "commits": [...]}
///
/// HTTP/1.1 202 Accepted
/// ```
pub async fn webhook_handler(
    State(app_state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    let event_type = get_header(&headers, HEADER_EVENT)?;
    let delivery_id_str = get_header(&headers, HEADER_DELIVERY)?;
    let signature_header = get_header(&headers, HEADER_SIGNATURE)?;

    let delivery_id = DeliveryId::new(delivery_id_str);

    debug!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        "Received webhook"
    );

    // Verify BEFORE parsing or recording anything. An unverified body is
    // never inspected.
    let verified = match verify(&body, &signature_header, app_state.webhook_secret()) {
        Ok(verified) => verified,
        Err(e) => {
            warn!(delivery_id = %delivery_id, error = %e, "Rejected webhook");
            return Err(e.into());
        }
    };

    let receipt = DeliveryReceipt::new(
        delivery_id.clone(),
        verified.payload_hash().clone(),
        true,
    );

    match app_state.store().record_received(receipt).await? {
        RecordOutcome::Created => {}
        RecordOutcome::AlreadyRecorded(status) if status.is_terminal() => {
            // Same delivery ID, already settled: idempotent accept
            debug!(
                delivery_id = %delivery_id,
                status = ?status,
                "Duplicate delivery ID (idempotent)"
            );
            return Ok((StatusCode::ACCEPTED, "Accepted (duplicate)"));
        }
        RecordOutcome::AlreadyRecorded(status) => {
            // Pending or failed: a redelivery legitimately re-enters dispatch
            debug!(
                delivery_id = %delivery_id,
                status = ?status,
                "Redelivery of unsettled delivery"
            );
        }
    }

    let event = classify(&event_type, verified);

    // Handlers run off the request path; the claim gate in the store keeps
    // concurrent redeliveries from double-running them.
    let dispatcher = app_state.dispatcher();
    let id = delivery_id.clone();
    tokio::spawn(async move {
        if let Err(e) = dispatcher.dispatch(&id, &event).await {
            warn!(delivery_id = %id, error = %e, "Dispatch failed");
        }
    });

    info!(
        delivery_id = %delivery_id,
        event_type = %event_type,
        "Webhook accepted"
    );
    Ok((StatusCode::ACCEPTED, "Accepted"))
}

/// Extracts a required header value as a string.
fn get_header(headers: &HeaderMap, name: &'static str) -> Result<String, WebhookError> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
        .ok_or(WebhookError::MissingHeader(name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_header_present() {
        let mut headers = HeaderMap::new();
        headers.insert("x-webhook-event", "push".parse().unwrap());

        let result = get_header(&headers, "x-webhook-event").unwrap();
        assert_eq!(result, "push");
    }

    #[test]
    fn get_header_missing() {
        let headers = HeaderMap::new();

        let result = get_header(&headers, "x-webhook-event");
        assert!(matches!(result, Err(WebhookError::MissingHeader(_))));
    }

    #[test]
    fn error_status_mapping() {
        let response = WebhookError::MissingHeader("x-webhook-event").into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = WebhookError::Verification(VerificationError::InvalidSignature)
            .into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let response =
            WebhookError::Store(StoreError::Unavailable("backend down".to_string()))
                .into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
