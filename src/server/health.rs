//! Liveness endpoint.
//!
//! Answers 200 OK whenever the process is up and serving. Meant for load
//! balancers and orchestrators; it says nothing about delivery backlog.

use axum::http::StatusCode;

/// Liveness handler.
///
/// Always responds 200 OK with the text "OK". A failing response means the
/// process itself is down, not that dispatch is unhealthy.
///
/// # Example
///
/// ```ignore
/// GET /health HTTP/1.1
///
/// HTTP/1.1 200 OK
/// Content-Type: text/plain
///
/// OK
/// ```
pub async fn health_handler() -> (StatusCode, &'static str) {
    (StatusCode::OK, "OK")
}
