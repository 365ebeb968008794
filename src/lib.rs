//! Hookwire - An inbound webhook receiver and event-dispatch core.
//!
//! This library accepts source-control webhook deliveries over HTTP, verifies
//! their HMAC-SHA256 signatures, classifies them into typed events, and fans
//! them out to registered handlers exactly once per delivery.

pub mod dispatch;
pub mod registry;
pub mod server;
pub mod store;
pub mod types;
pub mod webhooks;

#[cfg(test)]
pub(crate) mod test_utils;
