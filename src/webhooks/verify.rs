//! Webhook payload verification using HMAC-SHA256.
//!
//! The provider signs each delivery with a shared secret; the signature
//! arrives in a header as `sha256=<hex>`. Verification recomputes the MAC
//! over the exact raw body and compares in constant time, then checks that
//! the body is well-formed JSON. The MAC is checked before any parsing, so
//! unauthenticated input never reaches a parser.
//!
//! All failures are typed results; nothing in this module panics on
//! attacker-controlled input.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::types::PayloadHash;

type HmacSha256 = Hmac<Sha256>;

/// Why a delivery failed verification.
#[derive(Debug, Error)]
pub enum VerificationError {
    /// The signature header is malformed (wrong scheme, bad hex) or the MAC
    /// does not match the payload. Deliberately carries no detail: the
    /// response must not tell a sender which part of the check failed.
    #[error("signature verification failed")]
    InvalidSignature,

    /// The signature checked out but the body is not valid JSON.
    #[error("malformed payload: {0}")]
    MalformedPayload(#[from] serde_json::Error),
}

/// A delivery body that passed signature verification and parsed as JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedPayload {
    body: serde_json::Value,
    payload_hash: PayloadHash,
}

impl VerifiedPayload {
    /// The parsed JSON body.
    pub fn body(&self) -> &serde_json::Value {
        &self.body
    }

    /// SHA-256 of the raw body bytes, lowercase hex. This is the
    /// replay-detection key: redeliveries under a fresh delivery ID carry
    /// the same hash.
    pub fn payload_hash(&self) -> &PayloadHash {
        &self.payload_hash
    }

    /// Consumes the payload, yielding the parsed body.
    pub fn into_body(self) -> serde_json::Value {
        self.body
    }
}

/// Verifies a webhook delivery against the shared secret.
///
/// Checks, in order: the signature header parses as `sha256=<hex>`, the
/// HMAC-SHA256 of `raw_body` under `secret` matches it (constant-time
/// comparison via the HMAC library), and the body parses as JSON. Pure
/// function over its inputs.
///
/// # Examples
///
/// ```
/// use hookwire::webhooks::{compute_signature, format_signature_header, verify};
///
/// let body = br#"{"ref":"refs/heads/main"}"#;
/// let secret = b"my-secret-key";
/// let header = format_signature_header(&compute_signature(body, secret));
///
/// let verified = verify(body, &header, secret).unwrap();
/// assert_eq!(verified.body()["ref"], "refs/heads/main");
///
/// // Wrong secret fails
/// assert!(verify(body, &header, b"wrong-secret").is_err());
/// ```
pub fn verify(
    raw_body: &[u8],
    signature_header: &str,
    secret: &[u8],
) -> Result<VerifiedPayload, VerificationError> {
    let expected_signature =
        parse_signature_header(signature_header).ok_or(VerificationError::InvalidSignature)?;

    let mut mac =
        HmacSha256::new_from_slice(secret).map_err(|_| VerificationError::InvalidSignature)?;
    mac.update(raw_body);

    // Constant-time comparison via the HMAC library
    mac.verify_slice(&expected_signature)
        .map_err(|_| VerificationError::InvalidSignature)?;

    // Only now is the body trusted enough to parse.
    let body: serde_json::Value = serde_json::from_slice(raw_body)?;

    Ok(VerifiedPayload {
        body,
        payload_hash: PayloadHash::new(hex::encode(Sha256::digest(raw_body))),
    })
}

/// Parses a signature header (e.g., "sha256=abc123...") into raw bytes.
///
/// Returns `None` for malformed headers (missing prefix, invalid hex, etc.).
/// Never panics.
pub fn parse_signature_header(header: &str) -> Option<Vec<u8>> {
    let hex_sig = header.strip_prefix("sha256=")?;
    hex::decode(hex_sig).ok()
}

/// Computes the HMAC-SHA256 signature of a payload using the given secret.
///
/// Senders use this to sign outgoing requests; tests use it to build valid
/// deliveries.
pub fn compute_signature(payload: &[u8], secret: &[u8]) -> Vec<u8> {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC can take key of any size");
    mac.update(payload);
    mac.finalize().into_bytes().to_vec()
}

/// Formats a signature as a header value in the format "sha256=<hex>".
pub fn format_signature_header(signature: &[u8]) -> String {
    format!("sha256={}", hex::encode(signature))
}
