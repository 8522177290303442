//! Webhook signing, retry backoff, and event names.

use hmac::{Hmac, Mac};
use sha2::Sha256;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

pub const SIGNATURE_HEADER: &str = "X-OpenHouse-Signature";
pub const EVENT_HEADER: &str = "X-OpenHouse-Event";
pub const DELIVERY_HEADER: &str = "X-OpenHouse-Delivery";

/// Per-attempt HTTP timeout.
pub const DELIVERY_TIMEOUT_SECS: u64 = 10;

/// While an attempt is in flight its delivery is leased away from the retry
/// sweep for this long. An attempt that never records an outcome makes the
/// delivery due again once the lease runs out.
pub const DELIVERY_LEASE_SECS: i64 = DELIVERY_TIMEOUT_SECS as i64 + 60;

/// Stored response bodies are cut to this many characters.
pub const MAX_RESPONSE_BODY_CHARS: usize = 1000;

/// Attempt number after which a failed delivery is no longer retried.
pub const MAX_DELIVERY_ATTEMPTS: i32 = 8;

/// Consecutive failures before a webhook is disabled, unless configured.
pub const DEFAULT_MAX_FAILURES: i32 = 10;

pub const BASE_RETRY_DELAY_SECS: i64 = 60;
pub const MAX_RETRY_DELAY_SECS: i64 = 3600;

/// Deliveries re-attempted per retry sweep.
pub const RETRY_BATCH_SIZE: i64 = 50;

/// Event types a webhook can subscribe to.
pub mod event_types {
    pub const UNIT_UPDATED: &str = "unit.updated";
    pub const SYNC_COMPLETED: &str = "sync.completed";
    pub const SYNC_FAILED: &str = "sync.failed";
    pub const CONFLICT_DETECTED: &str = "conflict.detected";
    pub const INTEGRATION_CONNECTED: &str = "integration.connected";
    pub const INTEGRATION_DISCONNECTED: &str = "integration.disconnected";

    pub const ALL: &[&str] = &[
        UNIT_UPDATED,
        SYNC_COMPLETED,
        SYNC_FAILED,
        CONFLICT_DETECTED,
        INTEGRATION_CONNECTED,
        INTEGRATION_DISCONNECTED,
    ];
}

// ---------------------------------------------------------------------------
// Signing
// ---------------------------------------------------------------------------

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 of `body` keyed by the webhook secret.
pub fn compute_signature(secret: &str, body: &str) -> String {
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Value of the signature header: `sha256=<hex>`.
pub fn signature_header_value(secret: &str, body: &str) -> String {
    format!("sha256={}", compute_signature(secret, body))
}

/// Constant-time check of a received signature header against `body`.
pub fn verify_signature(secret: &str, body: &str, header: &str) -> bool {
    let Some(hex_sig) = header.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(expected) = hex::decode(hex_sig) else {
        return false;
    };
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts any key length");
    mac.update(body.as_bytes());
    mac.verify_slice(&expected).is_ok()
}

// ---------------------------------------------------------------------------
// Backoff
// ---------------------------------------------------------------------------

/// Seconds to wait before retrying after failed attempt `attempt`:
/// `min(2^attempt * 60, 3600)`.
pub fn retry_delay_secs(attempt: i32) -> i64 {
    let exp = attempt.clamp(0, 16) as u32;
    (2i64.pow(exp) * BASE_RETRY_DELAY_SECS).min(MAX_RETRY_DELAY_SECS)
}

/// Whether a delivery that just failed on `attempt` gets another try.
pub fn should_retry(attempt: i32) -> bool {
    attempt < MAX_DELIVERY_ATTEMPTS
}

pub fn truncate_response_body(body: &str) -> String {
    body.chars().take(MAX_RESPONSE_BODY_CHARS).collect()
}

pub fn is_known_event(event_type: &str) -> bool {
    event_types::ALL.contains(&event_type)
}

/// Random signing secret for a webhook registered without one.
pub fn generate_secret() -> String {
    let bytes: [u8; 32] = rand::random();
    format!("whsec_{}", hex::encode(bytes))
}
