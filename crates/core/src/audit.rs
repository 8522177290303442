//! Audit log action names, actor types, and detail redaction.

// ---------------------------------------------------------------------------
// Action constants
// ---------------------------------------------------------------------------

pub mod actions {
    pub const SYNC_FIELD_UPDATED: &str = "sync.field_updated";
    pub const SYNC_OUTBOUND_WRITTEN: &str = "sync.outbound_written";
    pub const ENRICHMENT_SYNCED: &str = "enrichment.synced";
    pub const ENRICHMENT_FAILED: &str = "enrichment.failed";
    pub const WEBHOOK_DELIVERED: &str = "webhook.delivered";
    pub const WEBHOOK_FAILED: &str = "webhook.failed";
    pub const WEBHOOK_DISABLED: &str = "webhook.disabled";
    pub const TOKEN_REFRESHED: &str = "token.refreshed";
    pub const TOKEN_REFRESH_FAILED: &str = "token.refresh_failed";
    pub const API_KEY_USED: &str = "api_key.used";
    pub const API_KEY_CREATED: &str = "api_key.created";
    pub const API_KEY_REVOKED: &str = "api_key.revoked";
    pub const INTEGRATION_CONNECTED: &str = "integration.connected";
    pub const INTEGRATION_DISCONNECTED: &str = "integration.disconnected";
    pub const MAPPINGS_CONFIRMED: &str = "integration.mappings_confirmed";
    pub const UNIT_UPDATED_VIA_API: &str = "api.unit_updated";
}

pub mod actor_types {
    pub const SYSTEM: &str = "system";
    pub const USER: &str = "user";
    pub const WEBHOOK: &str = "webhook";
    pub const API_KEY: &str = "api_key";
}

// ---------------------------------------------------------------------------
// Sensitive field redaction
// ---------------------------------------------------------------------------

/// Keys whose values never reach the audit log. Matched as substrings of the
/// lowercased key.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "api_key",
    "private_key",
    "authorization",
    "credential",
    "key_hash",
];

pub const REDACTED: &str = "[REDACTED]";

/// Replace the values of sensitive keys, recursing into nested objects and
/// arrays.
pub fn redact_sensitive_fields(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(key, val)| {
                    let lower = key.to_lowercase();
                    let redacted = if SENSITIVE_FIELDS.iter().any(|f| lower.contains(f)) {
                        serde_json::Value::String(REDACTED.to_string())
                    } else {
                        redact_sensitive_fields(val)
                    };
                    (key.clone(), redacted)
                })
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(redact_sensitive_fields).collect())
        }
        other => other.clone(),
    }
}
