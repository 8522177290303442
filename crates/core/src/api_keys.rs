//! External API key generation, hashing, and authorization checks.
//!
//! Keys are shown to the caller once at creation. Only the Argon2id PHC hash
//! and a short prefix (used to narrow candidate rows) are persisted.

use argon2::password_hash::rand_core::OsRng;
use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use rand::Rng;
use serde::Serialize;

use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Marker every live key starts with.
pub const KEY_MARKER: &str = "oh_live_";

/// Number of random alphanumeric characters following the marker.
pub const KEY_SECRET_LENGTH: usize = 40;

/// Number of leading characters stored as the lookup prefix.
pub const KEY_PREFIX_LENGTH: usize = 12;

/// Known scope names.
pub mod scopes {
    pub const ADMIN: &str = "admin";
    pub const UNITS_READ: &str = "units:read";
    pub const UNITS_WRITE: &str = "units:write";
    pub const PIPELINE_READ: &str = "pipeline:read";
    pub const PIPELINE_WRITE: &str = "pipeline:write";
    pub const DEVELOPMENTS_READ: &str = "developments:read";

    pub const ALL: &[&str] = &[
        ADMIN,
        UNITS_READ,
        UNITS_WRITE,
        PIPELINE_READ,
        PIPELINE_WRITE,
        DEVELOPMENTS_READ,
    ];
}

// ---------------------------------------------------------------------------
// Key generation
// ---------------------------------------------------------------------------

/// A freshly generated key. `plaintext` must never be persisted.
pub struct GeneratedApiKey {
    pub plaintext: String,
    pub prefix: String,
    pub hash: String,
}

/// Generate a new `oh_live_` key together with its prefix and Argon2id hash.
pub fn generate_api_key() -> Result<GeneratedApiKey, argon2::password_hash::Error> {
    let secret: String = rand::rng()
        .sample_iter(&rand::distr::Alphanumeric)
        .take(KEY_SECRET_LENGTH)
        .map(char::from)
        .collect();
    let plaintext = format!("{KEY_MARKER}{secret}");
    let prefix = extract_prefix(&plaintext).to_string();
    let hash = hash_api_key(&plaintext)?;

    Ok(GeneratedApiKey {
        plaintext,
        prefix,
        hash,
    })
}

/// First [`KEY_PREFIX_LENGTH`] characters of a key.
pub fn extract_prefix(key: &str) -> &str {
    let end = key
        .char_indices()
        .nth(KEY_PREFIX_LENGTH)
        .map_or(key.len(), |(i, _)| i);
    &key[..end]
}

/// Strip an optional `Bearer ` scheme and require the live-key marker.
pub fn parse_bearer(header: &str) -> Option<&str> {
    let token = header.strip_prefix("Bearer ").unwrap_or(header).trim();
    token.starts_with(KEY_MARKER).then_some(token)
}

// ---------------------------------------------------------------------------
// Hashing
// ---------------------------------------------------------------------------

pub fn hash_api_key(key: &str) -> Result<String, argon2::password_hash::Error> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default().hash_password(key.as_bytes(), &salt)?;
    Ok(hash.to_string())
}

/// `Ok(false)` on mismatch; `Err` only for an unparseable stored hash.
pub fn verify_api_key(key: &str, hash: &str) -> Result<bool, argon2::password_hash::Error> {
    let parsed = PasswordHash::new(hash)?;
    match Argon2::default().verify_password(key.as_bytes(), &parsed) {
        Ok(()) => Ok(true),
        Err(argon2::password_hash::Error::Password) => Ok(false),
        Err(e) => Err(e),
    }
}

// ---------------------------------------------------------------------------
// Authorization context
// ---------------------------------------------------------------------------

/// Identity established by a successfully authenticated API key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ApiKeyContext {
    pub key_id: DbId,
    pub tenant_id: DbId,
    pub scopes: Vec<String>,
    /// `None` means every development of the tenant.
    pub development_ids: Option<Vec<DbId>>,
}

impl ApiKeyContext {
    pub fn has_scope(&self, scope: &str) -> bool {
        has_scope(self, scope)
    }

    pub fn has_development_access(&self, development_id: DbId) -> bool {
        has_development_access(self, development_id)
    }
}

/// The `admin` scope grants everything; otherwise an exact match is required.
pub fn has_scope(ctx: &ApiKeyContext, scope: &str) -> bool {
    ctx.scopes.iter().any(|s| s == scopes::ADMIN || s == scope)
}

pub fn has_development_access(ctx: &ApiKeyContext, development_id: DbId) -> bool {
    match &ctx.development_ids {
        None => true,
        Some(ids) => ids.contains(&development_id),
    }
}

pub fn is_expired(expires_at: Option<Timestamp>, now: Timestamp) -> bool {
    expires_at.is_some_and(|exp| exp <= now)
}

/// Reject scope names outside [`scopes::ALL`].
pub fn validate_scopes(requested: &[String]) -> Result<(), String> {
    if requested.is_empty() {
        return Err("At least one scope is required".to_string());
    }
    match requested.iter().find(|s| !scopes::ALL.contains(&s.as_str())) {
        Some(unknown) => Err(format!("Unknown scope '{unknown}'")),
        None => Ok(()),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
