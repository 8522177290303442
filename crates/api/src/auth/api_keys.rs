//! External API key authentication.
//!
//! A presented key is narrowed to candidates by its stored prefix, then each
//! candidate's Argon2id hash is checked on the blocking pool. Successful use
//! is recorded best-effort so a slow audit write never fails the request.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use openhouse_core::api_keys::{extract_prefix, is_expired, parse_bearer, verify_api_key, ApiKeyContext};
use openhouse_core::audit::{actions, actor_types};
use openhouse_core::error::CoreError;
use openhouse_core::types::DbId;
use openhouse_db::models::api_key::ApiKey;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::repositories::{ApiKeyRepo, AuditLogRepo};
use openhouse_db::DbPool;
use serde_json::json;

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[async_trait]
pub trait ApiKeyStore: Send + Sync {
    /// Non-revoked keys sharing `prefix`.
    async fn candidates(&self, prefix: &str) -> Result<Vec<ApiKey>, sqlx::Error>;

    async fn touch_last_used(&self, key_id: DbId) -> Result<(), sqlx::Error>;

    /// Best-effort: failures are logged, never returned.
    async fn audit(&self, entry: NewAuditEntry);
}

#[derive(Clone)]
pub struct PgApiKeyStore {
    pool: DbPool,
}

impl PgApiKeyStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ApiKeyStore for PgApiKeyStore {
    async fn candidates(&self, prefix: &str) -> Result<Vec<ApiKey>, sqlx::Error> {
        ApiKeyRepo::find_candidates_by_prefix(&self.pool, prefix).await
    }

    async fn touch_last_used(&self, key_id: DbId) -> Result<(), sqlx::Error> {
        ApiKeyRepo::touch_last_used(&self.pool, key_id).await
    }

    async fn audit(&self, entry: NewAuditEntry) {
        AuditLogRepo::record(&self.pool, entry).await;
    }
}

/// Process-local key store for tests and local tooling.
#[derive(Default)]
pub struct InMemoryApiKeyStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    keys: Vec<ApiKey>,
    touched: Vec<DbId>,
    audit: Vec<NewAuditEntry>,
}

impl InMemoryApiKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, key: ApiKey) {
        self.lock().keys.push(key);
    }

    pub fn touched(&self) -> Vec<DbId> {
        self.lock().touched.clone()
    }

    pub fn audit_entries(&self) -> Vec<NewAuditEntry> {
        self.lock().audit.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl ApiKeyStore for InMemoryApiKeyStore {
    async fn candidates(&self, prefix: &str) -> Result<Vec<ApiKey>, sqlx::Error> {
        Ok(self
            .lock()
            .keys
            .iter()
            .filter(|k| k.key_prefix == prefix && k.revoked_at.is_none())
            .cloned()
            .collect())
    }

    async fn touch_last_used(&self, key_id: DbId) -> Result<(), sqlx::Error> {
        let mut state = self.lock();
        if let Some(key) = state.keys.iter_mut().find(|k| k.id == key_id) {
            key.last_used_at = Some(Utc::now());
        }
        state.touched.push(key_id);
        Ok(())
    }

    async fn audit(&self, entry: NewAuditEntry) {
        self.lock().audit.push(entry);
    }
}

// ---------------------------------------------------------------------------
// Authentication
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ApiKeyAuthenticator {
    store: Arc<dyn ApiKeyStore>,
}

impl ApiKeyAuthenticator {
    pub fn new(store: Arc<dyn ApiKeyStore>) -> Self {
        Self { store }
    }

    /// Resolve an `Authorization` header value to the key's context.
    ///
    /// Every failure is `Unauthorized`; the message does not reveal whether
    /// a key with the prefix exists.
    pub async fn authenticate(&self, header: &str) -> Result<ApiKeyContext, CoreError> {
        let token = parse_bearer(header)
            .ok_or_else(|| CoreError::Unauthorized("Invalid API key format".into()))?;

        let candidates = self
            .store
            .candidates(extract_prefix(token))
            .await
            .map_err(|e| CoreError::Internal(format!("API key lookup failed: {e}")))?;

        let presented = token.to_string();
        let key = tokio::task::spawn_blocking(move || matching_candidate(&presented, candidates))
            .await
            .map_err(|e| CoreError::Internal(format!("API key verification task failed: {e}")))?
            .ok_or_else(|| CoreError::Unauthorized("Invalid API key".into()))?;

        if is_expired(key.expires_at, Utc::now()) {
            return Err(CoreError::Unauthorized("API key has expired".into()));
        }

        if let Err(e) = self.store.touch_last_used(key.id).await {
            tracing::warn!(key_id = %key.id, error = %e, "Failed to update API key last_used_at");
        }
        self.store
            .audit(
                NewAuditEntry::system(key.tenant_id, actions::API_KEY_USED, json!({ "key_id": key.id }))
                    .with_actor(actor_types::API_KEY, Some(key.id)),
            )
            .await;

        Ok(key.context())
    }
}

/// Argon2 verification is CPU-bound; call from a blocking thread.
fn matching_candidate(token: &str, candidates: Vec<ApiKey>) -> Option<ApiKey> {
    candidates
        .into_iter()
        .find(|candidate| match verify_api_key(token, &candidate.key_hash) {
            Ok(matched) => matched,
            Err(e) => {
                tracing::warn!(key_id = %candidate.id, error = %e, "Unparseable API key hash");
                false
            }
        })
}
