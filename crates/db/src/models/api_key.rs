//! External API key models and DTOs.

use openhouse_core::api_keys::ApiKeyContext;
use openhouse_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `api_keys` table. `key_hash` is never serialized.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct ApiKey {
    pub id: DbId,
    pub tenant_id: DbId,
    pub name: String,
    pub key_prefix: String,
    #[serde(skip_serializing)]
    pub key_hash: String,
    pub scopes: Vec<String>,
    pub development_ids: Option<Vec<DbId>>,
    pub expires_at: Option<Timestamp>,
    pub last_used_at: Option<Timestamp>,
    pub revoked_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

impl ApiKey {
    pub fn context(&self) -> ApiKeyContext {
        ApiKeyContext {
            key_id: self.id,
            tenant_id: self.tenant_id,
            scopes: self.scopes.clone(),
            development_ids: self.development_ids.clone(),
        }
    }
}

/// DTO for creating an API key.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateApiKey {
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    #[validate(length(min = 1))]
    pub scopes: Vec<String>,
    pub development_ids: Option<Vec<DbId>>,
    pub expires_at: Option<Timestamp>,
}

/// Returned once at creation; the only time the plaintext key is visible.
#[derive(Debug, Clone, Serialize)]
pub struct ApiKeyCreatedResponse {
    pub id: DbId,
    pub name: String,
    pub key_prefix: String,
    pub plaintext_key: String,
    pub scopes: Vec<String>,
    pub development_ids: Option<Vec<DbId>>,
    pub expires_at: Option<Timestamp>,
    pub created_at: Timestamp,
}
