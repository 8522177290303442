//! Repository for the `api_keys` table.

use openhouse_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::api_key::ApiKey;

const COLUMNS: &str = "\
    id, tenant_id, name, key_prefix, key_hash, scopes, development_ids, \
    expires_at, last_used_at, revoked_at, created_at";

pub struct ApiKeyRepo;

impl ApiKeyRepo {
    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        pool: &PgPool,
        tenant_id: DbId,
        name: &str,
        key_prefix: &str,
        key_hash: &str,
        scopes: &[String],
        development_ids: Option<&[DbId]>,
        expires_at: Option<Timestamp>,
    ) -> Result<ApiKey, sqlx::Error> {
        let query = format!(
            "INSERT INTO api_keys \
                (tenant_id, name, key_prefix, key_hash, scopes, development_ids, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ApiKey>(&query)
            .bind(tenant_id)
            .bind(name)
            .bind(key_prefix)
            .bind(key_hash)
            .bind(scopes)
            .bind(development_ids)
            .bind(expires_at)
            .fetch_one(pool)
            .await
    }

    pub async fn list_by_tenant(pool: &PgPool, tenant_id: DbId) -> Result<Vec<ApiKey>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM api_keys WHERE tenant_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, ApiKey>(&query)
            .bind(tenant_id)
            .fetch_all(pool)
            .await
    }

    /// Non-revoked keys sharing `prefix`. Hash verification happens in the caller.
    pub async fn find_candidates_by_prefix(
        pool: &PgPool,
        prefix: &str,
    ) -> Result<Vec<ApiKey>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM api_keys WHERE key_prefix = $1 AND revoked_at IS NULL"
        );
        sqlx::query_as::<_, ApiKey>(&query)
            .bind(prefix)
            .fetch_all(pool)
            .await
    }

    pub async fn touch_last_used(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE api_keys SET last_used_at = NOW() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn revoke(
        pool: &PgPool,
        tenant_id: DbId,
        id: DbId,
    ) -> Result<Option<ApiKey>, sqlx::Error> {
        let query = format!(
            "UPDATE api_keys SET revoked_at = NOW() \
             WHERE id = $1 AND tenant_id = $2 AND revoked_at IS NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ApiKey>(&query)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }
}
