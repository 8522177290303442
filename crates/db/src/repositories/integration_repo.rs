//! Repository for the `integrations` table.
//!
//! Status transitions are targeted column updates so a concurrent writer
//! touching other columns is never clobbered.

use openhouse_core::integration::IntegrationStatus;
use openhouse_core::types::DbId;
use sqlx::PgPool;

use crate::models::integration::Integration;

const COLUMNS: &str = "\
    id, tenant_id, development_id, integration_type, name, status, credentials, \
    sync_direction, sync_frequency, external_ref, last_sync_at, last_error, \
    last_error_at, created_at, updated_at";

pub struct IntegrationRepo;

impl IntegrationRepo {
    /// Create a disconnected integration awaiting its OAuth callback.
    pub async fn create(
        pool: &PgPool,
        tenant_id: DbId,
        development_id: Option<DbId>,
        integration_type: &str,
        name: &str,
        sync_direction: &str,
        external_ref: Option<&str>,
    ) -> Result<Integration, sqlx::Error> {
        let query = format!(
            "INSERT INTO integrations \
                (tenant_id, development_id, integration_type, name, sync_direction, external_ref) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(tenant_id)
            .bind(development_id)
            .bind(integration_type)
            .bind(name)
            .bind(sync_direction)
            .bind(external_ref)
            .fetch_one(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM integrations WHERE id = $1");
        sqlx::query_as::<_, Integration>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Tenant-scoped lookup used by operator endpoints.
    pub async fn find_for_tenant(
        pool: &PgPool,
        tenant_id: DbId,
        id: DbId,
    ) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM integrations WHERE id = $1 AND tenant_id = $2");
        sqlx::query_as::<_, Integration>(&query)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    pub async fn list_by_tenant(
        pool: &PgPool,
        tenant_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations WHERE tenant_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(tenant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Connected integrations of a development that push changes outward.
    pub async fn list_outbound_for_development(
        pool: &PgPool,
        tenant_id: DbId,
        development_id: DbId,
    ) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations \
             WHERE tenant_id = $1 AND development_id = $2 AND status = 'connected' \
               AND sync_direction IN ('outbound', 'bidirectional') \
             ORDER BY created_at"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(tenant_id)
            .bind(development_id)
            .fetch_all(pool)
            .await
    }

    /// Connected integrations pulling data inward on a schedule.
    pub async fn list_scheduled_inbound(pool: &PgPool) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations \
             WHERE status = 'connected' AND credentials IS NOT NULL \
               AND sync_direction IN ('inbound', 'bidirectional') \
               AND sync_frequency <> 'manual' \
             ORDER BY last_sync_at NULLS FIRST"
        );
        sqlx::query_as::<_, Integration>(&query).fetch_all(pool).await
    }

    /// Integrations holding live credentials, candidates for token refresh.
    pub async fn list_with_credentials(pool: &PgPool) -> Result<Vec<Integration>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integrations \
             WHERE status IN ('connected', 'syncing') AND credentials IS NOT NULL"
        );
        sqlx::query_as::<_, Integration>(&query).fetch_all(pool).await
    }

    pub async fn update(
        pool: &PgPool,
        tenant_id: DbId,
        id: DbId,
        name: Option<&str>,
        sync_direction: Option<&str>,
        sync_frequency: Option<&str>,
        external_ref: Option<&str>,
    ) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!(
            "UPDATE integrations SET \
                 name = COALESCE($3, name), \
                 sync_direction = COALESCE($4, sync_direction), \
                 sync_frequency = COALESCE($5, sync_frequency), \
                 external_ref = COALESCE($6, external_ref) \
             WHERE id = $1 AND tenant_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(id)
            .bind(tenant_id)
            .bind(name)
            .bind(sync_direction)
            .bind(sync_frequency)
            .bind(external_ref)
            .fetch_optional(pool)
            .await
    }

    pub async fn set_status(
        pool: &PgPool,
        id: DbId,
        status: IntegrationStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE integrations SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Store a fresh credentials blob and mark the integration connected.
    pub async fn mark_connected(
        pool: &PgPool,
        id: DbId,
        credentials: &str,
    ) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!(
            "UPDATE integrations SET \
                 credentials = $2, status = 'connected', last_error = NULL, last_error_at = NULL \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(id)
            .bind(credentials)
            .fetch_optional(pool)
            .await
    }

    /// Replace credentials wholesale after a token refresh.
    pub async fn replace_credentials(
        pool: &PgPool,
        id: DbId,
        credentials: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("UPDATE integrations SET credentials = $2 WHERE id = $1")
            .bind(id)
            .bind(credentials)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn mark_synced(pool: &PgPool, id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET \
                 last_sync_at = NOW(), status = 'connected', last_error = NULL \
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_error(pool: &PgPool, id: DbId, message: &str) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE integrations SET \
                 status = 'error', last_error = $2, last_error_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(message)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Revoke: clear credentials and mark disconnected.
    pub async fn disconnect(
        pool: &PgPool,
        tenant_id: DbId,
        id: DbId,
    ) -> Result<Option<Integration>, sqlx::Error> {
        let query = format!(
            "UPDATE integrations SET credentials = NULL, status = 'disconnected' \
             WHERE id = $1 AND tenant_id = $2 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, Integration>(&query)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }
}
