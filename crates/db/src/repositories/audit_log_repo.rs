//! Repository for the `audit_log` table.

use openhouse_core::audit::redact_sensitive_fields;
use openhouse_core::types::DbId;
use sqlx::PgPool;

use crate::models::audit::{AuditLogEntry, NewAuditEntry};

const COLUMNS: &str = "id, tenant_id, action, actor_type, actor_id, details, created_at";

pub struct AuditLogRepo;

impl AuditLogRepo {
    /// Insert an entry with sensitive detail keys redacted.
    pub async fn insert(pool: &PgPool, entry: &NewAuditEntry) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO audit_log (tenant_id, action, actor_type, actor_id, details) \
             VALUES ($1, $2, $3, $4, $5) RETURNING id",
        )
        .bind(entry.tenant_id)
        .bind(entry.action)
        .bind(entry.actor_type)
        .bind(entry.actor_id)
        .bind(redact_sensitive_fields(&entry.details))
        .fetch_one(pool)
        .await
    }

    /// Insert and swallow failures. Audit writes never fail the caller.
    pub async fn record(pool: &PgPool, entry: NewAuditEntry) {
        if let Err(e) = Self::insert(pool, &entry).await {
            tracing::warn!(action = entry.action, error = %e, "Failed to write audit entry");
        }
    }

    pub async fn list_by_tenant(
        pool: &PgPool,
        tenant_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<AuditLogEntry>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM audit_log WHERE tenant_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, AuditLogEntry>(&query)
            .bind(tenant_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
