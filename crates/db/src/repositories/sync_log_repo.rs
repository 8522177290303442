//! Repository for the `integration_sync_log` and `integration_conflicts` tables.

use openhouse_core::integration::{SyncDirection, SyncRunStatus, SyncType};
use openhouse_core::types::DbId;
use sqlx::PgPool;

use crate::models::integration::{Conflict, NewConflict, SyncLog, SyncStats};

const LOG_COLUMNS: &str = "\
    id, integration_id, sync_type, direction, status, records_processed, \
    records_created, records_updated, records_skipped, records_errored, \
    conflicts_detected, error_message, started_at, completed_at, duration_ms";

const CONFLICT_COLUMNS: &str = "\
    id, integration_id, sync_log_id, oh_table, oh_record_id, oh_field, \
    local_value, remote_value, status, created_at";

pub struct SyncLogRepo;

impl SyncLogRepo {
    pub async fn start(
        pool: &PgPool,
        integration_id: DbId,
        sync_type: SyncType,
        direction: SyncDirection,
    ) -> Result<SyncLog, sqlx::Error> {
        let query = format!(
            "INSERT INTO integration_sync_log (integration_id, sync_type, direction) \
             VALUES ($1, $2, $3) RETURNING {LOG_COLUMNS}"
        );
        sqlx::query_as::<_, SyncLog>(&query)
            .bind(integration_id)
            .bind(sync_type.as_str())
            .bind(direction.as_str())
            .fetch_one(pool)
            .await
    }

    /// Write terminal status and counters. Only a `started` row is touched,
    /// so a completed log is never rewritten. Returns whether a row changed.
    pub async fn complete(
        pool: &PgPool,
        id: DbId,
        status: SyncRunStatus,
        error_message: Option<&str>,
        stats: &SyncStats,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE integration_sync_log SET \
                 status = $2, error_message = $3, \
                 records_processed = $4, records_created = $5, records_updated = $6, \
                 records_skipped = $7, records_errored = $8, conflicts_detected = $9, \
                 completed_at = NOW(), \
                 duration_ms = (EXTRACT(EPOCH FROM (NOW() - started_at)) * 1000)::BIGINT \
             WHERE id = $1 AND status = 'started'",
        )
        .bind(id)
        .bind(status.as_str())
        .bind(error_message)
        .bind(stats.records_processed)
        .bind(stats.records_created)
        .bind(stats.records_updated)
        .bind(stats.records_skipped)
        .bind(stats.records_errored)
        .bind(stats.conflicts_detected)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn list_for_integration(
        pool: &PgPool,
        integration_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<SyncLog>, sqlx::Error> {
        let query = format!(
            "SELECT {LOG_COLUMNS} FROM integration_sync_log WHERE integration_id = $1 \
             ORDER BY started_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, SyncLog>(&query)
            .bind(integration_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}

pub struct ConflictRepo;

impl ConflictRepo {
    /// Conflicts are insert-only from the sync engine's side.
    pub async fn insert(pool: &PgPool, conflict: &NewConflict) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar(
            "INSERT INTO integration_conflicts \
                (integration_id, sync_log_id, oh_table, oh_record_id, oh_field, \
                 local_value, remote_value, status) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'pending') \
             RETURNING id",
        )
        .bind(conflict.integration_id)
        .bind(conflict.sync_log_id)
        .bind(&conflict.oh_table)
        .bind(conflict.oh_record_id)
        .bind(&conflict.oh_field)
        .bind(&conflict.local_value)
        .bind(&conflict.remote_value)
        .fetch_one(pool)
        .await
    }

    pub async fn list_for_integration(
        pool: &PgPool,
        integration_id: DbId,
        status: Option<&str>,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<Conflict>, sqlx::Error> {
        let query = format!(
            "SELECT {CONFLICT_COLUMNS} FROM integration_conflicts \
             WHERE integration_id = $1 AND ($2::TEXT IS NULL OR status = $2) \
             ORDER BY created_at DESC LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, Conflict>(&query)
            .bind(integration_id)
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
