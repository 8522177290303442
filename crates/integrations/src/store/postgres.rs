use async_trait::async_trait;
use openhouse_core::integration::{IntegrationStatus, SyncDirection, SyncRunStatus, SyncType};
use openhouse_core::matching::UnitCandidate;
use openhouse_core::types::DbId;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::integration::{FieldMapping, Integration, NewConflict, SyncStats};
use openhouse_db::models::unit::UnitMetrics;
use openhouse_db::repositories::{
    AuditLogRepo, ConflictRepo, FieldMappingRepo, IntegrationRepo, SyncLogRepo, UnitRepo,
};
use openhouse_db::DbPool;

use super::SyncStore;

#[derive(Clone)]
pub struct PgSyncStore {
    pool: DbPool,
}

impl PgSyncStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SyncStore for PgSyncStore {
    async fn find_integration(&self, id: DbId) -> Result<Option<Integration>, sqlx::Error> {
        IntegrationRepo::find_by_id(&self.pool, id).await
    }

    async fn active_mappings(&self, integration_id: DbId) -> Result<Vec<FieldMapping>, sqlx::Error> {
        FieldMappingRepo::list_active(&self.pool, integration_id).await
    }

    async fn units(&self, development_id: DbId) -> Result<Vec<UnitCandidate>, sqlx::Error> {
        let units = UnitRepo::list_for_development(&self.pool, development_id).await?;
        Ok(units.iter().map(UnitCandidate::from).collect())
    }

    async fn read_field(&self, table: &str, field: &str, unit_id: DbId) -> Result<Option<String>, sqlx::Error> {
        UnitRepo::read_field(&self.pool, table, field, unit_id).await
    }

    async fn write_field(&self, table: &str, field: &str, unit_id: DbId, value: &str) -> Result<(), sqlx::Error> {
        UnitRepo::write_field(&self.pool, table, field, unit_id, Some(value)).await
    }

    async fn start_log(
        &self,
        integration_id: DbId,
        sync_type: SyncType,
        direction: SyncDirection,
    ) -> Result<DbId, sqlx::Error> {
        let log = SyncLogRepo::start(&self.pool, integration_id, sync_type, direction).await?;
        Ok(log.id)
    }

    async fn complete_log(
        &self,
        log_id: DbId,
        status: SyncRunStatus,
        error_message: Option<&str>,
        stats: &SyncStats,
    ) -> Result<(), sqlx::Error> {
        let updated = SyncLogRepo::complete(&self.pool, log_id, status, error_message, stats).await?;
        if !updated {
            tracing::warn!(sync_log_id = %log_id, "Sync log was already terminal");
        }
        Ok(())
    }

    async fn insert_conflict(&self, conflict: &NewConflict) -> Result<(), sqlx::Error> {
        ConflictRepo::insert(&self.pool, conflict).await.map(|_| ())
    }

    async fn set_status(&self, id: DbId, status: IntegrationStatus) -> Result<(), sqlx::Error> {
        IntegrationRepo::set_status(&self.pool, id, status).await
    }

    async fn mark_synced(&self, id: DbId) -> Result<(), sqlx::Error> {
        IntegrationRepo::mark_synced(&self.pool, id).await
    }

    async fn mark_error(&self, id: DbId, message: &str) -> Result<(), sqlx::Error> {
        IntegrationRepo::mark_error(&self.pool, id, message).await
    }

    async fn replace_credentials(&self, id: DbId, credentials: &str) -> Result<(), sqlx::Error> {
        IntegrationRepo::replace_credentials(&self.pool, id, credentials).await
    }

    async fn outbound_integrations(
        &self,
        tenant_id: DbId,
        development_id: DbId,
    ) -> Result<Vec<Integration>, sqlx::Error> {
        IntegrationRepo::list_outbound_for_development(&self.pool, tenant_id, development_id).await
    }

    async fn refreshable_integrations(&self) -> Result<Vec<Integration>, sqlx::Error> {
        IntegrationRepo::list_with_credentials(&self.pool).await
    }

    async fn scheduled_inbound(&self) -> Result<Vec<Integration>, sqlx::Error> {
        IntegrationRepo::list_scheduled_inbound(&self.pool).await
    }

    async fn external_id(
        &self,
        unit_id: DbId,
        integration_id: DbId,
        external_object: Option<&str>,
    ) -> Result<Option<String>, sqlx::Error> {
        let found = UnitRepo::find_external_ref(&self.pool, unit_id, integration_id, external_object).await?;
        Ok(found.map(|r| r.external_id))
    }

    async fn unit_metrics(&self, unit_id: DbId) -> Result<UnitMetrics, sqlx::Error> {
        UnitRepo::metrics(&self.pool, unit_id).await
    }

    async fn audit(&self, entry: NewAuditEntry) {
        AuditLogRepo::record(&self.pool, entry).await;
    }
}
