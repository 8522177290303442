//! Persistence seam for the sync engine, enrichment writer and token
//! refresher.
//!
//! [`PgSyncStore`] delegates to the repositories. [`InMemorySyncStore`] keeps
//! the same semantics in process for tests and local tooling.

mod memory;
mod postgres;

use async_trait::async_trait;
use openhouse_core::integration::{IntegrationStatus, SyncDirection, SyncRunStatus, SyncType};
use openhouse_core::matching::UnitCandidate;
use openhouse_core::types::DbId;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::integration::{FieldMapping, Integration, NewConflict, SyncStats};
use openhouse_db::models::unit::UnitMetrics;

pub use memory::InMemorySyncStore;
pub use postgres::PgSyncStore;

#[async_trait]
pub trait SyncStore: Send + Sync {
    async fn find_integration(&self, id: DbId) -> Result<Option<Integration>, sqlx::Error>;

    async fn active_mappings(&self, integration_id: DbId) -> Result<Vec<FieldMapping>, sqlx::Error>;

    /// Units of a development, in matching order.
    async fn units(&self, development_id: DbId) -> Result<Vec<UnitCandidate>, sqlx::Error>;

    async fn read_field(&self, table: &str, field: &str, unit_id: DbId) -> Result<Option<String>, sqlx::Error>;

    async fn write_field(&self, table: &str, field: &str, unit_id: DbId, value: &str) -> Result<(), sqlx::Error>;

    /// Open a `started` sync log. Returns its id.
    async fn start_log(
        &self,
        integration_id: DbId,
        sync_type: SyncType,
        direction: SyncDirection,
    ) -> Result<DbId, sqlx::Error>;

    /// Write the terminal status. A log that is already terminal is left
    /// untouched.
    async fn complete_log(
        &self,
        log_id: DbId,
        status: SyncRunStatus,
        error_message: Option<&str>,
        stats: &SyncStats,
    ) -> Result<(), sqlx::Error>;

    async fn insert_conflict(&self, conflict: &NewConflict) -> Result<(), sqlx::Error>;

    async fn set_status(&self, id: DbId, status: IntegrationStatus) -> Result<(), sqlx::Error>;

    /// `last_sync_at = now`, status back to connected.
    async fn mark_synced(&self, id: DbId) -> Result<(), sqlx::Error>;

    async fn mark_error(&self, id: DbId, message: &str) -> Result<(), sqlx::Error>;

    async fn replace_credentials(&self, id: DbId, credentials: &str) -> Result<(), sqlx::Error>;

    /// Connected integrations of a development that push changes outward.
    async fn outbound_integrations(
        &self,
        tenant_id: DbId,
        development_id: DbId,
    ) -> Result<Vec<Integration>, sqlx::Error>;

    /// Connected or syncing integrations holding credentials.
    async fn refreshable_integrations(&self) -> Result<Vec<Integration>, sqlx::Error>;

    /// Connected inbound integrations on a non-manual schedule.
    async fn scheduled_inbound(&self) -> Result<Vec<Integration>, sqlx::Error>;

    /// Recorded CRM id of a unit for one integration.
    async fn external_id(
        &self,
        unit_id: DbId,
        integration_id: DbId,
        external_object: Option<&str>,
    ) -> Result<Option<String>, sqlx::Error>;

    async fn unit_metrics(&self, unit_id: DbId) -> Result<UnitMetrics, sqlx::Error>;

    /// Best-effort: failures are logged, never returned.
    async fn audit(&self, entry: NewAuditEntry);
}
