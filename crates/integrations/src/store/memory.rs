use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use openhouse_core::column_mapper::find_target;
use openhouse_core::integration::{IntegrationStatus, SyncDirection, SyncRunStatus, SyncType};
use openhouse_core::matching::UnitCandidate;
use openhouse_core::types::DbId;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::integration::{FieldMapping, Integration, NewConflict, SyncLog, SyncStats};
use openhouse_db::models::unit::UnitMetrics;

use super::SyncStore;

type FieldKey = (String, String, DbId);

#[derive(Default)]
struct MemoryState {
    integrations: Vec<Integration>,
    mappings: Vec<FieldMapping>,
    units: Vec<(DbId, UnitCandidate)>,
    fields: HashMap<FieldKey, String>,
    failing_fields: HashSet<(String, String)>,
    logs: Vec<SyncLog>,
    conflicts: Vec<NewConflict>,
    external_refs: Vec<(DbId, DbId, String, String)>,
    metrics: HashMap<DbId, UnitMetrics>,
    failing_metrics: HashSet<DbId>,
    audit: Vec<NewAuditEntry>,
}

/// Process-local store with the same semantics as the Postgres queries.
#[derive(Default)]
pub struct InMemorySyncStore {
    state: Mutex<MemoryState>,
}

impl InMemorySyncStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_integration(&self, integration: Integration) {
        self.lock().integrations.push(integration);
    }

    pub fn get_integration(&self, id: DbId) -> Option<Integration> {
        self.lock().integrations.iter().find(|i| i.id == id).cloned()
    }

    pub fn insert_mapping(&self, mapping: FieldMapping) {
        self.lock().mappings.push(mapping);
    }

    pub fn insert_unit(&self, development_id: DbId, unit: UnitCandidate) {
        self.lock().units.push((development_id, unit));
    }

    pub fn set_field(&self, table: &str, field: &str, unit_id: DbId, value: &str) {
        self.lock()
            .fields
            .insert((table.to_string(), field.to_string(), unit_id), value.to_string());
    }

    pub fn field(&self, table: &str, field: &str, unit_id: DbId) -> Option<String> {
        self.lock()
            .fields
            .get(&(table.to_string(), field.to_string(), unit_id))
            .cloned()
    }

    /// Make every read and write of `table.field` fail.
    pub fn fail_field(&self, table: &str, field: &str) {
        self.lock()
            .failing_fields
            .insert((table.to_string(), field.to_string()));
    }

    pub fn insert_external_ref(&self, unit_id: DbId, integration_id: DbId, object: &str, external_id: &str) {
        self.lock().external_refs.push((
            unit_id,
            integration_id,
            object.to_string(),
            external_id.to_string(),
        ));
    }

    pub fn set_metrics(&self, unit_id: DbId, metrics: UnitMetrics) {
        self.lock().metrics.insert(unit_id, metrics);
    }

    pub fn fail_metrics(&self, unit_id: DbId) {
        self.lock().failing_metrics.insert(unit_id);
    }

    pub fn sync_logs(&self) -> Vec<SyncLog> {
        self.lock().logs.clone()
    }

    pub fn conflicts(&self) -> Vec<NewConflict> {
        self.lock().conflicts.clone()
    }

    pub fn audit_entries(&self) -> Vec<NewAuditEntry> {
        self.lock().audit.clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Unknown targets fail the way the column lookup in `UnitRepo` does.
    fn check_field(state: &MemoryState, table: &str, field: &str) -> Result<(), sqlx::Error> {
        if find_target(table, field).is_none()
            || state
                .failing_fields
                .contains(&(table.to_string(), field.to_string()))
        {
            return Err(sqlx::Error::ColumnNotFound(format!("{table}.{field}")));
        }
        Ok(())
    }

    fn with_integration(&self, id: DbId, f: impl FnOnce(&mut Integration)) -> Result<(), sqlx::Error> {
        let mut state = self.lock();
        let integration = state
            .integrations
            .iter_mut()
            .find(|i| i.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        f(integration);
        integration.updated_at = Utc::now();
        Ok(())
    }
}

fn status_is(integration: &Integration, statuses: &[IntegrationStatus]) -> bool {
    integration
        .status()
        .is_ok_and(|status| statuses.contains(&status))
}

fn direction_includes(integration: &Integration, inbound: bool) -> bool {
    integration.direction().is_ok_and(|d| {
        if inbound {
            d.includes_inbound()
        } else {
            d.includes_outbound()
        }
    })
}

#[async_trait]
impl SyncStore for InMemorySyncStore {
    async fn find_integration(&self, id: DbId) -> Result<Option<Integration>, sqlx::Error> {
        Ok(self.get_integration(id))
    }

    async fn active_mappings(&self, integration_id: DbId) -> Result<Vec<FieldMapping>, sqlx::Error> {
        Ok(self
            .lock()
            .mappings
            .iter()
            .filter(|m| m.integration_id == integration_id && m.is_active)
            .cloned()
            .collect())
    }

    async fn units(&self, development_id: DbId) -> Result<Vec<UnitCandidate>, sqlx::Error> {
        let mut units: Vec<UnitCandidate> = self
            .lock()
            .units
            .iter()
            .filter(|(dev, _)| *dev == development_id)
            .map(|(_, unit)| unit.clone())
            .collect();
        units.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(units)
    }

    async fn read_field(&self, table: &str, field: &str, unit_id: DbId) -> Result<Option<String>, sqlx::Error> {
        let state = self.lock();
        Self::check_field(&state, table, field)?;
        Ok(state
            .fields
            .get(&(table.to_string(), field.to_string(), unit_id))
            .cloned())
    }

    async fn write_field(&self, table: &str, field: &str, unit_id: DbId, value: &str) -> Result<(), sqlx::Error> {
        let mut state = self.lock();
        Self::check_field(&state, table, field)?;
        state
            .fields
            .insert((table.to_string(), field.to_string(), unit_id), value.to_string());
        Ok(())
    }

    async fn start_log(
        &self,
        integration_id: DbId,
        sync_type: SyncType,
        direction: SyncDirection,
    ) -> Result<DbId, sqlx::Error> {
        let id = DbId::new_v4();
        self.lock().logs.push(SyncLog {
            id,
            integration_id,
            sync_type: sync_type.as_str().to_string(),
            direction: direction.as_str().to_string(),
            status: SyncRunStatus::Started.as_str().to_string(),
            records_processed: 0,
            records_created: 0,
            records_updated: 0,
            records_skipped: 0,
            records_errored: 0,
            conflicts_detected: 0,
            error_message: None,
            started_at: Utc::now(),
            completed_at: None,
            duration_ms: None,
        });
        Ok(id)
    }

    async fn complete_log(
        &self,
        log_id: DbId,
        status: SyncRunStatus,
        error_message: Option<&str>,
        stats: &SyncStats,
    ) -> Result<(), sqlx::Error> {
        let mut state = self.lock();
        let log = state
            .logs
            .iter_mut()
            .find(|l| l.id == log_id)
            .ok_or(sqlx::Error::RowNotFound)?;
        if log.status != SyncRunStatus::Started.as_str() {
            return Ok(());
        }
        let now = Utc::now();
        log.status = status.as_str().to_string();
        log.error_message = error_message.map(str::to_string);
        log.records_processed = stats.records_processed;
        log.records_created = stats.records_created;
        log.records_updated = stats.records_updated;
        log.records_skipped = stats.records_skipped;
        log.records_errored = stats.records_errored;
        log.conflicts_detected = stats.conflicts_detected;
        log.completed_at = Some(now);
        log.duration_ms = Some((now - log.started_at).num_milliseconds());
        Ok(())
    }

    async fn insert_conflict(&self, conflict: &NewConflict) -> Result<(), sqlx::Error> {
        self.lock().conflicts.push(conflict.clone());
        Ok(())
    }

    async fn set_status(&self, id: DbId, status: IntegrationStatus) -> Result<(), sqlx::Error> {
        self.with_integration(id, |i| i.status = status.as_str().to_string())
    }

    async fn mark_synced(&self, id: DbId) -> Result<(), sqlx::Error> {
        self.with_integration(id, |i| {
            i.last_sync_at = Some(Utc::now());
            i.status = IntegrationStatus::Connected.as_str().to_string();
            i.last_error = None;
        })
    }

    async fn mark_error(&self, id: DbId, message: &str) -> Result<(), sqlx::Error> {
        self.with_integration(id, |i| {
            i.status = IntegrationStatus::Error.as_str().to_string();
            i.last_error = Some(message.to_string());
            i.last_error_at = Some(Utc::now());
        })
    }

    async fn replace_credentials(&self, id: DbId, credentials: &str) -> Result<(), sqlx::Error> {
        self.with_integration(id, |i| i.credentials = Some(credentials.to_string()))
    }

    async fn outbound_integrations(
        &self,
        tenant_id: DbId,
        development_id: DbId,
    ) -> Result<Vec<Integration>, sqlx::Error> {
        Ok(self
            .lock()
            .integrations
            .iter()
            .filter(|i| {
                i.tenant_id == tenant_id
                    && i.development_id == Some(development_id)
                    && status_is(i, &[IntegrationStatus::Connected])
                    && direction_includes(i, false)
            })
            .cloned()
            .collect())
    }

    async fn refreshable_integrations(&self) -> Result<Vec<Integration>, sqlx::Error> {
        Ok(self
            .lock()
            .integrations
            .iter()
            .filter(|i| {
                i.credentials.is_some()
                    && status_is(i, &[IntegrationStatus::Connected, IntegrationStatus::Syncing])
            })
            .cloned()
            .collect())
    }

    async fn scheduled_inbound(&self) -> Result<Vec<Integration>, sqlx::Error> {
        Ok(self
            .lock()
            .integrations
            .iter()
            .filter(|i| {
                i.credentials.is_some()
                    && i.sync_frequency != "manual"
                    && status_is(i, &[IntegrationStatus::Connected])
                    && direction_includes(i, true)
            })
            .cloned()
            .collect())
    }

    async fn external_id(
        &self,
        unit_id: DbId,
        integration_id: DbId,
        external_object: Option<&str>,
    ) -> Result<Option<String>, sqlx::Error> {
        Ok(self
            .lock()
            .external_refs
            .iter()
            .find(|(unit, integration, object, _)| {
                *unit == unit_id
                    && *integration == integration_id
                    && external_object.map_or(true, |o| o == object)
            })
            .map(|(_, _, _, id)| id.clone()))
    }

    async fn unit_metrics(&self, unit_id: DbId) -> Result<UnitMetrics, sqlx::Error> {
        let state = self.lock();
        if state.failing_metrics.contains(&unit_id) {
            return Err(sqlx::Error::RowNotFound);
        }
        Ok(state.metrics.get(&unit_id).cloned().unwrap_or_default())
    }

    async fn audit(&self, entry: NewAuditEntry) {
        self.lock().audit.push(entry);
    }
}
