//! Field synchronisation between external systems and OpenHouse units.
//!
//! Inbound runs pull rows from a provider, resolve each row to a unit and
//! apply mapped fields. A field is overwritten only when the unit has never
//! been synced or the local value is empty; any other disagreement becomes a
//! conflict for an operator and the write is withheld.
//!
//! Outbound runs push a single changed field to every connected integration
//! of the unit's development.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::DateTime;
use openhouse_core::audit::actions;
use openhouse_core::integration::{
    IntegrationStatus, IntegrationType, SyncDirection, SyncRunStatus, SyncType,
};
use openhouse_core::matching::{
    extract_unit_identifier, identifiers_match, resolve_unit, MappingTarget, UnitCandidate,
};
use openhouse_core::transform::{same_value, transform_value, value_to_string};
use openhouse_core::types::{DbId, ExternalRow, Timestamp};
use openhouse_core::vault::CredentialVault;
use openhouse_core::webhooks::event_types;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::integration::{FieldMapping, Integration, NewConflict, SyncStats};
use openhouse_events::{EventBus, PlatformEvent};
use serde_json::{json, Value};

use crate::adapters::{
    AdapterSource, CellUpdate, CrmAdapter, OAuthTokens, ProviderAdapter, SpreadsheetAdapter,
    DEFAULT_SHEET,
};
use crate::error::SyncError;
use crate::outbound::{ChangeEvent, OutboundSyncHandle};
use crate::store::SyncStore;

// ---------------------------------------------------------------------------
// Run context and results
// ---------------------------------------------------------------------------

/// What an inbound run needs to know about its integration.
#[derive(Debug, Clone)]
pub struct SyncContext {
    pub integration_id: DbId,
    pub tenant_id: DbId,
    pub development_id: DbId,
    /// `None` when the integration has never completed a sync.
    pub last_sync_at: Option<Timestamp>,
    pub sync_type: SyncType,
}

impl SyncContext {
    pub fn for_integration(integration: &Integration, sync_type: SyncType) -> Result<Self, SyncError> {
        let development_id = integration
            .development_id
            .ok_or_else(|| SyncError::Misconfigured {
                id: integration.id,
                message: "no development selected".into(),
            })?;
        Ok(Self {
            integration_id: integration.id,
            tenant_id: integration.tenant_id,
            development_id,
            last_sync_at: integration.last_sync_at,
            sync_type,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncResult {
    pub sync_log_id: DbId,
    pub status: SyncRunStatus,
    pub stats: SyncStats,
}

impl SyncResult {
    pub fn to_json(&self) -> Value {
        json!({
            "sync_log_id": self.sync_log_id,
            "status": self.status.as_str(),
            "stats": self.stats,
        })
    }
}

/// Outcome of pushing one change to one integration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundResult {
    pub integration_id: DbId,
    pub sync_log_id: DbId,
    pub status: SyncRunStatus,
    pub stats: SyncStats,
}

/// Split an integration's `external_ref` into file id and sheet name.
/// `file#Sheet` names a sheet; a bare id uses the default sheet.
pub fn spreadsheet_location(external_ref: &str) -> (&str, &str) {
    match external_ref.split_once('#') {
        Some((file, sheet)) if !sheet.is_empty() => (file, sheet),
        Some((file, _)) => (file, DEFAULT_SHEET),
        None => (external_ref, DEFAULT_SHEET),
    }
}

/// Decrypt an integration's token bundle.
pub fn load_tokens(vault: &CredentialVault, integration: &Integration) -> Result<OAuthTokens, SyncError> {
    let blob = integration
        .credentials
        .as_deref()
        .ok_or(SyncError::NotConnected(integration.id))?;
    Ok(vault.decrypt(integration.tenant_id, blob)?)
}

// ---------------------------------------------------------------------------
// SyncEngine
// ---------------------------------------------------------------------------

pub struct SyncEngine {
    store: Arc<dyn SyncStore>,
    adapters: Arc<dyn AdapterSource>,
    vault: CredentialVault,
    events: Option<Arc<EventBus>>,
    jobs: Option<OutboundSyncHandle>,
}

impl SyncEngine {
    pub fn new(store: Arc<dyn SyncStore>, adapters: Arc<dyn AdapterSource>, vault: CredentialVault) -> Self {
        Self {
            store,
            adapters,
            vault,
            events: None,
            jobs: None,
        }
    }

    /// Publish `sync.*` and `conflict.detected` events to the bus.
    pub fn with_events(mut self, events: Arc<EventBus>) -> Self {
        self.events = Some(events);
        self
    }

    /// Queue enrichment on the background worker after successful inbound
    /// runs.
    pub fn with_jobs(mut self, jobs: OutboundSyncHandle) -> Self {
        self.jobs = Some(jobs);
        self
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Apply already-fetched external rows.
    pub async fn sync_inbound(&self, ctx: &SyncContext, rows: Vec<ExternalRow>) -> Result<SyncResult, SyncError> {
        let log_id = self
            .store
            .start_log(ctx.integration_id, ctx.sync_type, SyncDirection::Inbound)
            .await?;
        let mut stats = SyncStats::default();

        if let Err(e) = self.apply_rows(ctx, log_id, &rows, &mut stats).await {
            tracing::error!(
                integration_id = %ctx.integration_id,
                sync_log_id = %log_id,
                error = %e,
                "Inbound sync failed"
            );
            self.store
                .complete_log(log_id, SyncRunStatus::Failed, Some(&e.to_string()), &stats)
                .await?;
            self.publish(ctx.tenant_id, event_types::SYNC_FAILED, ctx.integration_id, json!({
                "integration_id": ctx.integration_id,
                "development_id": ctx.development_id,
                "sync_log_id": log_id,
                "error": e.to_string(),
            }));
            return Err(e);
        }

        let status = if stats.conflicts_detected > 0 {
            SyncRunStatus::Partial
        } else {
            SyncRunStatus::Completed
        };
        self.store.complete_log(log_id, status, None, &stats).await?;
        self.store.mark_synced(ctx.integration_id).await?;

        tracing::info!(
            integration_id = %ctx.integration_id,
            sync_log_id = %log_id,
            status = %status,
            processed = stats.records_processed,
            updated = stats.records_updated,
            skipped = stats.records_skipped,
            errored = stats.records_errored,
            conflicts = stats.conflicts_detected,
            "Inbound sync finished"
        );

        let payload = json!({
            "integration_id": ctx.integration_id,
            "development_id": ctx.development_id,
            "sync_log_id": log_id,
            "status": status.as_str(),
            "stats": stats,
        });
        if stats.conflicts_detected > 0 {
            self.publish(ctx.tenant_id, event_types::CONFLICT_DETECTED, ctx.integration_id, payload.clone());
        }
        self.publish(ctx.tenant_id, event_types::SYNC_COMPLETED, ctx.integration_id, payload);

        if let Some(jobs) = &self.jobs {
            jobs.enrich(ctx.integration_id);
        }

        Ok(SyncResult {
            sync_log_id: log_id,
            status,
            stats,
        })
    }

    async fn apply_rows(
        &self,
        ctx: &SyncContext,
        log_id: DbId,
        rows: &[ExternalRow],
        stats: &mut SyncStats,
    ) -> Result<(), SyncError> {
        let mappings = self.store.active_mappings(ctx.integration_id).await?;
        let units = self.store.units(ctx.development_id).await?;
        let field_mappings: Vec<&FieldMapping> = mappings
            .iter()
            .filter(|m| m.direction() != SyncDirection::Outbound && !m.is_unit_identifier())
            .collect();

        for row in rows {
            stats.records_processed += 1;

            let Some(identifier) = extract_unit_identifier(row, &mappings) else {
                stats.records_skipped += 1;
                continue;
            };
            let Some(unit) = resolve_unit(&units, &identifier) else {
                tracing::debug!(identifier = %identifier, "No unit matches external row");
                stats.records_skipped += 1;
                continue;
            };

            let outcome = self.apply_row(ctx, log_id, &field_mappings, unit, row).await;
            if outcome.updated {
                stats.records_updated += 1;
            }
            if outcome.errored {
                stats.records_errored += 1;
            }
            stats.conflicts_detected += outcome.conflicts;
        }
        Ok(())
    }

    async fn apply_row(
        &self,
        ctx: &SyncContext,
        log_id: DbId,
        mappings: &[&FieldMapping],
        unit: &UnitCandidate,
        row: &ExternalRow,
    ) -> RowOutcome {
        let mut outcome = RowOutcome::default();

        for mapping in mappings {
            let Some(raw) = row.get(&mapping.external_field) else {
                continue;
            };
            let value = transform_value(raw, mapping.rule().as_ref());
            if value.is_null() {
                continue;
            }
            let remote = value_to_string(&value);

            let local = match self
                .store
                .read_field(&mapping.oh_table, &mapping.oh_field, unit.id)
                .await
            {
                Ok(local) => local.unwrap_or_default(),
                Err(e) => {
                    tracing::warn!(
                        unit_id = %unit.id,
                        field = %format!("{}.{}", mapping.oh_table, mapping.oh_field),
                        error = %e,
                        "Failed to read mapped field"
                    );
                    outcome.errored = true;
                    continue;
                }
            };
            if same_value(&local, &remote) {
                continue;
            }

            if ctx.last_sync_at.is_none() || local.is_empty() {
                if let Err(e) = self
                    .store
                    .write_field(&mapping.oh_table, &mapping.oh_field, unit.id, &remote)
                    .await
                {
                    tracing::warn!(unit_id = %unit.id, error = %e, "Failed to write mapped field");
                    outcome.errored = true;
                    continue;
                }
                outcome.updated = true;
                self.store
                    .audit(NewAuditEntry::system(
                        ctx.tenant_id,
                        actions::SYNC_FIELD_UPDATED,
                        json!({
                            "integration_id": ctx.integration_id,
                            "sync_log_id": log_id,
                            "unit_id": unit.id,
                            "table": mapping.oh_table,
                            "field": mapping.oh_field,
                            "old_value": local,
                            "new_value": remote,
                        }),
                    ))
                    .await;
            } else {
                let conflict = NewConflict {
                    integration_id: ctx.integration_id,
                    sync_log_id: log_id,
                    oh_table: mapping.oh_table.clone(),
                    oh_record_id: unit.id,
                    oh_field: mapping.oh_field.clone(),
                    local_value: local,
                    remote_value: remote,
                };
                match self.store.insert_conflict(&conflict).await {
                    Ok(()) => outcome.conflicts += 1,
                    Err(e) => {
                        tracing::warn!(unit_id = %unit.id, error = %e, "Failed to record conflict");
                        outcome.errored = true;
                    }
                }
            }
        }

        outcome
    }

    /// Full inbound pipeline for one integration: fetch credentials, pull
    /// rows from the provider and apply them. Fatal failures leave the
    /// integration in `error` with the message recorded.
    pub async fn run_inbound(&self, integration: &Integration, sync_type: SyncType) -> Result<SyncResult, SyncError> {
        let ctx = SyncContext::for_integration(integration, sync_type)?;
        self.store
            .set_status(integration.id, IntegrationStatus::Syncing)
            .await?;

        let result = match self.pull_rows(integration).await {
            Ok(rows) => self.sync_inbound(&ctx, rows).await,
            Err(e) => {
                let log_id = self
                    .store
                    .start_log(integration.id, sync_type, SyncDirection::Inbound)
                    .await?;
                self.store
                    .complete_log(log_id, SyncRunStatus::Failed, Some(&e.to_string()), &SyncStats::default())
                    .await?;
                Err(e)
            }
        };

        if let Err(e) = &result {
            tracing::error!(integration_id = %integration.id, error = %e, "Inbound sync aborted");
            self.store.mark_error(integration.id, &e.to_string()).await?;
        }
        result
    }

    /// Run every scheduled inbound integration, one at a time. Returns the
    /// number of successful runs.
    pub async fn run_scheduled(&self) -> Result<usize, SyncError> {
        let integrations = self.store.scheduled_inbound().await?;
        let mut succeeded = 0;
        for integration in &integrations {
            match self.run_inbound(integration, SyncType::Incremental).await {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    tracing::warn!(integration_id = %integration.id, error = %e, "Scheduled sync failed");
                }
            }
        }
        Ok(succeeded)
    }

    async fn pull_rows(&self, integration: &Integration) -> Result<Vec<ExternalRow>, SyncError> {
        let adapter = self.adapter_for(integration)?;
        match adapter {
            ProviderAdapter::Spreadsheet(sheets) => {
                let external_ref = integration.external_ref.as_deref().ok_or_else(|| {
                    SyncError::Misconfigured {
                        id: integration.id,
                        message: "no spreadsheet selected".into(),
                    }
                })?;
                let (file_id, sheet) = spreadsheet_location(external_ref);
                Ok(sheets.changed_rows(file_id, sheet).await?)
            }
            ProviderAdapter::Crm(crm) => {
                let object = self.crm_object(integration).await?;
                let since = integration.last_sync_at.unwrap_or(DateTime::UNIX_EPOCH);
                let records = crm.changed_records(&object, since).await?;
                Ok(records.into_iter().map(|r| r.into_row()).collect())
            }
        }
    }

    /// CRM object an inbound run reads: the integration's `external_ref`,
    /// else the object prefix of the first `object.field` mapping label.
    async fn crm_object(&self, integration: &Integration) -> Result<String, SyncError> {
        if let Some(object) = integration.external_ref.as_deref().filter(|o| !o.is_empty()) {
            return Ok(object.to_string());
        }
        let mappings = self.store.active_mappings(integration.id).await?;
        mappings
            .iter()
            .find_map(|m| m.external_object())
            .map(str::to_string)
            .ok_or_else(|| SyncError::Misconfigured {
                id: integration.id,
                message: "no CRM object configured".into(),
            })
    }

    fn adapter_for(&self, integration: &Integration) -> Result<ProviderAdapter, SyncError> {
        let kind: IntegrationType = integration.kind()?;
        let tokens = load_tokens(&self.vault, integration)?;
        Ok(self.adapters.adapter(kind, Some(&tokens))?)
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Push one internal change to every outbound integration of the unit's
    /// development. Provider failures are recorded per integration and do not
    /// stop the others.
    pub async fn sync_outbound(&self, change: &ChangeEvent) -> Result<Vec<OutboundResult>, SyncError> {
        let integrations = self
            .store
            .outbound_integrations(change.tenant_id, change.development_id)
            .await?;

        let mut results = Vec::new();
        for integration in &integrations {
            let mappings: Vec<FieldMapping> = self
                .store
                .active_mappings(integration.id)
                .await?
                .into_iter()
                .filter(|m| {
                    m.direction() != SyncDirection::Inbound
                        && m.oh_table == change.table
                        && m.oh_field == change.field
                })
                .collect();
            if mappings.is_empty() {
                continue;
            }
            results.push(self.push_change(integration, &mappings, change).await?);
        }
        Ok(results)
    }

    async fn push_change(
        &self,
        integration: &Integration,
        mappings: &[FieldMapping],
        change: &ChangeEvent,
    ) -> Result<OutboundResult, SyncError> {
        let log_id = self
            .store
            .start_log(integration.id, SyncType::Incremental, SyncDirection::Outbound)
            .await?;
        let mut stats = SyncStats {
            records_processed: 1,
            ..Default::default()
        };

        let value = value_to_string(&change.new_value);
        let pushed = match self.adapter_for(integration) {
            Ok(ProviderAdapter::Spreadsheet(sheets)) => {
                self.push_to_sheet(sheets.as_ref(), integration, mappings, change, &value)
                    .await
            }
            Ok(ProviderAdapter::Crm(crm)) => {
                self.push_to_crm(crm.as_ref(), integration, mappings, change, &value)
                    .await
            }
            Err(e) => Err(e),
        };

        let (status, error) = match pushed {
            Ok(true) => {
                stats.records_updated = 1;
                (SyncRunStatus::Completed, None)
            }
            Ok(false) => {
                stats.records_skipped = 1;
                (SyncRunStatus::Completed, None)
            }
            Err(e) => {
                tracing::warn!(
                    integration_id = %integration.id,
                    record_id = %change.record_id,
                    error = %e,
                    "Outbound sync failed"
                );
                stats.records_errored = 1;
                (SyncRunStatus::Failed, Some(e.to_string()))
            }
        };
        self.store
            .complete_log(log_id, status, error.as_deref(), &stats)
            .await?;

        if stats.records_updated > 0 {
            self.store
                .audit(NewAuditEntry::system(
                    change.tenant_id,
                    actions::SYNC_OUTBOUND_WRITTEN,
                    json!({
                        "integration_id": integration.id,
                        "sync_log_id": log_id,
                        "unit_id": change.record_id,
                        "table": change.table,
                        "field": change.field,
                        "old_value": change.old_value,
                        "new_value": change.new_value,
                    }),
                ))
                .await;
        }

        Ok(OutboundResult {
            integration_id: integration.id,
            sync_log_id: log_id,
            status,
            stats,
        })
    }

    /// Locate the unit's row and write every mapped column in one batch.
    /// Returns whether anything was written.
    async fn push_to_sheet(
        &self,
        sheets: &dyn SpreadsheetAdapter,
        integration: &Integration,
        mappings: &[FieldMapping],
        change: &ChangeEvent,
        value: &str,
    ) -> Result<bool, SyncError> {
        let Some(external_ref) = integration.external_ref.as_deref() else {
            return Ok(false);
        };
        let (file_id, sheet) = spreadsheet_location(external_ref);

        let Some(identifier) = self.unit_identifier(change).await? else {
            return Ok(false);
        };
        let all_mappings = self.store.active_mappings(integration.id).await?;
        let Some(identifier_column) = all_mappings
            .iter()
            .find(|m| m.is_unit_identifier())
            .map(|m| m.external_field.clone())
        else {
            return Ok(false);
        };

        let headers = sheets.headers(file_id, sheet).await?;
        let rows = sheets.rows(file_id, sheet).await?;
        let Some(row_index) = rows.iter().position(|row| {
            row.get(&identifier_column)
                .is_some_and(|cell| identifiers_match(&value_to_string(cell), &identifier))
        }) else {
            return Ok(false);
        };

        let updates: Vec<CellUpdate> = mappings
            .iter()
            .filter_map(|m| {
                let col = headers.iter().position(|h| *h == m.external_field)?;
                Some(CellUpdate {
                    row: row_index + 1,
                    col,
                    value: value.to_string(),
                })
            })
            .collect();
        if updates.is_empty() {
            return Ok(false);
        }
        sheets.batch_update(file_id, sheet, &updates).await?;
        Ok(true)
    }

    /// Update the unit's linked CRM record, one call per object. Units with
    /// no recorded external id are skipped.
    async fn push_to_crm(
        &self,
        crm: &dyn CrmAdapter,
        integration: &Integration,
        mappings: &[FieldMapping],
        change: &ChangeEvent,
        value: &str,
    ) -> Result<bool, SyncError> {
        let mut by_object: BTreeMap<String, ExternalRow> = BTreeMap::new();
        for mapping in mappings {
            let Some(object) = mapping
                .external_object()
                .or(integration.external_ref.as_deref())
            else {
                tracing::debug!(mapping_id = %mapping.id, "Mapping names no CRM object");
                continue;
            };
            by_object
                .entry(object.to_string())
                .or_default()
                .insert(mapping.external_field.clone(), Value::String(value.to_string()));
        }

        let mut written = false;
        for (object, data) in by_object {
            let Some(external_id) = self
                .store
                .external_id(change.record_id, integration.id, Some(&object))
                .await?
            else {
                continue;
            };
            crm.update_record(&object, &external_id, &data).await?;
            written = true;
        }
        Ok(written)
    }

    async fn unit_identifier(&self, change: &ChangeEvent) -> Result<Option<String>, SyncError> {
        if let Some(identifier) = change.unit_identifier.as_deref().filter(|i| !i.is_empty()) {
            return Ok(Some(identifier.to_string()));
        }
        let units = self.store.units(change.development_id).await?;
        Ok(units
            .into_iter()
            .find(|u| u.id == change.record_id)
            .map(|u| u.address))
    }

    fn publish(&self, tenant_id: DbId, event_type: &str, integration_id: DbId, payload: Value) {
        if let Some(events) = &self.events {
            events.publish(
                PlatformEvent::new(event_type)
                    .for_tenant(tenant_id)
                    .with_source("integration", integration_id)
                    .with_payload(payload),
            );
        }
    }
}

#[derive(Debug, Default)]
struct RowOutcome {
    updated: bool,
    errored: bool,
    conflicts: i32,
}
