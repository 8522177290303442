//! Fake providers and fixtures shared by the sync tests.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use openhouse_core::integration::{IntegrationCategory, IntegrationType};
use openhouse_core::matching::UnitCandidate;
use openhouse_core::types::{DbId, ExternalRow, Timestamp};
use openhouse_core::vault::{CredentialVault, KdfParams};
use openhouse_db::models::integration::{FieldMapping, Integration};
use openhouse_integrations::adapters::{
    AdapterSource, CellUpdate, CrmAdapter, CrmField, CrmObject, CrmRecord, OAuthProvider,
    OAuthTokens, ProviderAdapter, ProviderError, QueryFilter, SpreadsheetAdapter, SpreadsheetFile,
};
use openhouse_integrations::{
    EnrichmentWriter, InMemorySyncStore, SyncEngine, SyncStore, TokenRefresher,
};
use serde_json::Value;

pub const MASTER_SECRET: &str = "test-master-secret-0123456789abcdef";

pub fn vault() -> CredentialVault {
    CredentialVault::with_params(
        MASTER_SECRET,
        KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        },
    )
    .unwrap()
}

pub fn tokens(access: &str, expires_in: Duration) -> OAuthTokens {
    OAuthTokens {
        access_token: access.to_string(),
        refresh_token: Some("rt-1".into()),
        expires_at: Some(Utc::now() + expires_in),
        ..Default::default()
    }
}

pub fn row(pairs: &[(&str, &str)]) -> ExternalRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), Value::String(v.to_string())))
        .collect()
}

// ---------------------------------------------------------------------------
// Fake spreadsheet
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct SheetState {
    pub headers: Vec<String>,
    pub rows: Vec<ExternalRow>,
    pub batches: Vec<(String, String, Vec<CellUpdate>)>,
    pub added_columns: Vec<String>,
    pub fail_reads: bool,
    /// Access token handed out on refresh; `None` rejects the grant.
    pub refreshed_access: Option<String>,
    pub refresh_calls: Vec<String>,
}

#[derive(Clone, Default)]
pub struct FakeSheet(pub Arc<Mutex<SheetState>>);

impl FakeSheet {
    pub fn state(&self) -> std::sync::MutexGuard<'_, SheetState> {
        self.0.lock().unwrap()
    }

    pub fn set_sheet(&self, headers: &[&str], rows: Vec<ExternalRow>) {
        let mut state = self.state();
        state.headers = headers.iter().map(|h| h.to_string()).collect();
        state.rows = rows;
    }

    pub fn batches(&self) -> Vec<Vec<CellUpdate>> {
        self.state().batches.iter().map(|(_, _, u)| u.clone()).collect()
    }

    fn check_reads(&self) -> Result<(), ProviderError> {
        if self.state().fail_reads {
            return Err(ProviderError::Api {
                provider: "Fake Sheets",
                status: 503,
                message: "backend unavailable".into(),
            });
        }
        Ok(())
    }
}

fn refreshed(state: &mut SheetState, refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
    state.refresh_calls.push(refresh_token.to_string());
    match &state.refreshed_access {
        Some(access) => Ok(OAuthTokens {
            access_token: access.clone(),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            ..Default::default()
        }),
        None => Err(ProviderError::Api {
            provider: "Fake Sheets",
            status: 400,
            message: "invalid_grant".into(),
        }),
    }
}

#[async_trait]
impl OAuthProvider for FakeSheet {
    fn provider_name(&self) -> &'static str {
        "Fake Sheets"
    }

    fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        Ok(format!("https://sheets.test/authorize?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, ProviderError> {
        Ok(OAuthTokens {
            access_token: format!("access-for-{code}"),
            ..Default::default()
        })
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
        refreshed(&mut self.state(), refresh_token)
    }
}

#[async_trait]
impl SpreadsheetAdapter for FakeSheet {
    async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetFile>, ProviderError> {
        Ok(Vec::new())
    }

    async fn headers(&self, _file_id: &str, _sheet: &str) -> Result<Vec<String>, ProviderError> {
        self.check_reads()?;
        Ok(self.state().headers.clone())
    }

    async fn rows(&self, _file_id: &str, _sheet: &str) -> Result<Vec<ExternalRow>, ProviderError> {
        self.check_reads()?;
        Ok(self.state().rows.clone())
    }

    async fn sample_data(&self, _file_id: &str, _sheet: &str, _rows: usize) -> Result<Vec<Vec<String>>, ProviderError> {
        Ok(Vec::new())
    }

    async fn update_cell(
        &self,
        file_id: &str,
        sheet: &str,
        row: usize,
        _column: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        self.state().batches.push((
            file_id.to_string(),
            sheet.to_string(),
            vec![CellUpdate {
                row: row.saturating_sub(1),
                col: 0,
                value: value.to_string(),
            }],
        ));
        Ok(())
    }

    async fn add_column(&self, _file_id: &str, _sheet: &str, header: &str) -> Result<(), ProviderError> {
        let mut state = self.state();
        state.headers.push(header.to_string());
        state.added_columns.push(header.to_string());
        Ok(())
    }

    async fn batch_update(&self, file_id: &str, sheet: &str, updates: &[CellUpdate]) -> Result<(), ProviderError> {
        self.state()
            .batches
            .push((file_id.to_string(), sheet.to_string(), updates.to_vec()));
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Fake CRM
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct CrmState {
    pub records: Vec<CrmRecord>,
    pub changed_calls: Vec<(String, Timestamp)>,
    pub updates: Vec<(String, String, ExternalRow)>,
    pub fail_updates: bool,
}

#[derive(Clone, Default)]
pub struct FakeCrm(pub Arc<Mutex<CrmState>>);

impl FakeCrm {
    pub fn state(&self) -> std::sync::MutexGuard<'_, CrmState> {
        self.0.lock().unwrap()
    }
}

#[async_trait]
impl OAuthProvider for FakeCrm {
    fn provider_name(&self) -> &'static str {
        "Fake CRM"
    }

    fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        Ok(format!("https://crm.test/authorize?state={state}"))
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, ProviderError> {
        Ok(OAuthTokens {
            access_token: format!("access-for-{code}"),
            ..Default::default()
        })
    }

    async fn refresh_token(&self, _refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
        Err(ProviderError::MissingToken("Fake CRM"))
    }
}

#[async_trait]
impl CrmAdapter for FakeCrm {
    async fn available_objects(&self) -> Result<Vec<CrmObject>, ProviderError> {
        Ok(Vec::new())
    }

    async fn object_fields(&self, _object: &str) -> Result<Vec<CrmField>, ProviderError> {
        Ok(Vec::new())
    }

    async fn query(&self, _object: &str, _filters: &[QueryFilter]) -> Result<Vec<CrmRecord>, ProviderError> {
        Ok(self.state().records.clone())
    }

    async fn get_record(&self, _object: &str, id: &str) -> Result<CrmRecord, ProviderError> {
        self.state()
            .records
            .iter()
            .find(|r| r.id == id)
            .cloned()
            .ok_or_else(|| ProviderError::Api {
                provider: "Fake CRM",
                status: 404,
                message: "not found".into(),
            })
    }

    async fn create_record(&self, _object: &str, _data: &ExternalRow) -> Result<String, ProviderError> {
        Ok("new-1".into())
    }

    async fn update_record(&self, object: &str, id: &str, data: &ExternalRow) -> Result<(), ProviderError> {
        let mut state = self.state();
        if state.fail_updates {
            return Err(ProviderError::Api {
                provider: "Fake CRM",
                status: 400,
                message: "field is read-only".into(),
            });
        }
        state
            .updates
            .push((object.to_string(), id.to_string(), data.clone()));
        Ok(())
    }

    async fn changed_records(&self, object: &str, since: Timestamp) -> Result<Vec<CrmRecord>, ProviderError> {
        let mut state = self.state();
        state.changed_calls.push((object.to_string(), since));
        Ok(state.records.clone())
    }
}

// ---------------------------------------------------------------------------
// Adapter source
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct FakeAdapters {
    pub sheet: FakeSheet,
    pub crm: FakeCrm,
    pub seen_tokens: Arc<Mutex<Vec<String>>>,
}

impl AdapterSource for FakeAdapters {
    fn adapter(
        &self,
        kind: IntegrationType,
        tokens: Option<&OAuthTokens>,
    ) -> Result<ProviderAdapter, ProviderError> {
        if let Some(tokens) = tokens {
            self.seen_tokens
                .lock()
                .unwrap()
                .push(tokens.access_token.clone());
        }
        Ok(match kind.category() {
            IntegrationCategory::Spreadsheet => ProviderAdapter::Spreadsheet(Box::new(self.sheet.clone())),
            IntegrationCategory::Crm => ProviderAdapter::Crm(Box::new(self.crm.clone())),
        })
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub tenant_id: DbId,
    pub development_id: DbId,
    pub store: Arc<InMemorySyncStore>,
    pub adapters: FakeAdapters,
    pub vault: CredentialVault,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            tenant_id: DbId::new_v4(),
            development_id: DbId::new_v4(),
            store: Arc::new(InMemorySyncStore::new()),
            adapters: FakeAdapters::default(),
            vault: vault(),
        }
    }

    pub fn store(&self) -> Arc<dyn SyncStore> {
        self.store.clone()
    }

    pub fn source(&self) -> Arc<dyn AdapterSource> {
        Arc::new(self.adapters.clone())
    }

    pub fn engine(&self) -> SyncEngine {
        SyncEngine::new(self.store(), self.source(), self.vault.clone())
    }

    pub fn enrichment(&self) -> EnrichmentWriter {
        EnrichmentWriter::new(self.store(), self.source(), self.vault.clone())
    }

    pub fn refresher(&self) -> TokenRefresher {
        TokenRefresher::new(self.store(), self.source(), self.vault.clone())
    }

    pub fn sheet(&self) -> &FakeSheet {
        &self.adapters.sheet
    }

    pub fn crm(&self) -> &FakeCrm {
        &self.adapters.crm
    }

    /// Insert a connected integration whose credentials hold `tokens`.
    pub fn integration(&self, kind: IntegrationType, external_ref: Option<&str>, tokens: &OAuthTokens) -> Integration {
        let now = Utc::now();
        let integration = Integration {
            id: DbId::new_v4(),
            tenant_id: self.tenant_id,
            development_id: Some(self.development_id),
            integration_type: kind.as_str().to_string(),
            name: format!("{} for tests", kind.as_str()),
            status: "connected".into(),
            credentials: Some(self.vault.encrypt(self.tenant_id, tokens).unwrap()),
            sync_direction: "bidirectional".into(),
            sync_frequency: "hourly".into(),
            external_ref: external_ref.map(str::to_string),
            last_sync_at: None,
            last_error: None,
            last_error_at: None,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_integration(integration.clone());
        integration
    }

    pub fn sheet_integration(&self) -> Integration {
        self.integration(
            IntegrationType::GoogleSheets,
            Some("file-1#Units"),
            &tokens("at-1", Duration::hours(2)),
        )
    }

    pub fn mapping(
        &self,
        integration_id: DbId,
        external_field: &str,
        target: (&str, &str),
        direction: &str,
    ) -> FieldMapping {
        let now = Utc::now();
        let mapping = FieldMapping {
            id: DbId::new_v4(),
            integration_id,
            external_field: external_field.to_string(),
            external_field_label: None,
            oh_table: target.0.to_string(),
            oh_field: target.1.to_string(),
            direction: direction.to_string(),
            transform_rule: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        self.store.insert_mapping(mapping.clone());
        mapping
    }

    pub fn ruled_mapping(&self, integration_id: DbId, external_field: &str, target: (&str, &str), rule: Value) -> FieldMapping {
        let mut mapping = self.mapping_template(integration_id, external_field, target);
        mapping.transform_rule = Some(rule);
        self.store.insert_mapping(mapping.clone());
        mapping
    }

    pub fn labelled_mapping(&self, integration_id: DbId, external_field: &str, label: &str, target: (&str, &str)) {
        let mut mapping = self.mapping_template(integration_id, external_field, target);
        mapping.external_field_label = Some(label.to_string());
        self.store.insert_mapping(mapping);
    }

    fn mapping_template(&self, integration_id: DbId, external_field: &str, target: (&str, &str)) -> FieldMapping {
        let now = Utc::now();
        FieldMapping {
            id: DbId::new_v4(),
            integration_id,
            external_field: external_field.to_string(),
            external_field_label: None,
            oh_table: target.0.to_string(),
            oh_field: target.1.to_string(),
            direction: "bidirectional".into(),
            transform_rule: None,
            is_active: true,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn unit(&self, address: &str, unit_number: Option<&str>) -> UnitCandidate {
        let unit = UnitCandidate {
            id: DbId::new_v4(),
            address: address.to_string(),
            unit_number: unit_number.map(str::to_string),
        };
        self.store.insert_unit(self.development_id, unit.clone());
        unit
    }
}
