//! `OH:` enrichment columns written back to developer spreadsheets.
//!
//! After an inbound sync the writer appends any missing `OH:` headers, finds
//! each unit's row by its address-like columns and writes engagement and
//! compliance figures for the unit in a single batch.

use std::sync::Arc;

use openhouse_core::audit::actions;
use openhouse_core::integration::IntegrationCategory;
use openhouse_core::matching::{identifiers_match, UnitCandidate};
use openhouse_core::transform::value_to_string;
use openhouse_core::types::{DbId, ExternalRow, Timestamp};
use openhouse_core::vault::CredentialVault;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::integration::Integration;
use openhouse_db::models::unit::UnitMetrics;
use regex::Regex;
use serde_json::json;

use crate::adapters::{AdapterSource, CellUpdate, ProviderAdapter, SpreadsheetAdapter};
use crate::engine::{load_tokens, spreadsheet_location};
use crate::error::SyncError;
use crate::store::SyncStore;

pub const APP_ACTIVE: &str = "OH: App Active";
pub const QUESTIONS_ASKED: &str = "OH: Questions Asked";
pub const LAST_ACTIVE: &str = "OH: Last Active";
pub const COMPLIANCE_PERCENT: &str = "OH: Compliance %";
pub const HANDOVER_READY: &str = "OH: Handover Ready";

/// Enrichment headers in the order they are appended.
pub const ENRICHMENT_COLUMNS: &[&str] = &[
    APP_ACTIVE,
    QUESTIONS_ASKED,
    LAST_ACTIVE,
    COMPLIANCE_PERCENT,
    HANDOVER_READY,
];

const ENRICHMENT_PREFIX: &str = "OH:";
const ADDRESS_COLUMN_PATTERN: &str = r"(?i)address|unit|plot|house|property";

/// Cell values for one unit, keyed by enrichment header.
pub fn compute_enrichment(metrics: &UnitMetrics) -> Vec<(&'static str, String)> {
    let compliance = if metrics.required_documents > 0 {
        let percent = (metrics.completed_documents as f64 / metrics.required_documents as f64 * 100.0).round();
        format!("{percent}%")
    } else {
        "N/A".to_string()
    };
    let handover = if metrics.required_documents > 0 {
        yes_no(metrics.completed_documents >= metrics.required_documents)
    } else {
        "N/A".to_string()
    };

    vec![
        (APP_ACTIVE, yes_no(metrics.message_count > 0)),
        (QUESTIONS_ASKED, metrics.questions_asked.to_string()),
        (LAST_ACTIVE, format_last_active(metrics.last_active_at)),
        (COMPLIANCE_PERCENT, compliance),
        (HANDOVER_READY, handover),
    ]
}

fn yes_no(value: bool) -> String {
    let answer = if value { "Yes" } else { "No" };
    answer.to_string()
}

fn format_last_active(at: Option<Timestamp>) -> String {
    at.map(|t| t.format("%d/%m/%Y").to_string())
        .unwrap_or_else(|| "Never".to_string())
}

/// Headers that can identify a unit, excluding enrichment columns.
pub fn address_columns(headers: &[String]) -> Vec<String> {
    let pattern = match Regex::new(ADDRESS_COLUMN_PATTERN) {
        Ok(pattern) => pattern,
        Err(_) => return Vec::new(),
    };
    headers
        .iter()
        .filter(|h| !h.starts_with(ENRICHMENT_PREFIX) && pattern.is_match(h))
        .cloned()
        .collect()
}

/// Index of the first row whose address-like cell matches the unit.
pub fn find_unit_row(rows: &[ExternalRow], address_columns: &[String], unit: &UnitCandidate) -> Option<usize> {
    let needle = if unit.address.trim().is_empty() {
        unit.unit_number.as_deref().unwrap_or_default()
    } else {
        unit.address.as_str()
    };
    rows.iter().position(|row| {
        address_columns.iter().any(|col| {
            row.get(col)
                .is_some_and(|cell| identifiers_match(&value_to_string(cell), needle))
        })
    })
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnrichmentSummary {
    pub columns_added: usize,
    pub units_enriched: usize,
    pub units_failed: usize,
    pub cells_written: usize,
}

pub struct EnrichmentWriter {
    store: Arc<dyn SyncStore>,
    adapters: Arc<dyn AdapterSource>,
    vault: CredentialVault,
}

impl EnrichmentWriter {
    pub fn new(store: Arc<dyn SyncStore>, adapters: Arc<dyn AdapterSource>, vault: CredentialVault) -> Self {
        Self {
            store,
            adapters,
            vault,
        }
    }

    /// Refresh enrichment columns for one integration. Integrations that are
    /// not spreadsheets, or lack a file or development, are left alone.
    pub async fn enrich(&self, integration_id: DbId) -> Result<EnrichmentSummary, SyncError> {
        let integration = self
            .store
            .find_integration(integration_id)
            .await?
            .ok_or(SyncError::IntegrationNotFound(integration_id))?;

        let (Some(external_ref), Some(development_id)) =
            (integration.external_ref.as_deref(), integration.development_id)
        else {
            return Ok(EnrichmentSummary::default());
        };
        if integration.kind()?.category() != IntegrationCategory::Spreadsheet {
            return Ok(EnrichmentSummary::default());
        }

        let result = self.write(&integration, external_ref, development_id).await;
        match &result {
            Ok(summary) => {
                tracing::info!(
                    integration_id = %integration.id,
                    units = summary.units_enriched,
                    cells = summary.cells_written,
                    "Enrichment columns written"
                );
                self.store
                    .audit(NewAuditEntry::system(
                        integration.tenant_id,
                        actions::ENRICHMENT_SYNCED,
                        json!({
                            "integration_id": integration.id,
                            "columns_added": summary.columns_added,
                            "units_enriched": summary.units_enriched,
                            "units_failed": summary.units_failed,
                            "cells_written": summary.cells_written,
                        }),
                    ))
                    .await;
            }
            Err(e) => {
                self.store
                    .audit(NewAuditEntry::system(
                        integration.tenant_id,
                        actions::ENRICHMENT_FAILED,
                        json!({ "integration_id": integration.id, "error": e.to_string() }),
                    ))
                    .await;
            }
        }
        result
    }

    async fn write(
        &self,
        integration: &Integration,
        external_ref: &str,
        development_id: DbId,
    ) -> Result<EnrichmentSummary, SyncError> {
        let tokens = load_tokens(&self.vault, integration)?;
        let ProviderAdapter::Spreadsheet(sheets) = self.adapters.adapter(integration.kind()?, Some(&tokens))? else {
            return Ok(EnrichmentSummary::default());
        };
        let (file_id, sheet) = spreadsheet_location(external_ref);
        let mut summary = EnrichmentSummary::default();

        let mut headers = sheets.headers(file_id, sheet).await?;
        for column in ENRICHMENT_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                sheets.add_column(file_id, sheet, column).await?;
                headers.push((*column).to_string());
                summary.columns_added += 1;
            }
        }

        let units = self.store.units(development_id).await?;
        if units.is_empty() {
            return Ok(summary);
        }
        let rows = sheets.rows(file_id, sheet).await?;
        let address_columns = address_columns(&headers);

        let mut updates = Vec::new();
        for unit in &units {
            let Some(row_index) = find_unit_row(&rows, &address_columns, unit) else {
                continue;
            };
            let metrics = match self.store.unit_metrics(unit.id).await {
                Ok(metrics) => metrics,
                Err(e) => {
                    tracing::warn!(unit_id = %unit.id, error = %e, "Failed to compute enrichment metrics");
                    summary.units_failed += 1;
                    continue;
                }
            };
            for (header, value) in compute_enrichment(&metrics) {
                if let Some(col) = headers.iter().position(|h| h == header) {
                    updates.push(CellUpdate {
                        row: row_index + 1,
                        col,
                        value,
                    });
                }
            }
            summary.units_enriched += 1;
        }

        write_batch(sheets.as_ref(), file_id, sheet, &updates).await?;
        summary.cells_written = updates.len();
        Ok(summary)
    }
}

async fn write_batch(
    sheets: &dyn SpreadsheetAdapter,
    file_id: &str,
    sheet: &str,
    updates: &[CellUpdate],
) -> Result<(), SyncError> {
    if updates.is_empty() {
        return Ok(());
    }
    sheets.batch_update(file_id, sheet, updates).await?;
    tracing::debug!(cells = updates.len(), "Enrichment batch submitted");
    Ok(())
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    use super::*;

    fn value_of(values: &[(&'static str, String)], header: &str) -> String {
        values
            .iter()
            .find(|(h, _)| *h == header)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    #[test]
    fn inactive_unit_without_compliance_types() {
        let values = compute_enrichment(&UnitMetrics::default());
        assert_eq!(value_of(&values, APP_ACTIVE), "No");
        assert_eq!(value_of(&values, QUESTIONS_ASKED), "0");
        assert_eq!(value_of(&values, LAST_ACTIVE), "Never");
        assert_eq!(value_of(&values, COMPLIANCE_PERCENT), "N/A");
        assert_eq!(value_of(&values, HANDOVER_READY), "N/A");
    }

    #[test]
    fn active_unit_with_partial_compliance() {
        let metrics = UnitMetrics {
            message_count: 12,
            questions_asked: 7,
            last_active_at: Some(Utc.with_ymd_and_hms(2025, 3, 4, 18, 30, 0).unwrap()),
            required_documents: 3,
            completed_documents: 2,
        };
        let values = compute_enrichment(&metrics);
        assert_eq!(value_of(&values, APP_ACTIVE), "Yes");
        assert_eq!(value_of(&values, QUESTIONS_ASKED), "7");
        assert_eq!(value_of(&values, LAST_ACTIVE), "04/03/2025");
        assert_eq!(value_of(&values, COMPLIANCE_PERCENT), "67%");
        assert_eq!(value_of(&values, HANDOVER_READY), "No");
    }

    #[test]
    fn complete_compliance_is_handover_ready() {
        let metrics = UnitMetrics {
            required_documents: 4,
            completed_documents: 4,
            ..Default::default()
        };
        let values = compute_enrichment(&metrics);
        assert_eq!(value_of(&values, COMPLIANCE_PERCENT), "100%");
        assert_eq!(value_of(&values, HANDOVER_READY), "Yes");
    }

    #[test]
    fn address_columns_skip_enrichment_headers() {
        let headers: Vec<String> = ["Plot No", "Purchaser", "Property Address", "OH: Unit Status", "House Type"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        assert_eq!(address_columns(&headers), vec!["Plot No", "Property Address", "House Type"]);
    }

    #[test]
    fn unit_rows_match_tolerantly() {
        let unit = UnitCandidate {
            id: DbId::new_v4(),
            address: "14 Meadow Way".into(),
            unit_number: Some("14".into()),
        };
        let mut first = ExternalRow::new();
        first.insert("Address".into(), Value::String("2 Meadow Way".into()));
        let mut second = ExternalRow::new();
        second.insert("Address".into(), Value::String("14 meadow way, Ballymore".into()));
        let rows = vec![first, second];

        assert_eq!(find_unit_row(&rows, &["Address".to_string()], &unit), Some(1));
        assert_eq!(find_unit_row(&rows, &["Plot".to_string()], &unit), None);
    }
}
