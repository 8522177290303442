//! Field mapping handlers: list, suggest, confirm.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use openhouse_core::audit::{actions, actor_types};
use openhouse_core::column_mapper::{self, MappingSuggestion, TargetField};
use openhouse_core::error::CoreError;
use openhouse_core::integration::SyncDirection;
use openhouse_core::transform::TransformRule;
use openhouse_core::types::DbId;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::integration::CreateFieldMapping;
use openhouse_db::repositories::{AuditLogRepo, FieldMappingRepo, IntegrationRepo};
use openhouse_integrations::adapters::{CrmField, ProviderAdapter};
use openhouse_integrations::engine::{load_tokens, spreadsheet_location};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::handlers::integrations::SYNC_FREQUENCIES;
use crate::handlers::{load_integration, validate_input};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Data rows read from a spreadsheet when sampling columns.
const SAMPLE_ROWS: usize = 5;

#[derive(Debug, Deserialize)]
pub struct SuggestParams {
    /// Overrides the sheet named in the integration's `external_ref`.
    pub sheet: Option<String>,
    /// CRM object to describe. Defaults to the integration's `external_ref`.
    pub object: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SuggestResponse {
    pub columns_detected: Vec<MappingSuggestion>,
    pub available_target_fields: &'static [TargetField],
    /// CRM field metadata, index-aligned with `columns_detected`.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub external_fields: Vec<CrmField>,
}

#[derive(Debug, Deserialize)]
pub struct ConfirmMappings {
    pub mappings: Vec<CreateFieldMapping>,
    pub sync_direction: Option<String>,
    pub sync_frequency: Option<String>,
}

/// GET /api/v1/integrations/{id}/mappings
pub async fn list_mappings(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    load_integration(&state.pool, auth.tenant_id, id).await?;
    let mappings = FieldMappingRepo::list_for_integration(&state.pool, id).await?;
    Ok(Json(DataResponse { data: mappings }))
}

/// GET /api/v1/integrations/mappings/targets
pub async fn list_target_fields(_auth: AuthUser) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: column_mapper::available_target_fields(),
    }))
}

/// GET /api/v1/integrations/{id}/mappings/suggest
///
/// Read headers and sample values from the connected source and suggest an
/// internal target for each column.
pub async fn suggest_mappings(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<SuggestParams>,
) -> AppResult<impl IntoResponse> {
    let integration = load_integration(&state.pool, auth.tenant_id, id).await?;
    let tokens = load_tokens(&state.vault, &integration)?;
    let adapter = state.adapters.adapter(integration.kind()?, Some(&tokens))?;
    let external_ref = integration.external_ref.as_deref();

    let response = match adapter {
        ProviderAdapter::Spreadsheet(sheets) => {
            let external_ref = external_ref.ok_or_else(|| {
                AppError::BadRequest("Select a spreadsheet before mapping columns".into())
            })?;
            let (file, default_sheet) = spreadsheet_location(external_ref);
            let sheet = params.sheet.as_deref().unwrap_or(default_sheet);

            let sample = sheets.sample_data(file, sheet, SAMPLE_ROWS).await?;
            let (headers, samples) = split_sample(sample);
            SuggestResponse {
                columns_detected: column_mapper::suggest_mappings(&headers, &samples),
                available_target_fields: column_mapper::available_target_fields(),
                external_fields: Vec::new(),
            }
        }
        ProviderAdapter::Crm(crm) => {
            let object = params.object.as_deref().or(external_ref).ok_or_else(|| {
                AppError::BadRequest("Select a CRM object before mapping fields".into())
            })?;
            let fields = crm.object_fields(object).await?;
            let headers: Vec<String> = fields.iter().map(|f| f.label.clone()).collect();
            SuggestResponse {
                columns_detected: column_mapper::suggest_mappings(&headers, &[]),
                available_target_fields: column_mapper::available_target_fields(),
                external_fields: fields,
            }
        }
    };

    Ok(Json(DataResponse { data: response }))
}

/// PUT /api/v1/integrations/{id}/mappings
///
/// Replace the active mapping set. Mappings not in the request are
/// deactivated, not deleted.
pub async fn confirm_mappings(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<ConfirmMappings>,
) -> AppResult<impl IntoResponse> {
    load_integration(&state.pool, auth.tenant_id, id).await?;

    for mapping in &input.mappings {
        validate_mapping(mapping)?;
    }
    if let Some(direction) = input.sync_direction.as_deref() {
        direction.parse::<SyncDirection>()?;
    }
    if let Some(frequency) = input.sync_frequency.as_deref() {
        if !SYNC_FREQUENCIES.contains(&frequency) {
            return Err(AppError::Core(CoreError::Validation(format!(
                "Unknown sync_frequency '{frequency}'"
            ))));
        }
    }

    let mut saved = Vec::with_capacity(input.mappings.len());
    for mapping in &input.mappings {
        saved.push(FieldMappingRepo::upsert(&state.pool, id, mapping).await?);
    }
    let keep: Vec<String> = input
        .mappings
        .iter()
        .map(|m| m.external_field.clone())
        .collect();
    let deactivated = FieldMappingRepo::deactivate_except(&state.pool, id, &keep).await?;

    if input.sync_direction.is_some() || input.sync_frequency.is_some() {
        IntegrationRepo::update(
            &state.pool,
            auth.tenant_id,
            id,
            None,
            input.sync_direction.as_deref(),
            input.sync_frequency.as_deref(),
            None,
        )
        .await?;
    }

    AuditLogRepo::record(
        &state.pool,
        NewAuditEntry::system(
            auth.tenant_id,
            actions::MAPPINGS_CONFIRMED,
            json!({
                "integration_id": id,
                "mappings": saved.len(),
                "deactivated": deactivated,
            }),
        )
        .with_actor(actor_types::USER, Some(auth.user_id)),
    )
    .await;

    tracing::info!(
        integration_id = %id,
        mappings = saved.len(),
        deactivated = deactivated,
        "Field mappings confirmed"
    );

    Ok(Json(DataResponse { data: saved }))
}

fn validate_mapping(mapping: &CreateFieldMapping) -> AppResult<()> {
    validate_input(mapping)?;
    if !column_mapper::is_known_target(&mapping.oh_table, &mapping.oh_field) {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Unknown target field '{}.{}'",
            mapping.oh_table, mapping.oh_field
        ))));
    }
    if let Some(direction) = mapping.direction.as_deref() {
        direction.parse::<SyncDirection>()?;
    }
    if let Some(rule) = mapping.transform_rule.as_ref().filter(|r| !r.is_null()) {
        if TransformRule::from_json(rule).is_none() {
            return Err(AppError::Core(CoreError::Validation(format!(
                "Invalid transform_rule for '{}'",
                mapping.external_field
            ))));
        }
    }
    Ok(())
}

/// Split `[header, row, row, ...]` into headers and per-column samples.
/// Blank cells are not samples.
fn split_sample(mut sample: Vec<Vec<String>>) -> (Vec<String>, Vec<Vec<String>>) {
    if sample.is_empty() {
        return (Vec::new(), Vec::new());
    }
    let headers = sample.remove(0);
    let samples = (0..headers.len())
        .map(|col| {
            sample
                .iter()
                .filter_map(|row| row.get(col))
                .filter(|v| !v.trim().is_empty())
                .cloned()
                .collect()
        })
        .collect();
    (headers, samples)
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn mapping(table: &str, field: &str) -> CreateFieldMapping {
        CreateFieldMapping {
            external_field: "Price".into(),
            external_field_label: None,
            oh_table: table.into(),
            oh_field: field.into(),
            direction: None,
            transform_rule: None,
        }
    }

    #[test]
    fn sample_is_transposed_per_column() {
        let (headers, samples) = split_sample(vec![
            vec!["Address".into(), "Price".into()],
            vec!["1 Oak Road".into(), "".into()],
            vec!["2 Oak Road".into(), "250000".into()],
        ]);
        assert_eq!(headers, vec!["Address", "Price"]);
        assert_eq!(samples[0], vec!["1 Oak Road", "2 Oak Road"]);
        assert_eq!(samples[1], vec!["250000"]);
    }

    #[test]
    fn empty_sample() {
        let (headers, samples) = split_sample(Vec::new());
        assert!(headers.is_empty());
        assert!(samples.is_empty());
    }

    #[test]
    fn mapping_validation() {
        assert!(validate_mapping(&mapping("units", "address")).is_ok());
        assert_matches!(
            validate_mapping(&mapping("units", "colour")),
            Err(AppError::Core(CoreError::Validation(_)))
        );

        let mut bad_direction = mapping("units", "address");
        bad_direction.direction = Some("sideways".into());
        assert!(validate_mapping(&bad_direction).is_err());

        let mut bad_rule = mapping("units", "address");
        bad_rule.transform_rule = Some(json!({ "kind": "date" }));
        assert!(validate_mapping(&bad_rule).is_err());

        let mut good_rule = mapping("units", "address");
        good_rule.transform_rule = Some(json!({ "type": "uppercase" }));
        assert!(validate_mapping(&good_rule).is_ok());
    }
}
