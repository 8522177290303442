//! External API handlers, authenticated by API key.
//!
//! Every response, success or error past the gateway, carries the caller's
//! `X-RateLimit-*` headers.

use axum::extract::{Path, Query, State};
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum::Json;
use openhouse_core::audit::{actions, actor_types};
use openhouse_core::column_mapper;
use openhouse_core::error::CoreError;
use openhouse_core::transform::value_to_string;
use openhouse_core::types::DbId;
use openhouse_core::webhooks::event_types;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::unit::{Unit, UnitFieldUpdate, UnitWithPipeline};
use openhouse_db::repositories::{AuditLogRepo, UnitRepo};
use openhouse_events::PlatformEvent;
use openhouse_integrations::ChangeEvent;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::{AppError, AppResult};
use crate::middleware::api_key::{ApiKeyAuth, UnitsRead, UnitsWrite};
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct UnitFieldUpdated {
    pub unit_id: DbId,
    pub table: String,
    pub field: String,
    pub old_value: Option<String>,
    pub new_value: Option<String>,
}

/// GET /api/v1/external/developments/{id}/units
pub async fn list_units(
    gateway: ApiKeyAuth<UnitsRead>,
    State(state): State<AppState>,
    Path(development_id): Path<DbId>,
    Query(params): Query<PaginationParams>,
) -> (HeaderMap, AppResult<impl IntoResponse>) {
    let result = fetch_units(&gateway, &state, development_id, &params).await;
    (gateway.headers(), result.map(|data| Json(DataResponse { data })))
}

async fn fetch_units(
    gateway: &ApiKeyAuth<UnitsRead>,
    state: &AppState,
    development_id: DbId,
    params: &PaginationParams,
) -> AppResult<Vec<UnitWithPipeline>> {
    gateway.require_development(development_id)?;
    let units = UnitRepo::list_with_pipeline(
        &state.pool,
        gateway.context.tenant_id,
        development_id,
        params.limit(),
        params.offset(),
    )
    .await?;
    Ok(units)
}

/// PATCH /api/v1/external/units/{id}
///
/// Write one mapped field, then queue an outbound push and emit
/// `unit.updated`.
pub async fn update_unit(
    gateway: ApiKeyAuth<UnitsWrite>,
    State(state): State<AppState>,
    Path(unit_id): Path<DbId>,
    Json(input): Json<UnitFieldUpdate>,
) -> (HeaderMap, AppResult<impl IntoResponse>) {
    let result = apply_unit_update(&gateway, &state, unit_id, input).await;
    (gateway.headers(), result.map(|data| Json(DataResponse { data })))
}

async fn apply_unit_update(
    gateway: &ApiKeyAuth<UnitsWrite>,
    state: &AppState,
    unit_id: DbId,
    input: UnitFieldUpdate,
) -> AppResult<UnitFieldUpdated> {
    let tenant_id = gateway.context.tenant_id;

    // Units of other tenants are indistinguishable from missing ones.
    let unit: Unit = UnitRepo::find_by_id(&state.pool, unit_id)
        .await?
        .filter(|u| u.tenant_id == tenant_id)
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Unit",
            id: unit_id,
        }))?;
    gateway.require_development(unit.development_id)?;

    if !column_mapper::is_known_target(&input.table, &input.field) {
        return Err(AppError::Core(CoreError::Validation(format!(
            "Unknown field '{}.{}'",
            input.table, input.field
        ))));
    }

    let new_value = match &input.value {
        Value::Null => None,
        other => Some(value_to_string(other)),
    };
    let old_value = UnitRepo::read_field(&state.pool, &input.table, &input.field, unit.id).await?;
    UnitRepo::write_field(
        &state.pool,
        &input.table,
        &input.field,
        unit.id,
        new_value.as_deref(),
    )
    .await?;

    AuditLogRepo::record(
        &state.pool,
        NewAuditEntry::system(
            tenant_id,
            actions::UNIT_UPDATED_VIA_API,
            json!({
                "unit_id": unit.id,
                "table": input.table,
                "field": input.field,
                "old_value": old_value,
                "new_value": new_value,
            }),
        )
        .with_actor(actor_types::API_KEY, Some(gateway.context.key_id)),
    )
    .await;

    state.event_bus.publish(
        PlatformEvent::new(event_types::UNIT_UPDATED)
            .for_tenant(tenant_id)
            .with_source("unit", unit.id)
            .with_payload(json!({
                "unit_id": unit.id,
                "development_id": unit.development_id,
                "table": input.table,
                "field": input.field,
                "old_value": old_value,
                "new_value": new_value,
            })),
    );

    state.jobs.trigger(ChangeEvent {
        tenant_id,
        development_id: unit.development_id,
        table: input.table.clone(),
        field: input.field.clone(),
        record_id: unit.id,
        unit_identifier: Some(unit.address.clone()),
        old_value: old_value.clone().map_or(Value::Null, Value::String),
        new_value: input.value,
    });

    tracing::info!(
        unit_id = %unit.id,
        key_id = %gateway.context.key_id,
        table = %input.table,
        field = %input.field,
        "Unit updated via external API"
    );

    Ok(UnitFieldUpdated {
        unit_id: unit.id,
        table: input.table,
        field: input.field,
        old_value,
        new_value,
    })
}
