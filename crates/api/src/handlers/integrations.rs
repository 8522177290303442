//! Operator handlers for integrations.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use openhouse_core::audit::{actions, actor_types};
use openhouse_core::error::CoreError;
use openhouse_core::integration::{IntegrationStatus, SyncDirection, SyncType};
use openhouse_core::types::DbId;
use openhouse_core::webhooks::event_types;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::integration::UpdateIntegration;
use openhouse_db::repositories::{AuditLogRepo, IntegrationRepo};
use openhouse_events::PlatformEvent;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::handlers::{load_integration, validate_input};
use crate::middleware::auth::AuthUser;
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Accepted `sync_frequency` values. Only non-`manual` integrations are
/// picked up by the scheduled sync.
pub const SYNC_FREQUENCIES: &[&str] = &["realtime", "hourly", "daily", "manual"];

/// GET /api/v1/integrations
pub async fn list_integrations(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    let integrations =
        IntegrationRepo::list_by_tenant(&state.pool, auth.tenant_id, params.limit(), params.offset())
            .await?;
    Ok(Json(DataResponse { data: integrations }))
}

/// GET /api/v1/integrations/{id}
pub async fn get_integration(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let integration = load_integration(&state.pool, auth.tenant_id, id).await?;
    Ok(Json(DataResponse { data: integration }))
}

/// PUT /api/v1/integrations/{id}
pub async fn update_integration(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<UpdateIntegration>,
) -> AppResult<impl IntoResponse> {
    validate_input(&input)?;
    if let Some(direction) = input.sync_direction.as_deref() {
        direction.parse::<SyncDirection>()?;
    }
    if let Some(frequency) = input.sync_frequency.as_deref() {
        validate_frequency(frequency)?;
    }

    let updated = IntegrationRepo::update(
        &state.pool,
        auth.tenant_id,
        id,
        input.name.as_deref(),
        input.sync_direction.as_deref(),
        input.sync_frequency.as_deref(),
        input.external_ref.as_deref(),
    )
    .await?
    .ok_or(AppError::Core(CoreError::NotFound {
        entity: "Integration",
        id,
    }))?;

    tracing::info!(integration_id = %id, user_id = %auth.user_id, "Integration updated");

    Ok(Json(DataResponse { data: updated }))
}

/// POST /api/v1/integrations/{id}/sync
///
/// Run an inbound sync inline and return its outcome.
pub async fn trigger_sync(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let integration = load_integration(&state.pool, auth.tenant_id, id).await?;

    if integration.status()? == IntegrationStatus::Syncing {
        return Err(AppError::Core(CoreError::Conflict(
            "A sync is already running for this integration".into(),
        )));
    }

    tracing::info!(integration_id = %id, user_id = %auth.user_id, "Manual sync requested");

    let result = state.engine.run_inbound(&integration, SyncType::Manual).await?;
    Ok(Json(DataResponse {
        data: result.to_json(),
    }))
}

/// POST /api/v1/integrations/{id}/disconnect
///
/// Clear stored credentials and mark the integration disconnected.
pub async fn disconnect_integration(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let integration = IntegrationRepo::disconnect(&state.pool, auth.tenant_id, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Integration",
            id,
        }))?;

    AuditLogRepo::record(
        &state.pool,
        NewAuditEntry::system(
            auth.tenant_id,
            actions::INTEGRATION_DISCONNECTED,
            json!({ "integration_id": id, "integration_type": integration.integration_type }),
        )
        .with_actor(actor_types::USER, Some(auth.user_id)),
    )
    .await;

    state.event_bus.publish(
        PlatformEvent::new(event_types::INTEGRATION_DISCONNECTED)
            .for_tenant(auth.tenant_id)
            .with_source("integration", id)
            .with_payload(json!({
                "integration_id": id,
                "integration_type": integration.integration_type,
                "development_id": integration.development_id,
            })),
    );

    tracing::info!(integration_id = %id, user_id = %auth.user_id, "Integration disconnected");

    Ok(Json(DataResponse { data: integration }))
}

fn validate_frequency(frequency: &str) -> AppResult<()> {
    if SYNC_FREQUENCIES.contains(&frequency) {
        Ok(())
    } else {
        Err(AppError::Core(CoreError::Validation(format!(
            "Unknown sync_frequency '{frequency}'. Expected one of: {}",
            SYNC_FREQUENCIES.join(", ")
        ))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frequencies() {
        assert!(validate_frequency("hourly").is_ok());
        assert!(validate_frequency("manual").is_ok());
        assert!(validate_frequency("weekly").is_err());
    }
}
