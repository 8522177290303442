//! Sync history and conflicts for an integration.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use openhouse_core::types::DbId;
use openhouse_db::repositories::{ConflictRepo, SyncLogRepo};
use serde::Deserialize;

use crate::error::AppResult;
use crate::handlers::load_integration;
use crate::middleware::auth::AuthUser;
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConflictParams {
    /// `pending`, `resolved` or `ignored`. All when omitted.
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// GET /api/v1/integrations/{id}/sync-logs
pub async fn list_sync_logs(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    load_integration(&state.pool, auth.tenant_id, id).await?;
    let logs =
        SyncLogRepo::list_for_integration(&state.pool, id, params.limit(), params.offset()).await?;
    Ok(Json(DataResponse { data: logs }))
}

/// GET /api/v1/integrations/{id}/conflicts
pub async fn list_conflicts(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<ConflictParams>,
) -> AppResult<impl IntoResponse> {
    load_integration(&state.pool, auth.tenant_id, id).await?;
    let page = PaginationParams {
        limit: params.limit,
        offset: params.offset,
    };
    let conflicts = ConflictRepo::list_for_integration(
        &state.pool,
        id,
        params.status.as_deref(),
        page.limit(),
        page.offset(),
    )
    .await?;
    Ok(Json(DataResponse { data: conflicts }))
}
