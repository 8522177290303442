//! Operator handlers for external API keys.
//!
//! The plaintext key is returned **only** on creation; listings expose the
//! `key_prefix` for identification.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use openhouse_core::api_keys::{generate_api_key, scopes, validate_scopes};
use openhouse_core::audit::{actions, actor_types};
use openhouse_core::error::CoreError;
use openhouse_core::types::DbId;
use openhouse_db::models::api_key::{ApiKeyCreatedResponse, CreateApiKey};
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::repositories::{ApiKeyRepo, AuditLogRepo};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::handlers::validate_input;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/api-keys
///
/// Generate a new API key. The plaintext key is returned exactly once.
pub async fn create_api_key(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateApiKey>,
) -> AppResult<impl IntoResponse> {
    validate_input(&input)?;
    if input.name.trim().is_empty() {
        return Err(AppError::BadRequest("name must not be empty".into()));
    }
    validate_scopes(&input.scopes).map_err(|msg| AppError::Core(CoreError::Validation(msg)))?;

    let generated = tokio::task::spawn_blocking(generate_api_key)
        .await
        .map_err(|e| AppError::InternalError(format!("API key generation task failed: {e}")))?
        .map_err(|e| AppError::InternalError(format!("Failed to hash API key: {e}")))?;

    let key = ApiKeyRepo::create(
        &state.pool,
        auth.tenant_id,
        input.name.trim(),
        &generated.prefix,
        &generated.hash,
        &input.scopes,
        input.development_ids.as_deref(),
        input.expires_at,
    )
    .await?;

    AuditLogRepo::record(
        &state.pool,
        NewAuditEntry::system(
            auth.tenant_id,
            actions::API_KEY_CREATED,
            json!({ "key_id": key.id, "name": key.name, "scopes": key.scopes }),
        )
        .with_actor(actor_types::USER, Some(auth.user_id)),
    )
    .await;

    tracing::info!(
        api_key_id = %key.id,
        key_prefix = %generated.prefix,
        user_id = %auth.user_id,
        "API key created"
    );

    let response = ApiKeyCreatedResponse {
        id: key.id,
        name: key.name,
        key_prefix: generated.prefix,
        plaintext_key: generated.plaintext,
        scopes: key.scopes,
        development_ids: key.development_ids,
        expires_at: key.expires_at,
        created_at: key.created_at,
    };

    Ok((StatusCode::CREATED, Json(DataResponse { data: response })))
}

/// GET /api/v1/api-keys
///
/// List the tenant's keys, revoked ones included. Shows prefix only.
pub async fn list_api_keys(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let keys = ApiKeyRepo::list_by_tenant(&state.pool, auth.tenant_id).await?;
    Ok(Json(DataResponse { data: keys }))
}

/// POST /api/v1/api-keys/{id}/revoke
pub async fn revoke_api_key(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let key = ApiKeyRepo::revoke(&state.pool, auth.tenant_id, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "ApiKey",
            id,
        }))?;

    AuditLogRepo::record(
        &state.pool,
        NewAuditEntry::system(
            auth.tenant_id,
            actions::API_KEY_REVOKED,
            json!({ "key_id": id, "name": key.name }),
        )
        .with_actor(actor_types::USER, Some(auth.user_id)),
    )
    .await;

    tracing::info!(api_key_id = %id, user_id = %auth.user_id, "API key revoked");

    Ok(Json(DataResponse { data: key }))
}

/// GET /api/v1/api-keys/scopes
pub async fn list_scopes(_auth: AuthUser) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse { data: scopes::ALL }))
}
