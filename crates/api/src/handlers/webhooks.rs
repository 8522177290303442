//! Operator handlers for webhook subscriptions.
//!
//! The signing secret is returned only by `create`; listings never expose it.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use openhouse_core::error::CoreError;
use openhouse_core::types::DbId;
use openhouse_core::webhooks::{self, DEFAULT_MAX_FAILURES};
use openhouse_db::models::webhook::{CreateWebhook, UpdateWebhook, Webhook};
use openhouse_db::repositories::WebhookRepo;
use serde::Serialize;

use crate::error::{AppError, AppResult};
use crate::handlers::validate_input;
use crate::middleware::auth::AuthUser;
use crate::query::PaginationParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// Webhook plus its signing secret, returned once at creation.
#[derive(Debug, Serialize)]
pub struct WebhookCreatedResponse {
    #[serde(flatten)]
    pub webhook: Webhook,
    pub secret: String,
}

/// GET /api/v1/webhooks
pub async fn list_webhooks(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let hooks = WebhookRepo::list_by_tenant(&state.pool, auth.tenant_id).await?;
    Ok(Json(DataResponse { data: hooks }))
}

/// POST /api/v1/webhooks
pub async fn create_webhook(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<CreateWebhook>,
) -> AppResult<impl IntoResponse> {
    validate_input(&input)?;
    validate_events(&input.events)?;

    let secret = input
        .secret
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(webhooks::generate_secret);

    let webhook = WebhookRepo::create(
        &state.pool,
        auth.tenant_id,
        &input.url,
        &secret,
        &input.events,
        input.development_ids.as_deref(),
        input.max_failures.unwrap_or(DEFAULT_MAX_FAILURES),
    )
    .await?;

    tracing::info!(
        webhook_id = %webhook.id,
        url = %webhook.url,
        user_id = %auth.user_id,
        "Webhook created"
    );

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: WebhookCreatedResponse { webhook, secret },
        }),
    ))
}

/// GET /api/v1/webhooks/{id}
pub async fn get_webhook(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let webhook = load_webhook(&state, auth.tenant_id, id).await?;
    Ok(Json(DataResponse { data: webhook }))
}

/// PUT /api/v1/webhooks/{id}
///
/// Re-activating a webhook resets its failure counter.
pub async fn update_webhook(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<UpdateWebhook>,
) -> AppResult<impl IntoResponse> {
    validate_input(&input)?;
    if let Some(events) = input.events.as_deref() {
        validate_events(events)?;
    }

    let webhook = WebhookRepo::update(
        &state.pool,
        auth.tenant_id,
        id,
        input.url.as_deref(),
        input.events.as_deref(),
        input.development_ids.as_deref(),
        input.is_active,
        input.max_failures,
    )
    .await?
    .ok_or(AppError::Core(CoreError::NotFound {
        entity: "Webhook",
        id,
    }))?;

    tracing::info!(webhook_id = %id, user_id = %auth.user_id, "Webhook updated");

    Ok(Json(DataResponse { data: webhook }))
}

/// DELETE /api/v1/webhooks/{id}
pub async fn delete_webhook(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    let deleted = WebhookRepo::delete(&state.pool, auth.tenant_id, id).await?;
    if !deleted {
        return Err(AppError::Core(CoreError::NotFound {
            entity: "Webhook",
            id,
        }));
    }
    tracing::info!(webhook_id = %id, user_id = %auth.user_id, "Webhook deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/webhooks/{id}/deliveries
pub async fn list_deliveries(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Query(params): Query<PaginationParams>,
) -> AppResult<impl IntoResponse> {
    load_webhook(&state, auth.tenant_id, id).await?;
    let deliveries =
        WebhookRepo::list_deliveries_for_webhook(&state.pool, id, params.limit(), params.offset())
            .await?;
    Ok(Json(DataResponse { data: deliveries }))
}

/// GET /api/v1/webhooks/events
pub async fn list_event_types(_auth: AuthUser) -> AppResult<impl IntoResponse> {
    Ok(Json(DataResponse {
        data: webhooks::event_types::ALL,
    }))
}

async fn load_webhook(state: &AppState, tenant_id: DbId, id: DbId) -> AppResult<Webhook> {
    WebhookRepo::find_for_tenant(&state.pool, tenant_id, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Webhook",
            id,
        }))
}

fn validate_events(events: &[String]) -> AppResult<()> {
    if events.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "At least one event is required".into(),
        )));
    }
    match events.iter().find(|e| !webhooks::is_known_event(e)) {
        Some(unknown) => Err(AppError::Core(CoreError::Validation(format!(
            "Unknown event type '{unknown}'"
        )))),
        None => Ok(()),
    }
}
