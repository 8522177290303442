use axum::http::header::RETRY_AFTER;
use axum::http::{HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use openhouse_core::error::CoreError;
use openhouse_core::rate_limit::RateLimitExceeded;
use openhouse_core::vault::VaultError;
use openhouse_integrations::adapters::ProviderError;
use openhouse_integrations::SyncError;
use serde_json::json;

use crate::middleware::api_key::rate_limit_headers;

/// Application-level error type for HTTP handlers.
///
/// Wraps [`CoreError`] for domain errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error responses.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// A domain-level error from `openhouse_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// A database error from sqlx.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// An external provider rejected a call.
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Vault(#[from] VaultError),

    #[error(transparent)]
    Sync(#[from] SyncError),

    /// The API key's request window is exhausted.
    #[error(transparent)]
    RateLimited(#[from] RateLimitExceeded),

    /// A bad request with a human-readable message.
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// An internal error with a human-readable message.
    #[error("Internal error: {0}")]
    InternalError(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

const INTERNAL_MESSAGE: &str = "An internal error occurred";
const RECONNECT_MESSAGE: &str = "Failed to decrypt credentials. Please reconnect.";

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let mut headers = HeaderMap::new();
        let (status, code, message) = match &self {
            AppError::Core(core) => classify_core_error(core, &mut headers),
            AppError::Database(err) => classify_sqlx_error(err),
            AppError::Provider(err) => classify_provider_error(err),
            AppError::Vault(err) => classify_vault_error(err),
            AppError::Sync(err) => classify_sync_error(err, &mut headers),
            AppError::RateLimited(exceeded) => {
                set_retry_after(&mut headers, exceeded.retry_after_secs);
                headers.extend(rate_limit_headers(exceeded.limit, 0, exceeded.reset_at));
                (
                    StatusCode::TOO_MANY_REQUESTS,
                    "RATE_LIMITED",
                    "Rate limit exceeded".to_string(),
                )
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            AppError::InternalError(msg) => {
                tracing::error!(error = %msg, "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    INTERNAL_MESSAGE.to_string(),
                )
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, headers, axum::Json(body)).into_response()
    }
}

fn set_retry_after(headers: &mut HeaderMap, secs: u64) {
    headers.insert(RETRY_AFTER, HeaderValue::from(secs));
}

fn classify_core_error(
    err: &CoreError,
    headers: &mut HeaderMap,
) -> (StatusCode, &'static str, String) {
    match err {
        CoreError::NotFound { entity, id } => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("{entity} with id {id} not found"),
        ),
        CoreError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
        CoreError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
        CoreError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", msg.clone()),
        CoreError::Forbidden(msg) => (StatusCode::FORBIDDEN, "FORBIDDEN", msg.clone()),
        CoreError::RateLimited { retry_after_secs } => {
            set_retry_after(headers, *retry_after_secs);
            (
                StatusCode::TOO_MANY_REQUESTS,
                "RATE_LIMITED",
                "Rate limit exceeded".to_string(),
            )
        }
        CoreError::Internal(msg) => {
            tracing::error!(error = %msg, "Internal core error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
    }
}

/// Provider failures are upstream problems, reported as 502 with the
/// provider's own message.
fn classify_provider_error(err: &ProviderError) -> (StatusCode, &'static str, String) {
    match err {
        ProviderError::NotConfigured { .. } => {
            (StatusCode::BAD_REQUEST, "PROVIDER_NOT_CONFIGURED", err.to_string())
        }
        _ => {
            tracing::warn!(error = %err, "Provider call failed");
            (StatusCode::BAD_GATEWAY, "PROVIDER_ERROR", err.to_string())
        }
    }
}

/// Undecryptable credentials mean the integration must be reconnected.
fn classify_vault_error(err: &VaultError) -> (StatusCode, &'static str, String) {
    match err {
        VaultError::Decryption => (
            StatusCode::BAD_REQUEST,
            "CREDENTIALS_INVALID",
            RECONNECT_MESSAGE.to_string(),
        ),
        other => {
            tracing::error!(error = %other, "Credential vault error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
    }
}

fn classify_sync_error(
    err: &SyncError,
    headers: &mut HeaderMap,
) -> (StatusCode, &'static str, String) {
    match err {
        SyncError::Provider(e) => classify_provider_error(e),
        SyncError::Vault(e) => classify_vault_error(e),
        SyncError::Database(e) => classify_sqlx_error(e),
        SyncError::Core(e) => classify_core_error(e, headers),
        SyncError::IntegrationNotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Integration with id {id} not found"),
        ),
        SyncError::NotConnected(_) => (
            StatusCode::BAD_REQUEST,
            "NOT_CONNECTED",
            "Integration is not connected".to_string(),
        ),
        SyncError::Misconfigured { message, .. } => (
            StatusCode::BAD_REQUEST,
            "MISCONFIGURED",
            format!("Integration is misconfigured: {message}"),
        ),
    }
}

/// Classify a sqlx error into an HTTP status, error code, and message.
///
/// - `RowNotFound` maps to 404.
/// - Unique constraint violations (constraint name starting with `uq_`) map to 409.
/// - Everything else maps to 500 with a sanitized message.
fn classify_sqlx_error(err: &sqlx::Error) -> (StatusCode, &'static str, String) {
    match err {
        sqlx::Error::RowNotFound => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            "Resource not found".to_string(),
        ),
        sqlx::Error::Database(db_err) => {
            // PostgreSQL unique constraint violation: error code 23505
            if db_err.code().as_deref() == Some("23505") {
                let constraint = db_err.constraint().unwrap_or("unknown");
                if constraint.starts_with("uq_") {
                    return (
                        StatusCode::CONFLICT,
                        "CONFLICT",
                        format!("Duplicate value violates unique constraint: {constraint}"),
                    );
                }
            }
            tracing::error!(error = %db_err, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
        other => {
            tracing::error!(error = %other, "Database error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                INTERNAL_MESSAGE.to_string(),
            )
        }
    }
}
