//! External API gateway extractor.
//!
//! [`ApiKeyAuth`] runs, in order: key authentication (401), the route's
//! scope check (403, before any rate-limit counter is consumed), then the
//! per-key fixed-window rate limit (429 with `Retry-After`). Handlers attach
//! [`ApiKeyAuth::headers`] to every response so callers always see their
//! remaining budget.

use std::marker::PhantomData;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use openhouse_core::api_keys::{scopes, ApiKeyContext};
use openhouse_core::error::CoreError;
use openhouse_core::rate_limit::RateLimitStatus;
use openhouse_core::types::{DbId, Timestamp};

use crate::error::AppError;
use crate::state::AppState;

pub const RATE_LIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
pub const RATE_LIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
pub const RATE_LIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// `X-RateLimit-*` headers. The reset is a Unix timestamp in seconds.
pub fn rate_limit_headers(limit: u32, remaining: u32, reset_at: Timestamp) -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
    headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(RATE_LIMIT_RESET, HeaderValue::from(reset_at.timestamp()));
    headers
}

// ---------------------------------------------------------------------------
// Scopes
// ---------------------------------------------------------------------------

/// Scope a route requires, named at the type level.
pub trait RequiredScope: Send + Sync + 'static {
    const SCOPE: &'static str;
}

pub struct UnitsRead;

impl RequiredScope for UnitsRead {
    const SCOPE: &'static str = scopes::UNITS_READ;
}

pub struct UnitsWrite;

impl RequiredScope for UnitsWrite {
    const SCOPE: &'static str = scopes::UNITS_WRITE;
}

// ---------------------------------------------------------------------------
// Extractor
// ---------------------------------------------------------------------------

pub struct ApiKeyAuth<S> {
    pub context: ApiKeyContext,
    pub rate_limit: RateLimitStatus,
    _scope: PhantomData<S>,
}

impl<S> ApiKeyAuth<S> {
    pub fn headers(&self) -> HeaderMap {
        rate_limit_headers(
            self.rate_limit.limit,
            self.rate_limit.remaining,
            self.rate_limit.reset_at,
        )
    }

    /// 403 unless the key may touch `development_id`.
    pub fn require_development(&self, development_id: DbId) -> Result<(), AppError> {
        if self.context.has_development_access(development_id) {
            Ok(())
        } else {
            Err(AppError::Core(CoreError::Forbidden(
                "API key has no access to this development".into(),
            )))
        }
    }
}

impl<S: RequiredScope> FromRequestParts<AppState> for ApiKeyAuth<S> {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                AppError::Core(CoreError::Unauthorized(
                    "Missing Authorization header".into(),
                ))
            })?;

        let context = state.api_keys.authenticate(header).await?;

        if !context.has_scope(S::SCOPE) {
            return Err(AppError::Core(CoreError::Forbidden(format!(
                "API key lacks the '{}' scope",
                S::SCOPE
            ))));
        }

        let rate_limit = state
            .rate_limiter
            .check(&context.key_id.to_string())
            .await
            .inspect_err(|exceeded| {
                tracing::info!(
                    key_id = %context.key_id,
                    retry_after_secs = exceeded.retry_after_secs,
                    "API key rate limited"
                );
            })?;

        Ok(ApiKeyAuth {
            context,
            rate_limit,
            _scope: PhantomData,
        })
    }
}
