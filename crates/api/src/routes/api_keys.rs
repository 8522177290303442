//! Route definitions for external API key management.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::api_keys;
use crate::state::AppState;

/// Routes mounted at `/api-keys`.
///
/// ```text
/// GET  /             -> list_api_keys
/// POST /             -> create_api_key
/// GET  /scopes       -> list_scopes
/// POST /{id}/revoke  -> revoke_api_key
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(api_keys::list_api_keys).post(api_keys::create_api_key),
        )
        .route("/scopes", get(api_keys::list_scopes))
        .route("/{id}/revoke", post(api_keys::revoke_api_key))
}
