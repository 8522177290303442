//! Route definitions for the API-key authenticated external API.

use axum::routing::{get, patch};
use axum::Router;

use crate::handlers::external;
use crate::state::AppState;

/// Routes mounted at `/external`.
///
/// ```text
/// GET   /developments/{id}/units  -> list_units   (units:read)
/// PATCH /units/{id}               -> update_unit  (units:write)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/developments/{id}/units", get(external::list_units))
        .route("/units/{id}", patch(external::update_unit))
}
