//! Route definitions for integrations, OAuth, mappings and sync history.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::{integrations, mappings, oauth, sync_logs};
use crate::state::AppState;

/// Routes mounted at `/integrations`.
///
/// ```text
/// GET  /oauth/{provider}/authorize  -> authorize
/// GET  /oauth/{provider}/callback   -> callback
/// GET  /                            -> list_integrations
/// GET  /mappings/targets            -> list_target_fields
/// GET  /{id}                        -> get_integration
/// PUT  /{id}                        -> update_integration
/// POST /{id}/sync                   -> trigger_sync
/// POST /{id}/disconnect             -> disconnect_integration
/// GET  /{id}/mappings               -> list_mappings
/// PUT  /{id}/mappings               -> confirm_mappings
/// GET  /{id}/mappings/suggest       -> suggest_mappings
/// GET  /{id}/sync-logs              -> list_sync_logs
/// GET  /{id}/conflicts              -> list_conflicts
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/oauth/{provider}/authorize", get(oauth::authorize))
        .route("/oauth/{provider}/callback", get(oauth::callback))
        .route("/", get(integrations::list_integrations))
        .route("/mappings/targets", get(mappings::list_target_fields))
        .route(
            "/{id}",
            get(integrations::get_integration).put(integrations::update_integration),
        )
        .route("/{id}/sync", post(integrations::trigger_sync))
        .route("/{id}/disconnect", post(integrations::disconnect_integration))
        .route(
            "/{id}/mappings",
            get(mappings::list_mappings).put(mappings::confirm_mappings),
        )
        .route("/{id}/mappings/suggest", get(mappings::suggest_mappings))
        .route("/{id}/sync-logs", get(sync_logs::list_sync_logs))
        .route("/{id}/conflicts", get(sync_logs::list_conflicts))
}
