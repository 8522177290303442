//! Route definitions for webhook subscriptions.

use axum::routing::get;
use axum::Router;

use crate::handlers::webhooks;
use crate::state::AppState;

/// Routes mounted at `/webhooks`.
///
/// ```text
/// GET    /                 -> list_webhooks
/// POST   /                 -> create_webhook
/// GET    /events           -> list_event_types
/// GET    /{id}             -> get_webhook
/// PUT    /{id}             -> update_webhook
/// DELETE /{id}             -> delete_webhook
/// GET    /{id}/deliveries  -> list_deliveries
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(webhooks::list_webhooks).post(webhooks::create_webhook),
        )
        .route("/events", get(webhooks::list_event_types))
        .route(
            "/{id}",
            get(webhooks::get_webhook)
                .put(webhooks::update_webhook)
                .delete(webhooks::delete_webhook),
        )
        .route("/{id}/deliveries", get(webhooks::list_deliveries))
}
