pub mod api_keys;
pub mod external;
pub mod health;
pub mod integrations;
pub mod webhooks;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /integrations/oauth/{provider}/authorize       start OAuth (operator)
/// /integrations/oauth/{provider}/callback        OAuth redirect target (public)
///
/// /integrations                                  list
/// /integrations/mappings/targets                 mappable internal fields
/// /integrations/{id}                             get, update
/// /integrations/{id}/sync                        run inbound sync
/// /integrations/{id}/disconnect                  revoke credentials
/// /integrations/{id}/mappings                    list, confirm
/// /integrations/{id}/mappings/suggest            column suggestions
/// /integrations/{id}/sync-logs                   sync history
/// /integrations/{id}/conflicts                   conflicts (?status=)
///
/// /webhooks                                      list, create
/// /webhooks/events                               subscribable event types
/// /webhooks/{id}                                 get, update, delete
/// /webhooks/{id}/deliveries                      delivery history
///
/// /api-keys                                      list, create
/// /api-keys/scopes                               grantable scopes
/// /api-keys/{id}/revoke                          revoke
///
/// /external/developments/{id}/units              units with pipeline (API key)
/// /external/units/{id}                           field update (API key)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/integrations", integrations::router())
        .nest("/webhooks", webhooks::router())
        .nest("/api-keys", api_keys::router())
        .nest("/external", external::router())
}
