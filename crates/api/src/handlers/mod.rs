//! Request handlers.
//!
//! Operator handlers take an [`AuthUser`](crate::middleware::auth::AuthUser)
//! and are scoped to its tenant. External handlers take an
//! [`ApiKeyAuth`](crate::middleware::api_key::ApiKeyAuth) and attach its
//! rate-limit headers to every response.

pub mod api_keys;
pub mod external;
pub mod integrations;
pub mod mappings;
pub mod oauth;
pub mod sync_logs;
pub mod webhooks;

use openhouse_core::error::CoreError;
use openhouse_core::types::DbId;
use openhouse_db::models::integration::Integration;
use openhouse_db::repositories::IntegrationRepo;
use openhouse_db::DbPool;
use validator::Validate;

use crate::error::{AppError, AppResult};

/// Load an integration owned by `tenant_id`, or 404.
pub(crate) async fn load_integration(
    pool: &DbPool,
    tenant_id: DbId,
    id: DbId,
) -> AppResult<Integration> {
    IntegrationRepo::find_for_tenant(pool, tenant_id, id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Integration",
            id,
        }))
}

/// Run derive-based DTO validation, reporting failures as 400.
pub(crate) fn validate_input<T: Validate>(input: &T) -> AppResult<()> {
    input
        .validate()
        .map_err(|e| AppError::Core(CoreError::Validation(e.to_string())))
}
