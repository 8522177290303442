//! OAuth connection flow.
//!
//! `authorize` creates a disconnected integration and returns the provider
//! consent URL with the integration id as `state`. The provider redirects
//! back to `callback`, which exchanges the code, encrypts the token bundle
//! and marks the integration connected.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;
use openhouse_core::audit::actions;
use openhouse_core::error::CoreError;
use openhouse_core::integration::{IntegrationType, OAuthProviderKind, SyncDirection};
use openhouse_core::types::DbId;
use openhouse_core::webhooks::event_types;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::repositories::{AuditLogRepo, IntegrationRepo};
use openhouse_events::PlatformEvent;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct AuthorizeParams {
    pub development_id: Option<DbId>,
    #[serde(rename = "type")]
    pub integration_type: Option<String>,
    pub name: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AuthorizeResponse {
    pub integration_id: DbId,
    pub auth_url: String,
}

#[derive(Debug, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

/// Integration type used when `authorize` is called without `type`.
fn default_type(provider: OAuthProviderKind) -> IntegrationType {
    match provider {
        OAuthProviderKind::Google => IntegrationType::GoogleSheets,
        OAuthProviderKind::Microsoft => IntegrationType::ExcelOneDrive,
        OAuthProviderKind::Salesforce => IntegrationType::Salesforce,
        OAuthProviderKind::HubSpot => IntegrationType::HubSpot,
    }
}

fn default_name(kind: IntegrationType) -> &'static str {
    match kind {
        IntegrationType::GoogleSheets => "Google Sheets",
        IntegrationType::ExcelOneDrive => "Excel (OneDrive)",
        IntegrationType::ExcelSharePoint => "Excel (SharePoint)",
        IntegrationType::Dynamics365 => "Dynamics 365",
        IntegrationType::Salesforce => "Salesforce",
        IntegrationType::HubSpot => "HubSpot",
    }
}

/// Resolve the requested integration type for `provider`, rejecting types
/// that belong to another OAuth family.
fn resolve_type(
    provider: OAuthProviderKind,
    requested: Option<&str>,
) -> AppResult<IntegrationType> {
    let kind = match requested {
        Some(raw) => raw.parse::<IntegrationType>()?,
        None => default_type(provider),
    };
    if kind.oauth_provider() != provider {
        return Err(AppError::BadRequest(format!(
            "Integration type '{kind}' does not authorize through '{provider}'"
        )));
    }
    Ok(kind)
}

/// GET /api/v1/integrations/oauth/{provider}/authorize
pub async fn authorize(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<AuthorizeParams>,
) -> AppResult<impl IntoResponse> {
    let provider: OAuthProviderKind = provider.parse()?;
    let kind = resolve_type(provider, params.integration_type.as_deref())?;

    if !state.config.oauth.is_configured(provider) {
        return Err(AppError::BadRequest(format!(
            "OAuth is not configured for '{provider}'"
        )));
    }

    let name = params
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(default_name(kind));

    let integration = IntegrationRepo::create(
        &state.pool,
        auth.tenant_id,
        params.development_id,
        kind.as_str(),
        name,
        SyncDirection::Bidirectional.as_str(),
        None,
    )
    .await?;

    let auth_url = state
        .adapters
        .adapter(kind, None)?
        .auth_url(&integration.id.to_string())?;

    tracing::info!(
        integration_id = %integration.id,
        integration_type = %kind,
        user_id = %auth.user_id,
        "OAuth authorization started"
    );

    Ok(Json(DataResponse {
        data: AuthorizeResponse {
            integration_id: integration.id,
            auth_url,
        },
    }))
}

/// GET /api/v1/integrations/oauth/{provider}/callback
///
/// Unauthenticated: the provider redirects the operator's browser here. The
/// `state` parameter ties the callback to the integration created by
/// `authorize`.
pub async fn callback(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    Query(params): Query<CallbackParams>,
) -> AppResult<impl IntoResponse> {
    let provider: OAuthProviderKind = provider.parse()?;

    if let Some(error) = params.error {
        tracing::warn!(provider = %provider, error = %error, "OAuth provider returned an error");
        return Err(AppError::BadRequest(format!("Authorization failed: {error}")));
    }

    let code = params
        .code
        .filter(|c| !c.is_empty())
        .ok_or_else(|| AppError::BadRequest("Missing authorization code".into()))?;
    let integration_id: DbId = params
        .state
        .as_deref()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| AppError::BadRequest("Invalid state parameter".into()))?;

    let integration = IntegrationRepo::find_by_id(&state.pool, integration_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Integration",
            id: integration_id,
        }))?;
    let kind = integration.kind()?;
    if kind.oauth_provider() != provider {
        return Err(AppError::BadRequest(
            "Callback provider does not match the integration".into(),
        ));
    }

    let tokens = state.adapters.adapter(kind, None)?.exchange_code(&code).await?;
    let blob = state.vault.encrypt(integration.tenant_id, &tokens)?;

    let connected = IntegrationRepo::mark_connected(&state.pool, integration.id, &blob)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Integration",
            id: integration.id,
        }))?;

    AuditLogRepo::record(
        &state.pool,
        NewAuditEntry::system(
            connected.tenant_id,
            actions::INTEGRATION_CONNECTED,
            json!({ "integration_id": connected.id, "integration_type": kind.as_str() }),
        ),
    )
    .await;

    state.event_bus.publish(
        PlatformEvent::new(event_types::INTEGRATION_CONNECTED)
            .for_tenant(connected.tenant_id)
            .with_source("integration", connected.id)
            .with_payload(json!({
                "integration_id": connected.id,
                "integration_type": kind.as_str(),
                "development_id": connected.development_id,
            })),
    );

    tracing::info!(
        integration_id = %connected.id,
        integration_type = %kind,
        "Integration connected"
    );

    Ok(Json(DataResponse { data: connected }))
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn provider_defaults() {
        assert_eq!(
            resolve_type(OAuthProviderKind::Google, None).unwrap(),
            IntegrationType::GoogleSheets
        );
        assert_eq!(
            resolve_type(OAuthProviderKind::Microsoft, Some("dynamics_365")).unwrap(),
            IntegrationType::Dynamics365
        );
    }

    #[test]
    fn mismatched_family_is_rejected() {
        assert_matches!(
            resolve_type(OAuthProviderKind::Google, Some("hubspot")),
            Err(AppError::BadRequest(_))
        );
        assert_matches!(
            resolve_type(OAuthProviderKind::Google, Some("notion")),
            Err(AppError::Core(CoreError::Validation(_)))
        );
    }
}
