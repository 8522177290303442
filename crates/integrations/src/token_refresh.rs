//! Periodic OAuth token renewal.

use std::sync::Arc;

use chrono::{Duration, Utc};
use openhouse_core::audit::actions;
use openhouse_core::types::DbId;
use openhouse_core::vault::CredentialVault;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::integration::Integration;
use serde_json::json;

use crate::adapters::{is_token_expiring_soon, AdapterSource, OAuthTokens, DEFAULT_REFRESH_THRESHOLD_SECS};
use crate::engine::load_tokens;
use crate::error::SyncError;
use crate::store::SyncStore;

/// Stored on the integration when a refresh fails.
pub const REFRESH_FAILED_MESSAGE: &str = "Token refresh failed. Please reconnect.";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub refreshed: usize,
    pub failed: usize,
    pub skipped: usize,
}

pub struct TokenRefresher {
    store: Arc<dyn SyncStore>,
    adapters: Arc<dyn AdapterSource>,
    vault: CredentialVault,
    threshold: Duration,
}

enum Outcome {
    Refreshed,
    Skipped,
}

impl TokenRefresher {
    pub fn new(store: Arc<dyn SyncStore>, adapters: Arc<dyn AdapterSource>, vault: CredentialVault) -> Self {
        Self {
            store,
            adapters,
            vault,
            threshold: Duration::seconds(DEFAULT_REFRESH_THRESHOLD_SECS),
        }
    }

    pub fn with_threshold(mut self, threshold: Duration) -> Self {
        self.threshold = threshold;
        self
    }

    /// Refresh every integration whose access token expires within the
    /// threshold. A failed refresh puts the integration in `error`.
    pub async fn run_once(&self) -> Result<RefreshSummary, SyncError> {
        let integrations = self.store.refreshable_integrations().await?;
        let mut summary = RefreshSummary::default();

        for integration in &integrations {
            match self.refresh(integration).await {
                Ok(Outcome::Refreshed) => summary.refreshed += 1,
                Ok(Outcome::Skipped) => summary.skipped += 1,
                Err(e) => {
                    tracing::warn!(integration_id = %integration.id, error = %e, "Token refresh failed");
                    summary.failed += 1;
                    self.record_failure(integration, &e).await;
                }
            }
        }

        if summary.refreshed > 0 || summary.failed > 0 {
            tracing::info!(
                refreshed = summary.refreshed,
                failed = summary.failed,
                skipped = summary.skipped,
                "Token refresh pass complete"
            );
        }
        Ok(summary)
    }

    /// Refresh one integration on demand. Returns whether new tokens were
    /// stored.
    pub async fn refresh_integration(&self, integration_id: DbId) -> Result<bool, SyncError> {
        let integration = self
            .store
            .find_integration(integration_id)
            .await?
            .ok_or(SyncError::IntegrationNotFound(integration_id))?;
        match self.refresh(&integration).await {
            Ok(outcome) => Ok(matches!(outcome, Outcome::Refreshed)),
            Err(e) => {
                self.record_failure(&integration, &e).await;
                Err(e)
            }
        }
    }

    async fn refresh(&self, integration: &Integration) -> Result<Outcome, SyncError> {
        let tokens = load_tokens(&self.vault, integration)?;
        if !is_token_expiring_soon(tokens.expires_at, self.threshold, Utc::now()) {
            return Ok(Outcome::Skipped);
        }
        let Some(refresh_token) = tokens.refresh_token.as_deref() else {
            return Ok(Outcome::Skipped);
        };

        let adapter = self.adapters.adapter(integration.kind()?, Some(&tokens))?;
        let fresh = adapter.refresh_token(refresh_token).await?;
        let merged = OAuthTokens {
            refresh_token: fresh.refresh_token.or_else(|| tokens.refresh_token.clone()),
            instance_url: fresh.instance_url.or_else(|| tokens.instance_url.clone()),
            ..fresh
        };

        let blob = self.vault.encrypt(integration.tenant_id, &merged)?;
        self.store.replace_credentials(integration.id, &blob).await?;
        self.store
            .audit(NewAuditEntry::system(
                integration.tenant_id,
                actions::TOKEN_REFRESHED,
                json!({
                    "integration_id": integration.id,
                    "provider": adapter.provider_name(),
                    "expires_at": merged.expires_at,
                }),
            ))
            .await;
        Ok(Outcome::Refreshed)
    }

    async fn record_failure(&self, integration: &Integration, error: &SyncError) {
        if let Err(e) = self.store.mark_error(integration.id, REFRESH_FAILED_MESSAGE).await {
            tracing::error!(integration_id = %integration.id, error = %e, "Failed to mark integration as errored");
        }
        self.store
            .audit(NewAuditEntry::system(
                integration.tenant_id,
                actions::TOKEN_REFRESH_FAILED,
                json!({ "integration_id": integration.id, "error": error.to_string() }),
            ))
            .await;
    }
}
