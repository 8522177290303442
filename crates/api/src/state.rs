use std::sync::Arc;

use openhouse_core::rate_limit::FixedWindowRateLimiter;
use openhouse_core::vault::CredentialVault;
use openhouse_events::EventBus;
use openhouse_integrations::adapters::AdapterSource;
use openhouse_integrations::{OutboundSyncHandle, SyncEngine};

use crate::auth::api_keys::ApiKeyAuthenticator;
use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: inner data is behind `Arc` or is already `Clone`.
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: openhouse_db::DbPool,
    pub config: Arc<ServerConfig>,
    /// Per-tenant credential encryption.
    pub vault: CredentialVault,
    /// Builds provider adapters for OAuth and spreadsheet reads.
    pub adapters: Arc<dyn AdapterSource>,
    /// Inbound sync, run inline for operator-triggered syncs.
    pub engine: Arc<SyncEngine>,
    /// Queue for fire-and-forget outbound and enrichment jobs.
    pub jobs: OutboundSyncHandle,
    /// Centralized event bus for platform events (webhooks subscribe here).
    pub event_bus: Arc<EventBus>,
    /// External API key authentication.
    pub api_keys: ApiKeyAuthenticator,
    /// Per-key request budget for the external API.
    pub rate_limiter: FixedWindowRateLimiter,
}
