use openhouse_core::error::CoreError;
use openhouse_core::types::DbId;
use openhouse_core::vault::VaultError;

use crate::adapters::ProviderError;

/// Why a sync, enrichment or token refresh run could not complete.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("Stored credentials are unusable, reconnect the integration: {0}")]
    Vault(#[from] VaultError),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Integration {0} not found")]
    IntegrationNotFound(DbId),

    #[error("Integration {0} has no stored credentials")]
    NotConnected(DbId),

    #[error("Integration {id} is misconfigured: {message}")]
    Misconfigured { id: DbId, message: String },
}
