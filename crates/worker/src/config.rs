use std::time::Duration;

use openhouse_integrations::adapters::OAuthSettings;

/// Background worker configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Master secret for the credential vault. Must match the API server's.
    pub credentials_master_key: String,
    /// Period of the scheduled inbound sync sweep (default: `300`).
    pub sync_interval: Duration,
    /// Period of the OAuth token refresh sweep (default: `600`).
    pub token_refresh_interval: Duration,
    /// Period of the webhook retry sweep (default: `60`).
    pub webhook_retry_interval: Duration,
    /// Time allowed for in-flight work to finish on shutdown (default: `30`).
    pub shutdown_timeout: Duration,
    pub oauth: OAuthSettings,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default  |
    /// |--------------------------------|----------|
    /// | `CREDENTIALS_MASTER_KEY`       | required |
    /// | `SYNC_INTERVAL_SECS`           | `300`    |
    /// | `TOKEN_REFRESH_INTERVAL_SECS`  | `600`    |
    /// | `WEBHOOK_RETRY_INTERVAL_SECS`  | `60`     |
    /// | `SHUTDOWN_TIMEOUT_SECS`        | `30`     |
    pub fn from_env() -> Self {
        let credentials_master_key = std::env::var("CREDENTIALS_MASTER_KEY")
            .expect("CREDENTIALS_MASTER_KEY must be set in the environment");

        Self {
            credentials_master_key,
            sync_interval: secs_from_env("SYNC_INTERVAL_SECS", 300),
            token_refresh_interval: secs_from_env("TOKEN_REFRESH_INTERVAL_SECS", 600),
            webhook_retry_interval: secs_from_env("WEBHOOK_RETRY_INTERVAL_SECS", 60),
            shutdown_timeout: secs_from_env("SHUTDOWN_TIMEOUT_SECS", 30),
            oauth: OAuthSettings::from_env(),
        }
    }
}

fn secs_from_env(var: &str, default: u64) -> Duration {
    let secs = match std::env::var(var) {
        Ok(raw) => raw
            .parse::<u64>()
            .unwrap_or_else(|_| panic!("{var} must be a valid u64")),
        Err(_) => default,
    };
    Duration::from_secs(secs.max(1))
}
