use openhouse_core::rate_limit::DEFAULT_LIMIT_PER_WINDOW;
use openhouse_integrations::adapters::OAuthSettings;

use crate::auth::jwt::JwtConfig;

/// Server configuration loaded from environment variables.
///
/// All fields except the secrets have defaults suitable for local
/// development.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind address (default: `0.0.0.0`).
    pub host: String,
    /// Bind port (default: `3000`).
    pub port: u16,
    /// Allowed CORS origins, parsed from comma-separated `CORS_ORIGINS`.
    pub cors_origins: Vec<String>,
    /// HTTP request timeout in seconds (default: `30`).
    pub request_timeout_secs: u64,
    /// Time allowed for background tasks to drain on shutdown (default: `30`).
    pub shutdown_timeout_secs: u64,
    /// Operator JWT validation.
    pub jwt: JwtConfig,
    /// Master secret for the credential vault.
    pub credentials_master_key: String,
    /// External API requests allowed per key per minute (default: `60`).
    pub api_rate_limit_per_min: u32,
    /// OAuth client registrations and the public callback base URL.
    pub oauth: OAuthSettings,
}

impl ServerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                  | Default                    |
    /// |--------------------------|----------------------------|
    /// | `HOST`                   | `0.0.0.0`                  |
    /// | `PORT`                   | `3000`                     |
    /// | `CORS_ORIGINS`           | `http://localhost:5173`    |
    /// | `REQUEST_TIMEOUT_SECS`   | `30`                       |
    /// | `SHUTDOWN_TIMEOUT_SECS`  | `30`                       |
    /// | `CREDENTIALS_MASTER_KEY` | required                   |
    /// | `API_RATE_LIMIT_PER_MIN` | `60`                       |
    ///
    /// OAuth variables are documented on [`OAuthSettings`].
    pub fn from_env() -> Self {
        let host = std::env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into());

        let port: u16 = std::env::var("PORT")
            .unwrap_or_else(|_| "3000".into())
            .parse()
            .expect("PORT must be a valid u16");

        let cors_origins: Vec<String> = std::env::var("CORS_ORIGINS")
            .unwrap_or_else(|_| "http://localhost:5173".into())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();

        let request_timeout_secs: u64 = std::env::var("REQUEST_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("REQUEST_TIMEOUT_SECS must be a valid u64");

        let shutdown_timeout_secs: u64 = std::env::var("SHUTDOWN_TIMEOUT_SECS")
            .unwrap_or_else(|_| "30".into())
            .parse()
            .expect("SHUTDOWN_TIMEOUT_SECS must be a valid u64");

        let credentials_master_key = std::env::var("CREDENTIALS_MASTER_KEY")
            .expect("CREDENTIALS_MASTER_KEY must be set in the environment");

        let api_rate_limit_per_min: u32 = std::env::var("API_RATE_LIMIT_PER_MIN")
            .unwrap_or_else(|_| DEFAULT_LIMIT_PER_WINDOW.to_string())
            .parse()
            .expect("API_RATE_LIMIT_PER_MIN must be a valid u32");

        Self {
            host,
            port,
            cors_origins,
            request_timeout_secs,
            shutdown_timeout_secs,
            jwt: JwtConfig::from_env(),
            credentials_master_key,
            api_rate_limit_per_min,
            oauth: OAuthSettings::from_env(),
        }
    }
}
