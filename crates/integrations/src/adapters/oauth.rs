//! OAuth client registrations and the token-endpoint exchange shared by all
//! providers.

use chrono::{Duration, Utc};
use openhouse_core::integration::OAuthProviderKind;
use serde::Deserialize;

use super::{OAuthTokens, ProviderError};

/// Client credentials for one provider registration.
#[derive(Debug, Clone, Default)]
pub struct OAuthApp {
    pub client_id: String,
    pub client_secret: String,
}

impl OAuthApp {
    fn from_env(prefix: &str) -> Self {
        Self {
            client_id: std::env::var(format!("{prefix}_CLIENT_ID")).unwrap_or_default(),
            client_secret: std::env::var(format!("{prefix}_CLIENT_SECRET")).unwrap_or_default(),
        }
    }

    fn or(self, fallback: &OAuthApp) -> Self {
        Self {
            client_id: if self.client_id.is_empty() {
                fallback.client_id.clone()
            } else {
                self.client_id
            },
            client_secret: if self.client_secret.is_empty() {
                fallback.client_secret.clone()
            } else {
                self.client_secret
            },
        }
    }

    pub fn is_configured(&self) -> bool {
        !self.client_id.is_empty()
    }
}

/// OAuth settings for every provider.
///
/// | Env var                     | Notes                                  |
/// |-----------------------------|----------------------------------------|
/// | `APP_URL`                   | Public base URL for callback redirects |
/// | `GOOGLE_CLIENT_ID/_SECRET`  | Google Sheets                          |
/// | `MICROSOFT_CLIENT_ID/_SECRET` | Excel on OneDrive / SharePoint       |
/// | `DYNAMICS_CLIENT_ID/_SECRET`| Falls back to the Microsoft app        |
/// | `DYNAMICS_ORG_URL`          | e.g. `https://org.crm.dynamics.com`    |
/// | `SALESFORCE_CLIENT_ID/_SECRET` |                                     |
/// | `HUBSPOT_CLIENT_ID/_SECRET` |                                        |
#[derive(Debug, Clone, Default)]
pub struct OAuthSettings {
    pub app_url: String,
    pub google: OAuthApp,
    pub microsoft: OAuthApp,
    pub dynamics: OAuthApp,
    pub dynamics_org_url: Option<String>,
    pub salesforce: OAuthApp,
    pub hubspot: OAuthApp,
}

impl OAuthSettings {
    pub fn from_env() -> Self {
        let microsoft = OAuthApp::from_env("MICROSOFT");
        Self {
            app_url: std::env::var("APP_URL").unwrap_or_else(|_| "http://localhost:3000".into()),
            google: OAuthApp::from_env("GOOGLE"),
            dynamics: OAuthApp::from_env("DYNAMICS").or(&microsoft),
            microsoft,
            dynamics_org_url: std::env::var("DYNAMICS_ORG_URL").ok().filter(|v| !v.is_empty()),
            salesforce: OAuthApp::from_env("SALESFORCE"),
            hubspot: OAuthApp::from_env("HUBSPOT"),
        }
    }

    /// Whether client credentials exist for the OAuth family.
    pub fn is_configured(&self, provider: OAuthProviderKind) -> bool {
        match provider {
            OAuthProviderKind::Google => self.google.is_configured(),
            OAuthProviderKind::Microsoft => self.microsoft.is_configured(),
            OAuthProviderKind::Salesforce => self.salesforce.is_configured(),
            OAuthProviderKind::HubSpot => self.hubspot.is_configured(),
        }
    }

    /// Callback URL registered with the provider, e.g.
    /// `{APP_URL}/api/v1/integrations/oauth/google/callback`.
    pub fn redirect_uri(&self, provider: &str) -> String {
        format!(
            "{}/api/v1/integrations/oauth/{provider}/callback",
            self.app_url.trim_end_matches('/')
        )
    }
}

/// Append percent-encoded query parameters to `base`.
pub(crate) fn with_query(base: &str, params: &[(&str, &str)]) -> String {
    let query = params
        .iter()
        .map(|(k, v)| format!("{k}={}", urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");
    format!("{base}?{query}")
}

// ---------------------------------------------------------------------------
// Token endpoint
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
    expires_in: Option<i64>,
    token_type: Option<String>,
    scope: Option<String>,
    instance_url: Option<String>,
}

/// POST a form to a token endpoint and normalise the response.
///
/// `default_lifetime_secs` applies when the provider omits `expires_in`.
/// `previous_refresh` is kept when the provider does not rotate refresh
/// tokens.
pub(crate) async fn request_tokens(
    client: &reqwest::Client,
    provider: &'static str,
    token_url: &str,
    form: &[(&str, &str)],
    default_lifetime_secs: Option<i64>,
    previous_refresh: Option<&str>,
) -> Result<OAuthTokens, ProviderError> {
    let response = client
        .post(token_url)
        .header(reqwest::header::ACCEPT, "application/json")
        .form(form)
        .send()
        .await?;

    let status = response.status();
    let body: serde_json::Value = response.json().await.unwrap_or_default();
    if !status.is_success() {
        let message = ["error_description", "message", "error"]
            .iter()
            .find_map(|key| body.get(*key).and_then(|v| v.as_str()))
            .map(str::to_string)
            .unwrap_or_else(|| format!("{provider} token request failed"));
        return Err(ProviderError::Api {
            provider,
            status: status.as_u16(),
            message,
        });
    }

    let token: TokenResponse =
        serde_json::from_value(body).map_err(|e| ProviderError::InvalidResponse {
            provider,
            message: e.to_string(),
        })?;

    let lifetime = token.expires_in.or(default_lifetime_secs);
    Ok(OAuthTokens {
        access_token: token.access_token,
        refresh_token: token
            .refresh_token
            .or_else(|| previous_refresh.map(str::to_string)),
        expires_at: lifetime.map(|secs| Utc::now() + Duration::seconds(secs)),
        token_type: token.token_type,
        scope: token.scope,
        instance_url: token.instance_url,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_values_are_encoded() {
        let url = with_query(
            "https://auth.example/authorize",
            &[("scope", "a b"), ("redirect_uri", "https://app/cb?x=1")],
        );
        assert_eq!(
            url,
            "https://auth.example/authorize?scope=a%20b&redirect_uri=https%3A%2F%2Fapp%2Fcb%3Fx%3D1"
        );
    }

    #[test]
    fn redirect_uri_trims_trailing_slash() {
        let settings = OAuthSettings {
            app_url: "https://portal.example/".into(),
            ..Default::default()
        };
        assert_eq!(
            settings.redirect_uri("hubspot"),
            "https://portal.example/api/v1/integrations/oauth/hubspot/callback"
        );
    }

    #[test]
    fn dynamics_falls_back_to_microsoft_app() {
        let microsoft = OAuthApp {
            client_id: "ms-id".into(),
            client_secret: "ms-secret".into(),
        };
        let dynamics = OAuthApp::default().or(&microsoft);
        assert_eq!(dynamics.client_id, "ms-id");
        assert_eq!(dynamics.client_secret, "ms-secret");
        assert!(dynamics.is_configured());
    }
}
