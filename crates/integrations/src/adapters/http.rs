//! Authenticated JSON requests shared by the adapters.

use std::time::Duration;

use reqwest::{Method, StatusCode};
use serde_json::Value;

use super::ProviderError;

/// Per-request timeout for provider API calls.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Where a provider puts the human-readable message in an error body.
#[derive(Debug, Clone, Copy)]
pub(crate) enum ErrorShape {
    /// `{"error": {"message": ...}}` (OData, Google, Graph).
    Nested,
    /// `[{"message": ...}]` (Salesforce).
    Array,
    /// `{"message": ...}` (HubSpot).
    TopLevel,
}

impl ErrorShape {
    fn message(self, body: &Value) -> Option<String> {
        let message = match self {
            Self::Nested => body.pointer("/error/message"),
            Self::Array => body.pointer("/0/message").or_else(|| body.get("message")),
            Self::TopLevel => body.get("message"),
        };
        message.and_then(Value::as_str).map(str::to_string)
    }
}

/// Thin wrapper over [`reqwest::Client`] that adds the bearer token and
/// maps failures to [`ProviderError`].
#[derive(Clone)]
pub(crate) struct ApiClient {
    client: reqwest::Client,
    provider: &'static str,
    access_token: Option<String>,
    shape: ErrorShape,
}

impl ApiClient {
    pub fn new(provider: &'static str, access_token: Option<String>, shape: ErrorShape) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            client,
            provider,
            access_token: access_token.filter(|t| !t.is_empty()),
            shape,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    /// Send and decode a JSON body. 204 and empty bodies become `{}`.
    pub async fn json(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        extra_headers: &[(&str, &str)],
    ) -> Result<Value, ProviderError> {
        let response = self.send(method, url, body, extra_headers).await?;
        if response.status() == StatusCode::NO_CONTENT {
            return Ok(Value::Object(Default::default()));
        }
        let text = response.text().await?;
        if text.trim().is_empty() {
            return Ok(Value::Object(Default::default()));
        }
        serde_json::from_str(&text).map_err(|e| ProviderError::InvalidResponse {
            provider: self.provider,
            message: e.to_string(),
        })
    }

    pub async fn get(&self, url: &str) -> Result<Value, ProviderError> {
        self.json(Method::GET, url, None, &[]).await
    }

    /// Send and return the raw successful response (for header inspection).
    pub async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<&Value>,
        extra_headers: &[(&str, &str)],
    ) -> Result<reqwest::Response, ProviderError> {
        let token = self
            .access_token
            .as_deref()
            .ok_or(ProviderError::MissingToken(self.provider))?;

        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(token)
            .header(reqwest::header::ACCEPT, "application/json");
        for (name, value) in extra_headers {
            request = request.header(*name, *value);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status().as_u16();
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<Value>(&text)
            .ok()
            .and_then(|body| self.shape.message(&body))
            .unwrap_or_else(|| format!("{} API error: {status}", self.provider));
        Err(ProviderError::Api {
            provider: self.provider,
            status,
            message,
        })
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn error_messages_by_shape() {
        assert_eq!(
            ErrorShape::Nested.message(&json!({"error": {"message": "Bad filter"}})),
            Some("Bad filter".into())
        );
        assert_eq!(
            ErrorShape::Array.message(&json!([{"message": "INVALID_FIELD", "errorCode": "x"}])),
            Some("INVALID_FIELD".into())
        );
        assert_eq!(
            ErrorShape::TopLevel.message(&json!({"message": "Property missing"})),
            Some("Property missing".into())
        );
        assert_eq!(ErrorShape::TopLevel.message(&json!({"status": "error"})), None);
    }

    #[tokio::test]
    async fn missing_token_short_circuits() {
        let client = ApiClient::new("HubSpot", Some(String::new()), ErrorShape::TopLevel);
        let err = client.get("http://127.0.0.1:9/unused").await.unwrap_err();
        assert!(matches!(err, ProviderError::MissingToken("HubSpot")));
    }
}
