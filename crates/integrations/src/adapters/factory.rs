//! Builds the adapter for an integration type.

use openhouse_core::integration::{IntegrationCategory, IntegrationType, OAuthProviderKind};

use super::oauth::OAuthSettings;
use super::{
    CrmAdapter, DynamicsAdapter, GoogleSheetsAdapter, GraphWorkbookAdapter, HubSpotAdapter,
    OAuthProvider, OAuthTokens, ProviderError, SalesforceAdapter, SpreadsheetAdapter,
};

/// An adapter of either category.
pub enum ProviderAdapter {
    Crm(Box<dyn CrmAdapter>),
    Spreadsheet(Box<dyn SpreadsheetAdapter>),
}

impl ProviderAdapter {
    pub fn category(&self) -> IntegrationCategory {
        match self {
            Self::Crm(_) => IntegrationCategory::Crm,
            Self::Spreadsheet(_) => IntegrationCategory::Spreadsheet,
        }
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Crm(a) => a.provider_name(),
            Self::Spreadsheet(a) => a.provider_name(),
        }
    }

    pub fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        match self {
            Self::Crm(a) => a.auth_url(state),
            Self::Spreadsheet(a) => a.auth_url(state),
        }
    }

    pub async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, ProviderError> {
        match self {
            Self::Crm(a) => a.exchange_code(code).await,
            Self::Spreadsheet(a) => a.exchange_code(code).await,
        }
    }

    pub async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
        match self {
            Self::Crm(a) => a.refresh_token(refresh_token).await,
            Self::Spreadsheet(a) => a.refresh_token(refresh_token).await,
        }
    }
}

/// Source of adapters for the sync engine and token refresher. Tests supply
/// fakes; production uses [`AdapterFactory`].
pub trait AdapterSource: Send + Sync {
    fn adapter(
        &self,
        kind: IntegrationType,
        tokens: Option<&OAuthTokens>,
    ) -> Result<ProviderAdapter, ProviderError>;
}

#[derive(Debug, Clone)]
pub struct AdapterFactory {
    settings: OAuthSettings,
}

impl AdapterFactory {
    pub fn new(settings: OAuthSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &OAuthSettings {
        &self.settings
    }

    pub fn build(
        &self,
        kind: IntegrationType,
        tokens: Option<&OAuthTokens>,
    ) -> Result<ProviderAdapter, ProviderError> {
        let access_token = tokens.map(|t| t.access_token.clone());
        let instance_url = tokens.and_then(|t| t.instance_url.clone());
        let redirect_uri = self.settings.redirect_uri(kind.oauth_provider().as_str());

        let adapter = match kind {
            IntegrationType::GoogleSheets => ProviderAdapter::Spreadsheet(Box::new(
                GoogleSheetsAdapter::new(self.settings.google.clone(), redirect_uri, access_token),
            )),
            IntegrationType::ExcelOneDrive | IntegrationType::ExcelSharePoint => {
                ProviderAdapter::Spreadsheet(Box::new(GraphWorkbookAdapter::new(
                    self.settings.microsoft.clone(),
                    redirect_uri,
                    access_token,
                )))
            }
            IntegrationType::Dynamics365 => ProviderAdapter::Crm(Box::new(DynamicsAdapter::new(
                self.settings.dynamics.clone(),
                redirect_uri,
                instance_url.or_else(|| self.settings.dynamics_org_url.clone()),
                access_token,
            ))),
            IntegrationType::Salesforce => ProviderAdapter::Crm(Box::new(SalesforceAdapter::new(
                self.settings.salesforce.clone(),
                redirect_uri,
                instance_url,
                access_token,
            ))),
            IntegrationType::HubSpot => ProviderAdapter::Crm(Box::new(HubSpotAdapter::new(
                self.settings.hubspot.clone(),
                redirect_uri,
                access_token,
            ))),
        };
        Ok(adapter)
    }

    /// Whether client credentials exist for the OAuth family.
    pub fn is_configured(&self, provider: OAuthProviderKind) -> bool {
        self.settings.is_configured(provider)
    }
}

impl AdapterSource for AdapterFactory {
    fn adapter(
        &self,
        kind: IntegrationType,
        tokens: Option<&OAuthTokens>,
    ) -> Result<ProviderAdapter, ProviderError> {
        self.build(kind, tokens)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn categories_follow_integration_type() {
        let factory = AdapterFactory::new(OAuthSettings::default());
        let sheets = factory.build(IntegrationType::GoogleSheets, None).unwrap();
        assert_eq!(sheets.category(), IntegrationCategory::Spreadsheet);
        assert_eq!(sheets.provider_name(), "Google Sheets");

        let crm = factory.build(IntegrationType::Salesforce, None).unwrap();
        assert_eq!(crm.category(), IntegrationCategory::Crm);
        assert_eq!(crm.provider_name(), "Salesforce");
    }

    #[test]
    fn dynamics_org_comes_from_tokens_before_settings() {
        let settings = OAuthSettings {
            dynamics_org_url: Some("https://fallback.crm.dynamics.com".into()),
            ..Default::default()
        };
        let factory = AdapterFactory::new(settings);
        let tokens = OAuthTokens {
            access_token: "at".into(),
            instance_url: Some("https://tenant.crm4.dynamics.com".into()),
            ..Default::default()
        };
        let adapter = factory.build(IntegrationType::Dynamics365, Some(&tokens)).unwrap();
        let url = adapter.auth_url("s").unwrap();
        assert!(url.contains("tenant.crm4.dynamics.com"));

        let without_tokens = factory.build(IntegrationType::Dynamics365, None).unwrap();
        assert!(without_tokens.auth_url("s").unwrap().contains("fallback.crm.dynamics.com"));
    }

    #[test]
    fn redirect_uri_uses_oauth_family() {
        let settings = OAuthSettings {
            app_url: "https://portal.example".into(),
            ..Default::default()
        };
        let factory = AdapterFactory::new(settings);
        let adapter = factory.build(IntegrationType::ExcelSharePoint, None).unwrap();
        let url = adapter.auth_url("s").unwrap();
        assert!(url.contains(&urlencoding::encode(
            "https://portal.example/api/v1/integrations/oauth/microsoft/callback"
        ).into_owned()));
    }
}
