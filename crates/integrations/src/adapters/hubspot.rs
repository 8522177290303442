//! HubSpot CRM v3.

use async_trait::async_trait;
use openhouse_core::types::{ExternalRow, Timestamp};
use reqwest::Method;
use serde_json::{json, Value};

use super::http::{ApiClient, ErrorShape};
use super::oauth::{request_tokens, with_query, OAuthApp};
use super::{
    CrmAdapter, CrmField, CrmObject, CrmRecord, FilterOperator, OAuthProvider, OAuthTokens,
    ProviderError, QueryFilter,
};

const PROVIDER: &str = "HubSpot";
const API_URL: &str = "https://api.hubapi.com";
const AUTHORIZE_URL: &str = "https://app.hubspot.com/oauth/authorize";
const SCOPES: &[&str] = &[
    "crm.objects.contacts.read",
    "crm.objects.contacts.write",
    "crm.objects.deals.read",
    "crm.objects.deals.write",
    "crm.objects.companies.read",
    "crm.objects.companies.write",
    "crm.schemas.custom.read",
];
const STANDARD_OBJECTS: &[(&str, &str, &str)] = &[
    ("contacts", "Contact", "Contacts"),
    ("deals", "Deal", "Deals"),
    ("companies", "Company", "Companies"),
    ("tickets", "Ticket", "Tickets"),
];
const SEARCH_LIMIT: u32 = 100;
const MAX_SEARCH_PROPERTIES: usize = 30;

pub struct HubSpotAdapter {
    api: ApiClient,
    app: OAuthApp,
    redirect_uri: String,
    base_url: String,
}

impl HubSpotAdapter {
    pub fn new(app: OAuthApp, redirect_uri: String, access_token: Option<String>) -> Self {
        Self {
            api: ApiClient::new(PROVIDER, access_token, ErrorShape::TopLevel),
            app,
            redirect_uri,
            base_url: API_URL.to_string(),
        }
    }

    /// Override the API host. The token endpoint lives on the same host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn search(&self, object: &str, body: Value) -> Result<Vec<CrmRecord>, ProviderError> {
        let url = self.url(&format!("/crm/v3/objects/{object}/search"));
        let response = self.api.json(Method::POST, &url, Some(&body), &[]).await?;
        Ok(response
            .get("results")
            .and_then(Value::as_array)
            .map(|records| records.iter().map(normalize_record).collect())
            .unwrap_or_default())
    }

    async fn token_request(&self, form: &[(&str, &str)], previous: Option<&str>) -> Result<OAuthTokens, ProviderError> {
        request_tokens(
            self.api.http(),
            PROVIDER,
            &self.url("/oauth/v1/token"),
            form,
            None,
            previous,
        )
        .await
    }
}

fn normalize_record(record: &Value) -> CrmRecord {
    CrmRecord {
        id: record
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        fields: record
            .get("properties")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default(),
    }
}

fn operator(op: FilterOperator) -> &'static str {
    match op {
        FilterOperator::Eq => "EQ",
        FilterOperator::NotEq => "NEQ",
        FilterOperator::Gt => "GT",
        FilterOperator::Gte => "GTE",
        FilterOperator::Lt => "LT",
        FilterOperator::Lte => "LTE",
        FilterOperator::Contains | FilterOperator::Like => "CONTAINS_TOKEN",
    }
}

pub(crate) fn search_body(filters: &[QueryFilter], properties: &[String]) -> Value {
    let mut body = json!({
        "limit": SEARCH_LIMIT,
        "properties": properties,
    });
    if !filters.is_empty() {
        let filters: Vec<Value> = filters
            .iter()
            .map(|f| {
                json!({
                    "propertyName": f.field,
                    "operator": operator(f.operator),
                    "value": f.value,
                })
            })
            .collect();
        body["filterGroups"] = json!([{ "filters": filters }]);
    }
    body
}

#[async_trait]
impl OAuthProvider for HubSpotAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        Ok(with_query(
            AUTHORIZE_URL,
            &[
                ("client_id", &self.app.client_id),
                ("redirect_uri", &self.redirect_uri),
                ("scope", &SCOPES.join(" ")),
                ("state", state),
            ],
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, ProviderError> {
        self.token_request(
            &[
                ("grant_type", "authorization_code"),
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("redirect_uri", &self.redirect_uri),
                ("code", code),
            ],
            None,
        )
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
        self.token_request(
            &[
                ("grant_type", "refresh_token"),
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("refresh_token", refresh_token),
            ],
            Some(refresh_token),
        )
        .await
    }
}

#[async_trait]
impl CrmAdapter for HubSpotAdapter {
    /// Standard objects plus any custom schemas the portal exposes.
    async fn available_objects(&self) -> Result<Vec<CrmObject>, ProviderError> {
        let mut objects: Vec<CrmObject> = STANDARD_OBJECTS
            .iter()
            .map(|(name, label, plural)| CrmObject {
                name: (*name).to_string(),
                label: (*label).to_string(),
                plural_label: (*plural).to_string(),
            })
            .collect();

        match self.api.get(&self.url("/crm/v3/schemas")).await {
            Ok(response) => {
                let custom = response
                    .get("results")
                    .and_then(Value::as_array)
                    .into_iter()
                    .flatten()
                    .filter_map(|schema| {
                        let name = schema
                            .get("fullyQualifiedName")
                            .or_else(|| schema.get("name"))?
                            .as_str()?
                            .to_string();
                        let label = schema
                            .pointer("/labels/singular")
                            .and_then(Value::as_str)
                            .unwrap_or(&name)
                            .to_string();
                        let plural_label = schema
                            .pointer("/labels/plural")
                            .and_then(Value::as_str)
                            .unwrap_or(&label)
                            .to_string();
                        Some(CrmObject { name, label, plural_label })
                    });
                objects.extend(custom);
            }
            Err(e) => tracing::debug!(error = %e, "HubSpot custom schemas unavailable"),
        }

        Ok(objects)
    }

    async fn object_fields(&self, object: &str) -> Result<Vec<CrmField>, ProviderError> {
        let response = self
            .api
            .get(&self.url(&format!("/crm/v3/properties/{object}")))
            .await?;
        Ok(response
            .get("results")
            .and_then(Value::as_array)
            .map(|props| {
                props
                    .iter()
                    .filter_map(|p| {
                        let name = p.get("name")?.as_str()?.to_string();
                        let field_type = p.get("type").and_then(Value::as_str).unwrap_or("string");
                        Some(CrmField {
                            label: p.get("label").and_then(Value::as_str).unwrap_or(&name).to_string(),
                            required: p.get("fieldType").and_then(Value::as_str) == Some("text")
                                && name == "email",
                            field_type: field_type.to_string(),
                            picklist_values: p
                                .get("options")
                                .and_then(Value::as_array)
                                .map(|opts| {
                                    opts.iter()
                                        .filter_map(|o| o.get("value")?.as_str().map(str::to_string))
                                        .collect()
                                })
                                .unwrap_or_default(),
                            name,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query(&self, object: &str, filters: &[QueryFilter]) -> Result<Vec<CrmRecord>, ProviderError> {
        let properties: Vec<String> = match self.object_fields(object).await {
            Ok(fields) => fields
                .into_iter()
                .take(MAX_SEARCH_PROPERTIES)
                .map(|f| f.name)
                .collect(),
            Err(e) => {
                tracing::debug!(object, error = %e, "HubSpot properties unavailable");
                Vec::new()
            }
        };
        self.search(object, search_body(filters, &properties)).await
    }

    async fn get_record(&self, object: &str, id: &str) -> Result<CrmRecord, ProviderError> {
        let response = self
            .api
            .get(&self.url(&format!("/crm/v3/objects/{object}/{id}")))
            .await?;
        Ok(normalize_record(&response))
    }

    async fn create_record(&self, object: &str, data: &ExternalRow) -> Result<String, ProviderError> {
        let url = self.url(&format!("/crm/v3/objects/{object}"));
        let body = json!({ "properties": data });
        let response = self.api.json(Method::POST, &url, Some(&body), &[]).await?;
        Ok(response
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn update_record(&self, object: &str, id: &str, data: &ExternalRow) -> Result<(), ProviderError> {
        let url = self.url(&format!("/crm/v3/objects/{object}/{id}"));
        let body = json!({ "properties": data });
        self.api.json(Method::PATCH, &url, Some(&body), &[]).await?;
        Ok(())
    }

    async fn changed_records(&self, object: &str, since: Timestamp) -> Result<Vec<CrmRecord>, ProviderError> {
        let body = json!({
            "filterGroups": [{
                "filters": [{
                    "propertyName": "hs_lastmodifieddate",
                    "operator": "GTE",
                    "value": since.timestamp_millis().to_string(),
                }]
            }],
            "sorts": [{ "propertyName": "hs_lastmodifieddate", "direction": "ASCENDING" }],
            "limit": SEARCH_LIMIT,
        });
        self.search(object, body).await
    }
}
