//! Microsoft Dynamics 365 over the Dataverse Web API (OData v4).

use async_trait::async_trait;
use chrono::SecondsFormat;
use openhouse_core::types::{ExternalRow, Timestamp};
use reqwest::Method;
use serde_json::Value;

use super::http::{ApiClient, ErrorShape};
use super::oauth::{request_tokens, with_query, OAuthApp};
use super::{
    CrmAdapter, CrmField, CrmObject, CrmRecord, FilterOperator, OAuthProvider, OAuthTokens,
    ProviderError, QueryFilter,
};

const PROVIDER: &str = "Dynamics 365";
const API_PATH: &str = "/api/data/v9.2";
const AUTHORIZE_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const MAX_RECORDS: u32 = 5000;

const ODATA_HEADERS: &[(&str, &str)] = &[
    ("OData-MaxVersion", "4.0"),
    ("OData-Version", "4.0"),
    ("Prefer", "odata.include-annotations=\"*\""),
];

pub struct DynamicsAdapter {
    api: ApiClient,
    app: OAuthApp,
    redirect_uri: String,
    org_url: Option<String>,
    token_url: String,
}

impl DynamicsAdapter {
    pub fn new(
        app: OAuthApp,
        redirect_uri: String,
        org_url: Option<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            api: ApiClient::new(PROVIDER, access_token, ErrorShape::Nested),
            app,
            redirect_uri,
            org_url: org_url.map(|u| u.trim_end_matches('/').to_string()),
            token_url: TOKEN_URL.to_string(),
        }
    }

    /// Point at a different organisation root (the Web API path is appended).
    pub fn with_base_url(mut self, org_url: impl Into<String>) -> Self {
        self.org_url = Some(org_url.into().trim_end_matches('/').to_string());
        self
    }

    pub fn with_token_url(mut self, token_url: impl Into<String>) -> Self {
        self.token_url = token_url.into();
        self
    }

    fn org_url(&self) -> Result<&str, ProviderError> {
        self.org_url.as_deref().ok_or_else(|| ProviderError::NotConfigured {
            provider: PROVIDER,
            message: "organisation URL is not set".into(),
        })
    }

    fn url(&self, path: &str) -> Result<String, ProviderError> {
        Ok(format!("{}{API_PATH}{path}", self.org_url()?))
    }

    fn scope(&self) -> Result<String, ProviderError> {
        Ok(format!("{}/user_impersonation offline_access", self.org_url()?))
    }

    async fn request(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, ProviderError> {
        let url = self.url(path)?;
        self.api.json(method, &url, body, ODATA_HEADERS).await
    }

    fn records(&self, object: &str, response: &Value) -> Vec<CrmRecord> {
        response
            .get("value")
            .and_then(Value::as_array)
            .map(|records| records.iter().map(|r| normalize_record(object, r)).collect())
            .unwrap_or_default()
    }
}

/// Key inside the parentheses of an entity link such as
/// `https://org/api/data/v9.2/contacts(c-1)`.
fn entity_key(link: &str) -> Option<&str> {
    link.rsplit_once('(')
        .and_then(|(_, rest)| rest.split_once(')'))
        .map(|(id, _)| id)
        .filter(|id| !id.is_empty())
}

/// Logical names an entity set name may have been derived from
/// (`opportunities` -> `opportunity`, `contacts` -> `contact`).
fn logical_names(entity_set: &str) -> Vec<String> {
    let mut names = Vec::new();
    if let Some(stem) = entity_set.strip_suffix("ies") {
        names.push(format!("{stem}y"));
    }
    if let Some(stem) = entity_set.strip_suffix("es") {
        names.push(stem.to_string());
    }
    if let Some(stem) = entity_set.strip_suffix('s') {
        names.push(stem.to_string());
    }
    names.push(entity_set.to_string());
    names
}

/// Drop OData annotations and lookup shadows. The record id comes from the
/// `@odata.id` / `@odata.editLink` annotation when present, otherwise from
/// the entity's primary key column `<logicalname>id`.
fn normalize_record(entity_set: &str, record: &Value) -> CrmRecord {
    let Some(map) = record.as_object() else {
        return CrmRecord {
            id: String::new(),
            fields: ExternalRow::new(),
        };
    };

    let id = ["@odata.id", "@odata.editLink"]
        .iter()
        .filter_map(|k| map.get(*k).and_then(Value::as_str))
        .find_map(entity_key)
        .map(str::to_string)
        .or_else(|| {
            logical_names(entity_set).iter().find_map(|name| {
                map.get(&format!("{name}id"))
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
        })
        .unwrap_or_default();

    let fields = map
        .iter()
        .filter(|(key, _)| {
            !key.starts_with("@odata") && !(key.starts_with('_') && key.ends_with("_value"))
        })
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();
    CrmRecord { id, fields }
}

fn odata_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub(crate) fn filter_clause(filter: &QueryFilter) -> String {
    let literal = odata_literal(&filter.value);
    let op = match filter.operator {
        FilterOperator::Contains | FilterOperator::Like => {
            return format!("contains({},{literal})", filter.field);
        }
        FilterOperator::Eq => "eq",
        FilterOperator::NotEq => "ne",
        FilterOperator::Gt => "gt",
        FilterOperator::Gte => "ge",
        FilterOperator::Lt => "lt",
        FilterOperator::Lte => "le",
    };
    format!("{} {op} {literal}", filter.field)
}

/// Localised label under `DisplayName.UserLocalizedLabel.Label`.
fn label(value: &Value, key: &str) -> Option<String> {
    value
        .pointer(&format!("/{key}/UserLocalizedLabel/Label"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

#[async_trait]
impl OAuthProvider for DynamicsAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        let scope = self.scope()?;
        Ok(with_query(
            AUTHORIZE_URL,
            &[
                ("client_id", &self.app.client_id),
                ("response_type", "code"),
                ("redirect_uri", &self.redirect_uri),
                ("scope", &scope),
                ("state", state),
            ],
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, ProviderError> {
        let scope = self.scope()?;
        let mut tokens = request_tokens(
            self.api.http(),
            PROVIDER,
            &self.token_url,
            &[
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("code", code),
                ("redirect_uri", &self.redirect_uri),
                ("grant_type", "authorization_code"),
                ("scope", &scope),
            ],
            None,
            None,
        )
        .await?;
        tokens.instance_url = tokens.instance_url.or_else(|| self.org_url.clone());
        Ok(tokens)
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
        let mut tokens = request_tokens(
            self.api.http(),
            PROVIDER,
            &self.token_url,
            &[
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
            None,
            Some(refresh_token),
        )
        .await?;
        tokens.instance_url = tokens.instance_url.or_else(|| self.org_url.clone());
        Ok(tokens)
    }
}

#[async_trait]
impl CrmAdapter for DynamicsAdapter {
    async fn available_objects(&self) -> Result<Vec<CrmObject>, ProviderError> {
        let response = self
            .request(
                Method::GET,
                "/EntityDefinitions?$select=LogicalName,DisplayName,DisplayCollectionName,IsCustomizable\
                 &$filter=IsCustomizable/Value eq true",
                None,
            )
            .await?;

        Ok(response
            .get("value")
            .and_then(Value::as_array)
            .map(|entities| {
                entities
                    .iter()
                    .filter_map(|entity| {
                        let name = entity.get("LogicalName")?.as_str()?.to_string();
                        Some(CrmObject {
                            label: label(entity, "DisplayName").unwrap_or_else(|| name.clone()),
                            plural_label: label(entity, "DisplayCollectionName")
                                .unwrap_or_else(|| name.clone()),
                            name,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn object_fields(&self, object: &str) -> Result<Vec<CrmField>, ProviderError> {
        let path = format!(
            "/EntityDefinitions(LogicalName='{object}')/Attributes\
             ?$select=LogicalName,DisplayName,AttributeType,RequiredLevel"
        );
        let response = self.request(Method::GET, &path, None).await?;

        Ok(response
            .get("value")
            .and_then(Value::as_array)
            .map(|attrs| {
                attrs
                    .iter()
                    .filter_map(|attr| {
                        let name = attr.get("LogicalName")?.as_str()?.to_string();
                        let required = matches!(
                            attr.pointer("/RequiredLevel/Value").and_then(Value::as_str),
                            Some("ApplicationRequired" | "SystemRequired")
                        );
                        Some(CrmField {
                            label: label(attr, "DisplayName").unwrap_or_else(|| name.clone()),
                            field_type: attr
                                .get("AttributeType")
                                .and_then(Value::as_str)
                                .unwrap_or("String")
                                .to_string(),
                            required,
                            picklist_values: Vec::new(),
                            name,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn query(&self, object: &str, filters: &[QueryFilter]) -> Result<Vec<CrmRecord>, ProviderError> {
        let mut params = Vec::new();
        if !filters.is_empty() {
            let clauses: Vec<String> = filters.iter().map(filter_clause).collect();
            params.push(format!("$filter={}", urlencoding::encode(&clauses.join(" and "))));
        }
        params.push(format!("$top={MAX_RECORDS}"));

        let response = self
            .request(Method::GET, &format!("/{object}?{}", params.join("&")), None)
            .await?;
        Ok(self.records(object, &response))
    }

    async fn get_record(&self, object: &str, id: &str) -> Result<CrmRecord, ProviderError> {
        let response = self.request(Method::GET, &format!("/{object}({id})"), None).await?;
        let mut record = normalize_record(object, &response);
        if record.id.is_empty() {
            record.id = id.to_string();
        }
        Ok(record)
    }

    /// Dataverse returns the new id only in the `OData-EntityId` header.
    async fn create_record(&self, object: &str, data: &ExternalRow) -> Result<String, ProviderError> {
        let url = self.url(&format!("/{object}"))?;
        let body = Value::Object(data.clone());
        let response = self
            .api
            .send(Method::POST, &url, Some(&body), ODATA_HEADERS)
            .await?;

        let entity_id = response
            .headers()
            .get("OData-EntityId")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        Ok(entity_key(entity_id).unwrap_or_default().to_string())
    }

    async fn update_record(&self, object: &str, id: &str, data: &ExternalRow) -> Result<(), ProviderError> {
        let body = Value::Object(data.clone());
        self.request(Method::PATCH, &format!("/{object}({id})"), Some(&body))
            .await?;
        Ok(())
    }

    async fn changed_records(&self, object: &str, since: Timestamp) -> Result<Vec<CrmRecord>, ProviderError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        let path = format!(
            "/{object}?$filter={}&$orderby=modifiedon asc&$top={MAX_RECORDS}",
            urlencoding::encode(&format!("modifiedon gt {since}"))
        );
        let response = self.request(Method::GET, &path, None).await?;
        Ok(self.records(object, &response))
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn filters_translate_to_odata() {
        assert_eq!(
            filter_clause(&QueryFilter::new("lastname", "=", "O'Brien")),
            "lastname eq 'O''Brien'"
        );
        assert_eq!(
            filter_clause(&QueryFilter::new("revenue", ">=", "100")),
            "revenue ge '100'"
        );
        assert_eq!(
            filter_clause(&QueryFilter::new("fullname", "like", "Ann")),
            "contains(fullname,'Ann')"
        );
        assert_eq!(
            filter_clause(&QueryFilter::new("x", "between", "1")),
            "x eq '1'"
        );
    }

    #[test]
    fn normalize_skips_annotations_and_picks_id() {
        let record = normalize_record("contacts", &json!({
            "@odata.etag": "W/\"1\"",
            "contactid": "c-1",
            "_parentcustomerid_value": "acc",
            "firstname": "Ann",
        }));
        assert_eq!(record.id, "c-1");
        assert_eq!(record.fields["firstname"], "Ann");
        assert!(!record.fields.contains_key("@odata.etag"));
        assert!(!record.fields.contains_key("_parentcustomerid_value"));
    }

    #[test]
    fn record_id_is_the_entity_primary_key() {
        let record = normalize_record(
            "contacts",
            &json!({"contactid": "c-1", "address1_addressid": "a-9"}),
        );
        assert_eq!(record.id, "c-1");
        assert_eq!(record.fields["address1_addressid"], "a-9");

        let opportunity = normalize_record(
            "opportunities",
            &json!({"customerid": "x-1", "opportunityid": "o-3"}),
        );
        assert_eq!(opportunity.id, "o-3");
    }

    #[test]
    fn record_id_prefers_the_entity_link() {
        let record = normalize_record(
            "contacts",
            &json!({
                "@odata.id": "https://org.crm.dynamics.com/api/data/v9.2/contacts(c-7)",
                "address1_addressid": "a-9",
            }),
        );
        assert_eq!(record.id, "c-7");

        let record = normalize_record(
            "accounts",
            &json!({"@odata.editLink": "accounts(acc-2)", "accountid": "acc-2"}),
        );
        assert_eq!(record.id, "acc-2");
        assert_eq!(entity_key("contacts()"), None);
    }

    #[test]
    fn auth_url_requires_org() {
        let adapter = DynamicsAdapter::new(OAuthApp::default(), "cb".into(), None, None);
        assert!(matches!(
            adapter.auth_url("s"),
            Err(ProviderError::NotConfigured { .. })
        ));

        let adapter = adapter.with_base_url("https://org.crm.dynamics.com/");
        let url = adapter.auth_url("state-1").unwrap();
        assert!(url.contains("scope=https%3A%2F%2Forg.crm.dynamics.com%2Fuser_impersonation%20offline_access"));
        assert!(url.ends_with("state=state-1"));
    }
}
