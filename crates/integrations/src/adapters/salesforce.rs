//! Salesforce REST API (SOQL queries, sObject describe).

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

const PROVIDER: &str = "Salesforce";
const API_VERSION: &str = "v59.0";
const LOGIN_URL: &str = "https://login.salesforce.com";
const SCOPE: &str = "api refresh_token offline_access";
/// Salesforce omits `expires_in`; sessions default to two hours.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 7200;
const QUERY_LIMIT: u32 = 2000;
const MAX_SELECT_FIELDS: usize = 50;

pub struct SalesforceAdapter {
    api: ApiClient,
    app: OAuthApp,
    redirect_uri: String,
    instance_url: Option<String>,
    login_url: String,
}

impl SalesforceAdapter {
    pub fn new(
        app: OAuthApp,
        redirect_uri: String,
        instance_url: Option<String>,
        access_token: Option<String>,
    ) -> Self {
        Self {
            api: ApiClient::new(PROVIDER, access_token, ErrorShape::Array),
            app,
            redirect_uri,
            instance_url: instance_url.map(|u| u.trim_end_matches('/').to_string()),
            login_url: LOGIN_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, instance_url: impl Into<String>) -> Self {
        self.instance_url = Some(instance_url.into().trim_end_matches('/').to_string());
        self
    }

    /// Override the login host (sandboxes use `test.salesforce.com`).
    pub fn with_login_url(mut self, login_url: impl Into<String>) -> Self {
        self.login_url = login_url.into().trim_end_matches('/').to_string();
        self
    }

    fn url(&self, path: &str) -> Result<String, ProviderError> {
        let instance = self
            .instance_url
            .as_deref()
            .ok_or_else(|| ProviderError::NotConfigured {
                provider: PROVIDER,
                message: "instance URL is not set".into(),
            })?;
        Ok(format!("{instance}/services/data/{API_VERSION}{path}"))
    }

    async fn get(&self, path: &str) -> Result<Value, ProviderError> {
        self.api.get(&self.url(path)?).await
    }

    async fn soql(&self, query: &str) -> Result<Vec<CrmRecord>, ProviderError> {
        let response = self
            .get(&format!("/query?q={}", urlencoding::encode(query)))
            .await?;
        Ok(response
            .get("records")
            .and_then(Value::as_array)
            .map(|records| records.iter().map(normalize_record).collect())
            .unwrap_or_default())
    }

    /// Queryable scalar fields, or `Id, Name` when describe fails.
    async fn select_list(&self, object: &str) -> String {
        match self.object_fields(object).await {
            Ok(fields) => {
                let names: Vec<String> = fields
                    .into_iter()
                    .filter(|f| f.field_type != "address" && f.field_type != "location")
                    .take(MAX_SELECT_FIELDS)
                    .map(|f| f.name)
                    .collect();
                if names.is_empty() {
                    "Id, Name".to_string()
                } else {
                    names.join(", ")
                }
            }
            Err(e) => {
                tracing::debug!(object, error = %e, "Describe failed, selecting Id and Name");
                "Id, Name".to_string()
            }
        }
    }
}

fn normalize_record(record: &Value) -> CrmRecord {
    let mut fields = record.as_object().cloned().unwrap_or_default();
    fields.remove("attributes");
    let id = fields
        .get("Id")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();
    CrmRecord { id, fields }
}

pub(crate) fn escape_soql(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

pub(crate) fn where_clause(filter: &QueryFilter) -> String {
    let value = escape_soql(&filter.value);
    if filter.operator.is_containment() {
        return format!("{} LIKE '%{value}%'", filter.field);
    }
    let op = match filter.operator {
        FilterOperator::NotEq => "!=",
        FilterOperator::Gt => ">",
        FilterOperator::Gte => ">=",
        FilterOperator::Lt => "<",
        FilterOperator::Lte => "<=",
        _ => "=",
    };
    format!("{} {op} '{value}'", filter.field)
}

#[async_trait]
impl OAuthProvider for SalesforceAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        Ok(with_query(
            &format!("{}/services/oauth2/authorize", self.login_url),
            &[
                ("client_id", &self.app.client_id),
                ("response_type", "code"),
                ("redirect_uri", &self.redirect_uri),
                ("scope", SCOPE),
                ("state", state),
            ],
        ))
    }

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, ProviderError> {
        request_tokens(
            self.api.http(),
            PROVIDER,
            &format!("{}/services/oauth2/token", self.login_url),
            &[
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("code", code),
                ("redirect_uri", &self.redirect_uri),
                ("grant_type", "authorization_code"),
            ],
            Some(DEFAULT_TOKEN_LIFETIME_SECS),
            None,
        )
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
        let mut tokens = request_tokens(
            self.api.http(),
            PROVIDER,
            &format!("{}/services/oauth2/token", self.login_url),
            &[
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
            ],
            Some(DEFAULT_TOKEN_LIFETIME_SECS),
            Some(refresh_token),
        )
        .await?;
        tokens.instance_url = tokens.instance_url.or_else(|| self.instance_url.clone());
        Ok(tokens)
    }
}

#[async_trait]
impl CrmAdapter for SalesforceAdapter {
    async fn available_objects(&self) -> Result<Vec<CrmObject>, ProviderError> {
        let response = self.get("/sobjects/").await?;
        Ok(response
            .get("sobjects")
            .and_then(Value::as_array)
            .map(|objects| {
                objects
                    .iter()
                    .filter(|o| {
                        o.get("queryable").and_then(Value::as_bool).unwrap_or(false)
                            && o.get("createable").and_then(Value::as_bool).unwrap_or(false)
                    })
                    .filter_map(|o| {
                        let name = o.get("name")?.as_str()?.to_string();
                        let label = o.get("label").and_then(Value::as_str).unwrap_or(&name).to_string();
                        Some(CrmObject {
                            plural_label: o
                                .get("labelPlural")
                                .and_then(Value::as_str)
                                .unwrap_or(&label)
                                .to_string(),
                            label,
                            name,
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn object_fields(&self, object: &str) -> Result<Vec<CrmField>, ProviderError> {
        let response = self.get(&format!("/sobjects/{object}/describe/")).await?;
        Ok(response
            .get("fields")
            .and_then(Value::as_array)
            .map(|fields| {
                fields
                    .iter()
                    .filter_map(|f| {
                        let name = f.get("name")?.as_str()?.to_string();
                        let nillable = f.get("nillable").and_then(Value::as_bool).unwrap_or(true);
                        let defaulted = f
                            .get("defaultedOnCreate")
                            .and_then(Value::as_bool)
                            .unwrap_or(false);
                        Some(CrmField {
                            label: f.get("label").and_then(Value::as_str).unwrap_or(&name).to_string(),
                            field_type: f.get("type").and_then(Value::as_str).unwrap_or("string").to_string(),
                            required: !nillable && !defaulted,
                            picklist_values: f
                                .get("picklistValues")
                                .and_then(Value::as_array)
                                .map(|values| {
                                    values
                                        .iter()
                                        .filter_map(|v| v.get("value")?.as_str().map(str::to_string))
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
        let select = self.select_list(object).await;
        let mut soql = format!("SELECT {select} FROM {object}");
        if !filters.is_empty() {
            let clauses: Vec<String> = filters.iter().map(where_clause).collect();
            soql.push_str(&format!(" WHERE {}", clauses.join(" AND ")));
        }
        soql.push_str(&format!(" LIMIT {QUERY_LIMIT}"));
        self.soql(&soql).await
    }

    async fn get_record(&self, object: &str, id: &str) -> Result<CrmRecord, ProviderError> {
        let response = self.get(&format!("/sobjects/{object}/{id}")).await?;
        Ok(normalize_record(&response))
    }

    async fn create_record(&self, object: &str, data: &ExternalRow) -> Result<String, ProviderError> {
        let url = self.url(&format!("/sobjects/{object}/"))?;
        let body = Value::Object(data.clone());
        let response = self.api.json(Method::POST, &url, Some(&body), &[]).await?;
        Ok(response
            .get("id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string())
    }

    async fn update_record(&self, object: &str, id: &str, data: &ExternalRow) -> Result<(), ProviderError> {
        let url = self.url(&format!("/sobjects/{object}/{id}"))?;
        let body = Value::Object(data.clone());
        self.api.json(Method::PATCH, &url, Some(&body), &[]).await?;
        Ok(())
    }

    async fn changed_records(&self, object: &str, since: Timestamp) -> Result<Vec<CrmRecord>, ProviderError> {
        let since = since.to_rfc3339_opts(SecondsFormat::Secs, true);
        self.soql(&format!(
            "SELECT Id, Name, LastModifiedDate FROM {object} WHERE LastModifiedDate > {since} \
             ORDER BY LastModifiedDate ASC LIMIT {QUERY_LIMIT}"
        ))
        .await
    }
}
