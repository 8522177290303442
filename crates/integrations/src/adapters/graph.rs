//! Excel workbooks on OneDrive / SharePoint through Microsoft Graph.

use std::collections::BTreeMap;

use async_trait::async_trait;
use openhouse_core::types::ExternalRow;
use reqwest::Method;
use serde_json::{json, Value};

use super::http::{ApiClient, ErrorShape};
use super::oauth::{request_tokens, with_query, OAuthApp};
use super::{
    cell_to_string, column_letter, rows_from_values, CellUpdate, OAuthProvider, OAuthTokens,
    ProviderError, SpreadsheetAdapter, SpreadsheetFile,
};

const PROVIDER: &str = "Microsoft Excel";
const API_URL: &str = "https://graph.microsoft.com/v1.0";
const AUTHORIZE_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/authorize";
const TOKEN_URL: &str = "https://login.microsoftonline.com/common/oauth2/v2.0/token";
const SCOPE: &str = "Files.ReadWrite.All Sites.ReadWrite.All offline_access";

pub struct GraphWorkbookAdapter {
    api: ApiClient,
    app: OAuthApp,
    redirect_uri: String,
    base_url: String,
    token_url: String,
}

impl GraphWorkbookAdapter {
    pub fn new(app: OAuthApp, redirect_uri: String, access_token: Option<String>) -> Self {
        Self {
            api: ApiClient::new(PROVIDER, access_token, ErrorShape::Nested),
            app,
            redirect_uri,
            base_url: API_URL.to_string(),
            token_url: TOKEN_URL.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        self.token_url = format!("{base}/token");
        self.base_url = base;
        self
    }

    fn worksheet_url(&self, file_id: &str, sheet: &str) -> String {
        format!(
            "{}/me/drive/items/{file_id}/workbook/worksheets/{}",
            self.base_url,
            urlencoding::encode(sheet)
        )
    }

    fn range_url(&self, file_id: &str, sheet: &str, address: &str) -> String {
        format!("{}/range(address='{address}')", self.worksheet_url(file_id, sheet))
    }

    async fn range_values(&self, url: &str) -> Result<Vec<Vec<Value>>, ProviderError> {
        let response = self.api.get(url).await?;
        Ok(response
            .get("values")
            .and_then(Value::as_array)
            .map(|rows| {
                rows.iter()
                    .map(|row| row.as_array().cloned().unwrap_or_default())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn patch_range(&self, file_id: &str, sheet: &str, address: &str, values: Value) -> Result<(), ProviderError> {
        let url = self.range_url(file_id, sheet, address);
        let body = json!({ "values": values });
        self.api.json(Method::PATCH, &url, Some(&body), &[]).await?;
        Ok(())
    }
}

/// Group cell writes by row into one contiguous range per row. Gaps inside a
/// range are sent as null, which Graph leaves untouched.
pub(crate) fn row_ranges(updates: &[CellUpdate]) -> Vec<(String, Value)> {
    let mut by_row: BTreeMap<usize, BTreeMap<usize, &str>> = BTreeMap::new();
    for update in updates {
        by_row
            .entry(update.row)
            .or_default()
            .insert(update.col, update.value.as_str());
    }

    by_row
        .into_iter()
        .filter_map(|(row, cells)| {
            let min = *cells.keys().next()?;
            let max = *cells.keys().next_back()?;
            let values: Vec<Value> = (min..=max)
                .map(|col| cells.get(&col).map_or(Value::Null, |v| Value::String((*v).to_string())))
                .collect();
            let sheet_row = row + 1;
            let address = format!(
                "{}{sheet_row}:{}{sheet_row}",
                column_letter(min),
                column_letter(max)
            );
            Some((address, Value::Array(vec![Value::Array(values)])))
        })
        .collect()
}

#[async_trait]
impl OAuthProvider for GraphWorkbookAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        Ok(with_query(
            AUTHORIZE_URL,
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
            &self.token_url,
            &[
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("code", code),
                ("redirect_uri", &self.redirect_uri),
                ("grant_type", "authorization_code"),
                ("scope", SCOPE),
            ],
            None,
            None,
        )
        .await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
        request_tokens(
            self.api.http(),
            PROVIDER,
            &self.token_url,
            &[
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("refresh_token", refresh_token),
                ("grant_type", "refresh_token"),
                ("scope", SCOPE),
            ],
            None,
            Some(refresh_token),
        )
        .await
    }
}

#[async_trait]
impl SpreadsheetAdapter for GraphWorkbookAdapter {
    async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetFile>, ProviderError> {
        let url = format!(
            "{}/me/drive/root/search(q='.xlsx')?$select=id,name,webUrl&$top=50",
            self.base_url
        );
        let response = self.api.get(&url).await?;
        Ok(response
            .get("value")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| {
                        Some(SpreadsheetFile {
                            id: f.get("id")?.as_str()?.to_string(),
                            name: f.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                            url: f.get("webUrl").and_then(Value::as_str).map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    /// Row 1 with trailing empty cells trimmed.
    async fn headers(&self, file_id: &str, sheet: &str) -> Result<Vec<String>, ProviderError> {
        let values = self.range_values(&self.range_url(file_id, sheet, "1:1")).await?;
        let mut headers: Vec<String> = values
            .first()
            .map(|row| row.iter().map(cell_to_string).collect())
            .unwrap_or_default();
        while headers.last().is_some_and(|h| h.is_empty()) {
            headers.pop();
        }
        Ok(headers)
    }

    async fn rows(&self, file_id: &str, sheet: &str) -> Result<Vec<ExternalRow>, ProviderError> {
        let url = format!("{}/usedRange", self.worksheet_url(file_id, sheet));
        let values = self.range_values(&url).await?;
        Ok(rows_from_values(&values))
    }

    async fn sample_data(&self, file_id: &str, sheet: &str, rows: usize) -> Result<Vec<Vec<String>>, ProviderError> {
        let address = format!("A1:Z{}", rows + 1);
        let values = self
            .range_values(&self.range_url(file_id, sheet, &address))
            .await?;
        Ok(values
            .iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect())
    }

    async fn update_cell(
        &self,
        file_id: &str,
        sheet: &str,
        row: usize,
        column: &str,
        value: &str,
    ) -> Result<(), ProviderError> {
        self.patch_range(file_id, sheet, &format!("{column}{row}"), json!([[value]]))
            .await
    }

    async fn add_column(&self, file_id: &str, sheet: &str, header: &str) -> Result<(), ProviderError> {
        let headers = self.headers(file_id, sheet).await?;
        let address = format!("{}1", column_letter(headers.len()));
        self.patch_range(file_id, sheet, &address, json!([[header]]))
            .await
    }

    async fn batch_update(&self, file_id: &str, sheet: &str, updates: &[CellUpdate]) -> Result<(), ProviderError> {
        for (address, values) in row_ranges(updates) {
            self.patch_range(file_id, sheet, &address, values).await?;
        }
        Ok(())
    }
}
