//! Google Sheets v4 with Drive v3 for file listing.

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

const PROVIDER: &str = "Google Sheets";
const API_URL: &str = "https://sheets.googleapis.com";
const DRIVE_URL: &str = "https://www.googleapis.com";
const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const SCOPES: &str =
    "https://www.googleapis.com/auth/spreadsheets https://www.googleapis.com/auth/drive.file";

pub struct GoogleSheetsAdapter {
    api: ApiClient,
    app: OAuthApp,
    redirect_uri: String,
    sheets_url: String,
    drive_url: String,
    token_url: String,
}

impl GoogleSheetsAdapter {
    pub fn new(app: OAuthApp, redirect_uri: String, access_token: Option<String>) -> Self {
        Self {
            api: ApiClient::new(PROVIDER, access_token, ErrorShape::Nested),
            app,
            redirect_uri,
            sheets_url: format!("{API_URL}/v4/spreadsheets"),
            drive_url: format!("{DRIVE_URL}/drive/v3"),
            token_url: TOKEN_URL.to_string(),
        }
    }

    /// Serve Sheets, Drive and the token endpoint from one host.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base = base_url.into().trim_end_matches('/').to_string();
        self.sheets_url = format!("{base}/v4/spreadsheets");
        self.drive_url = format!("{base}/drive/v3");
        self.token_url = format!("{base}/token");
        self
    }

    fn values_url(&self, file_id: &str, range: &str) -> String {
        format!(
            "{}/{file_id}/values/{}",
            self.sheets_url,
            urlencoding::encode(range)
        )
    }

    async fn values(&self, file_id: &str, range: &str) -> Result<Vec<Vec<Value>>, ProviderError> {
        let response = self.api.get(&self.values_url(file_id, range)).await?;
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

    async fn write_cell(&self, file_id: &str, range: &str, value: &str) -> Result<(), ProviderError> {
        let url = format!("{}?valueInputOption=USER_ENTERED", self.values_url(file_id, range));
        let body = json!({ "values": [[value]] });
        self.api.json(Method::PUT, &url, Some(&body), &[]).await?;
        Ok(())
    }
}

#[async_trait]
impl OAuthProvider for GoogleSheetsAdapter {
    fn provider_name(&self) -> &'static str {
        PROVIDER
    }

    fn auth_url(&self, state: &str) -> Result<String, ProviderError> {
        Ok(with_query(
            AUTHORIZE_URL,
            &[
                ("client_id", &self.app.client_id),
                ("redirect_uri", &self.redirect_uri),
                ("response_type", "code"),
                ("scope", SCOPES),
                ("access_type", "offline"),
                ("prompt", "consent"),
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
                ("code", code),
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("redirect_uri", &self.redirect_uri),
                ("grant_type", "authorization_code"),
            ],
            None,
            None,
        )
        .await
    }

    /// Google does not rotate refresh tokens.
    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ProviderError> {
        request_tokens(
            self.api.http(),
            PROVIDER,
            &self.token_url,
            &[
                ("refresh_token", refresh_token),
                ("client_id", &self.app.client_id),
                ("client_secret", &self.app.client_secret),
                ("grant_type", "refresh_token"),
            ],
            None,
            Some(refresh_token),
        )
        .await
    }
}

#[async_trait]
impl SpreadsheetAdapter for GoogleSheetsAdapter {
    async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetFile>, ProviderError> {
        let query = urlencoding::encode("mimeType='application/vnd.google-apps.spreadsheet'");
        let url = format!(
            "{}/files?q={query}&fields={}&pageSize=50",
            self.drive_url,
            urlencoding::encode("files(id,name,webViewLink)")
        );
        let response = self.api.get(&url).await?;
        Ok(response
            .get("files")
            .and_then(Value::as_array)
            .map(|files| {
                files
                    .iter()
                    .filter_map(|f| {
                        Some(SpreadsheetFile {
                            id: f.get("id")?.as_str()?.to_string(),
                            name: f.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
                            url: f.get("webViewLink").and_then(Value::as_str).map(str::to_string),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn headers(&self, file_id: &str, sheet: &str) -> Result<Vec<String>, ProviderError> {
        let values = self.values(file_id, &format!("{sheet}!1:1")).await?;
        Ok(values
            .first()
            .map(|row| row.iter().map(cell_to_string).collect())
            .unwrap_or_default())
    }

    async fn rows(&self, file_id: &str, sheet: &str) -> Result<Vec<ExternalRow>, ProviderError> {
        let values = self.values(file_id, sheet).await?;
        Ok(rows_from_values(&values))
    }

    async fn sample_data(&self, file_id: &str, sheet: &str, rows: usize) -> Result<Vec<Vec<String>>, ProviderError> {
        let values = self
            .values(file_id, &format!("{sheet}!A1:Z{}", rows + 1))
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
        self.write_cell(file_id, &format!("{sheet}!{column}{row}"), value)
            .await
    }

    async fn add_column(&self, file_id: &str, sheet: &str, header: &str) -> Result<(), ProviderError> {
        let headers = self.headers(file_id, sheet).await?;
        let column = column_letter(headers.len());
        self.write_cell(file_id, &format!("{sheet}!{column}1"), header)
            .await
    }

    async fn batch_update(&self, file_id: &str, sheet: &str, updates: &[CellUpdate]) -> Result<(), ProviderError> {
        if updates.is_empty() {
            return Ok(());
        }
        let data: Vec<Value> = updates
            .iter()
            .map(|u| {
                json!({
                    "range": format!("{sheet}!{}{}", column_letter(u.col), u.row + 1),
                    "values": [[u.value]],
                })
            })
            .collect();
        let url = format!("{}/{file_id}/values:batchUpdate", self.sheets_url);
        let body = json!({ "valueInputOption": "USER_ENTERED", "data": data });
        self.api.json(Method::POST, &url, Some(&body), &[]).await?;
        Ok(())
    }
}
