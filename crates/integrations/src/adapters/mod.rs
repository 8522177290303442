//! Provider adapters.
//!
//! Every external system is reached through one of two async traits:
//! [`CrmAdapter`] for record-oriented CRMs and [`SpreadsheetAdapter`] for
//! sheet-oriented workbooks. Both extend [`OAuthProvider`]. The sync engine
//! only ever holds a [`ProviderAdapter`], so no provider is named outside
//! this module.

pub mod dynamics;
pub mod factory;
pub mod google_sheets;
pub mod graph;
mod http;
pub mod hubspot;
pub mod oauth;
pub mod salesforce;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use openhouse_core::types::{ExternalRow, Timestamp};
use serde::{Deserialize, Serialize};

pub use dynamics::DynamicsAdapter;
pub use factory::{AdapterFactory, AdapterSource, ProviderAdapter};
pub use google_sheets::GoogleSheetsAdapter;
pub use graph::GraphWorkbookAdapter;
pub use hubspot::HubSpotAdapter;
pub use oauth::{OAuthApp, OAuthSettings};
pub use salesforce::SalesforceAdapter;

/// Sheet read and written when an integration does not name one.
pub const DEFAULT_SHEET: &str = "Sheet1";

/// Tokens expiring within this window are refreshed.
pub const DEFAULT_REFRESH_THRESHOLD_SECS: i64 = 3600;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Non-2xx response, carrying the provider's own error message.
    #[error("{provider} API error ({status}): {message}")]
    Api {
        provider: &'static str,
        status: u16,
        message: String,
    },

    #[error("{0} adapter has no access token")]
    MissingToken(&'static str),

    #[error("{provider} adapter is not configured: {message}")]
    NotConfigured {
        provider: &'static str,
        message: String,
    },

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Unexpected {provider} response: {message}")]
    InvalidResponse {
        provider: &'static str,
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Shared types
// ---------------------------------------------------------------------------

/// Token bundle stored (encrypted) on the integration row.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OAuthTokens {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<Timestamp>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    /// Per-tenant API host (Salesforce instance, Dynamics organisation).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_url: Option<String>,
}

/// Whether `expires_at` falls within `threshold` of `now`. Tokens without an
/// expiry never need refreshing.
pub fn is_token_expiring_soon(
    expires_at: Option<DateTime<Utc>>,
    threshold: Duration,
    now: DateTime<Utc>,
) -> bool {
    expires_at.is_some_and(|at| at - now <= threshold)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrmObject {
    pub name: String,
    pub label: String,
    pub plural_label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrmField {
    pub name: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub picklist_values: Vec<String>,
}

/// A CRM record normalised to an id plus flat fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CrmRecord {
    pub id: String,
    pub fields: ExternalRow,
}

impl CrmRecord {
    /// Flatten into a row map with the id under `"id"`, the shape the sync
    /// engine consumes.
    pub fn into_row(self) -> ExternalRow {
        let mut row = self.fields;
        row.insert("id".into(), serde_json::Value::String(self.id));
        row
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOperator {
    Eq,
    NotEq,
    Gt,
    Gte,
    Lt,
    Lte,
    Contains,
    Like,
}

impl FilterOperator {
    /// Unknown operators fall back to equality.
    pub fn parse(op: &str) -> Self {
        match op {
            "!=" => Self::NotEq,
            ">" => Self::Gt,
            ">=" => Self::Gte,
            "<" => Self::Lt,
            "<=" => Self::Lte,
            "contains" => Self::Contains,
            "like" => Self::Like,
            _ => Self::Eq,
        }
    }

    pub fn is_containment(self) -> bool {
        matches!(self, Self::Contains | Self::Like)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueryFilter {
    pub field: String,
    pub operator: FilterOperator,
    pub value: String,
}

impl QueryFilter {
    pub fn new(field: impl Into<String>, operator: &str, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            operator: FilterOperator::parse(operator),
            value: value.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SpreadsheetFile {
    pub id: String,
    pub name: String,
    pub url: Option<String>,
}

/// One cell write. `row` 0 is the header row; data row `i` is `row = i + 1`.
/// `col` is the 0-based column index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CellUpdate {
    pub row: usize,
    pub col: usize,
    pub value: String,
}

/// Spreadsheet column letters for a 0-based index: 0 → `A`, 26 → `AA`.
pub fn column_letter(index: usize) -> String {
    let mut letters = Vec::new();
    let mut n = index + 1;
    while n > 0 {
        let rem = (n - 1) % 26;
        letters.push(b'A' + rem as u8);
        n = (n - 1) / 26;
    }
    letters.reverse();
    String::from_utf8(letters).unwrap_or_default()
}

/// Turn a header row plus data rows into row maps. Blank headers are dropped
/// and missing trailing cells become null.
pub fn rows_from_values(values: &[Vec<serde_json::Value>]) -> Vec<ExternalRow> {
    let Some((header, data)) = values.split_first() else {
        return Vec::new();
    };
    let headers: Vec<String> = header.iter().map(cell_to_string).collect();
    data.iter()
        .map(|row| {
            headers
                .iter()
                .enumerate()
                .filter(|(_, h)| !h.is_empty())
                .map(|(i, h)| (h.clone(), row.get(i).cloned().unwrap_or(serde_json::Value::Null)))
                .collect()
        })
        .collect()
}

pub(crate) fn cell_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    fn provider_name(&self) -> &'static str;

    /// Consent URL the operator is redirected to. `state` round-trips to the
    /// callback.
    fn auth_url(&self, state: &str) -> Result<String, ProviderError>;

    async fn exchange_code(&self, code: &str) -> Result<OAuthTokens, ProviderError>;

    async fn refresh_token(&self, refresh_token: &str) -> Result<OAuthTokens, ProviderError>;
}

#[async_trait]
pub trait CrmAdapter: OAuthProvider {
    async fn available_objects(&self) -> Result<Vec<CrmObject>, ProviderError>;

    async fn object_fields(&self, object: &str) -> Result<Vec<CrmField>, ProviderError>;

    async fn query(&self, object: &str, filters: &[QueryFilter]) -> Result<Vec<CrmRecord>, ProviderError>;

    async fn get_record(&self, object: &str, id: &str) -> Result<CrmRecord, ProviderError>;

    /// Returns the new record's id.
    async fn create_record(&self, object: &str, data: &ExternalRow) -> Result<String, ProviderError>;

    async fn update_record(&self, object: &str, id: &str, data: &ExternalRow) -> Result<(), ProviderError>;

    async fn changed_records(&self, object: &str, since: Timestamp) -> Result<Vec<CrmRecord>, ProviderError>;
}

#[async_trait]
pub trait SpreadsheetAdapter: OAuthProvider {
    async fn list_spreadsheets(&self) -> Result<Vec<SpreadsheetFile>, ProviderError>;

    async fn headers(&self, file_id: &str, sheet: &str) -> Result<Vec<String>, ProviderError>;

    async fn rows(&self, file_id: &str, sheet: &str) -> Result<Vec<ExternalRow>, ProviderError>;

    /// Header row plus up to `rows` data rows, as strings.
    async fn sample_data(&self, file_id: &str, sheet: &str, rows: usize) -> Result<Vec<Vec<String>>, ProviderError>;

    /// `row` is the 1-based sheet row, `column` the column letters.
    async fn update_cell(
        &self,
        file_id: &str,
        sheet: &str,
        row: usize,
        column: &str,
        value: &str,
    ) -> Result<(), ProviderError>;

    /// Append a header in the first empty column of row 1.
    async fn add_column(&self, file_id: &str, sheet: &str, header: &str) -> Result<(), ProviderError>;

    /// Workbooks have no per-row change tracking, so this is every row.
    async fn changed_rows(&self, file_id: &str, sheet: &str) -> Result<Vec<ExternalRow>, ProviderError> {
        self.rows(file_id, sheet).await
    }

    async fn batch_update(&self, file_id: &str, sheet: &str, updates: &[CellUpdate]) -> Result<(), ProviderError>;
}
