//! Provider adapters against a local HTTP stand-in.

use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use axum::extract::State;
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::{Json, Router};
use chrono::{Duration, TimeZone, Utc};
use openhouse_core::types::ExternalRow;
use openhouse_integrations::adapters::{
    CellUpdate, CrmAdapter, DynamicsAdapter, GoogleSheetsAdapter, GraphWorkbookAdapter,
    HubSpotAdapter, OAuthApp, OAuthProvider, ProviderError, QueryFilter, SalesforceAdapter,
    SpreadsheetAdapter,
};
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Local provider
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Recorded {
    method: Method,
    path: String,
    query: String,
    authorization: Option<String>,
    body: String,
}

impl Recorded {
    fn json(&self) -> Value {
        serde_json::from_str(&self.body).unwrap()
    }
}

struct Route {
    method: Method,
    path: String,
    status: StatusCode,
    body: Value,
    headers: Vec<(&'static str, String)>,
}

#[derive(Default)]
struct MockProvider {
    routes: Vec<Route>,
    requests: Mutex<Vec<Recorded>>,
}

impl MockProvider {
    fn on(mut self, method: Method, path: &str, body: Value) -> Self {
        self.routes.push(Route {
            method,
            path: path.to_string(),
            status: StatusCode::OK,
            body,
            headers: Vec::new(),
        });
        self
    }

    fn on_status(self, method: Method, path: &str, status: StatusCode, body: Value) -> Self {
        let mut provider = self.on(method, path, body);
        provider.routes.last_mut().unwrap().status = status;
        provider
    }

    fn with_header(mut self, name: &'static str, value: &str) -> Self {
        self.routes.last_mut().unwrap().headers.push((name, value.to_string()));
        self
    }

    fn requests(&self) -> Vec<Recorded> {
        self.requests.lock().unwrap().clone()
    }

    fn request(&self, method: Method, path: &str) -> Recorded {
        self.requests()
            .into_iter()
            .find(|r| r.method == method && r.path == path)
            .unwrap_or_else(|| panic!("no {method} {path} in {:?}", self.requests()))
    }
}

fn decode(raw: &str) -> String {
    urlencoding::decode(raw).map(|s| s.into_owned()).unwrap_or_else(|_| raw.to_string())
}

async fn respond(
    State(mock): State<Arc<MockProvider>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> Response {
    let path = decode(uri.path());
    mock.requests.lock().unwrap().push(Recorded {
        method: method.clone(),
        path: path.clone(),
        query: decode(uri.query().unwrap_or_default()),
        authorization: headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        body,
    });

    let Some(route) = mock.routes.iter().find(|r| r.method == method && r.path == path) else {
        return (StatusCode::NOT_FOUND, Json(json!({ "error": { "message": "no route" } }))).into_response();
    };
    let mut response = if route.status == StatusCode::NO_CONTENT {
        route.status.into_response()
    } else {
        (route.status, Json(route.body.clone())).into_response()
    };
    for (name, value) in &route.headers {
        response.headers_mut().insert(
            HeaderName::from_static(name),
            HeaderValue::from_str(value).unwrap(),
        );
    }
    response
}

async fn spawn(mock: MockProvider) -> (String, Arc<MockProvider>) {
    let mock = Arc::new(mock);
    let app = Router::new().fallback(respond).with_state(Arc::clone(&mock));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), mock)
}

fn app() -> OAuthApp {
    OAuthApp {
        client_id: "client-id".into(),
        client_secret: "client-secret".into(),
    }
}

fn redirect() -> String {
    "https://portal.example/api/v1/integrations/oauth/test/callback".into()
}

fn row(pairs: &[(&str, Value)]) -> ExternalRow {
    pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// Google Sheets
// ---------------------------------------------------------------------------

#[tokio::test]
async fn google_sheets_reads_rows_with_bearer_token() {
    let (base, mock) = spawn(MockProvider::default().on(
        Method::GET,
        "/v4/spreadsheets/file-1/values/Units",
        json!({ "values": [["Address", "Price"], ["1 Oak Road", "250000"], ["2 Oak Road"]] }),
    ))
    .await;
    let sheets = GoogleSheetsAdapter::new(app(), redirect(), Some("at-1".into())).with_base_url(&base);

    let rows = sheets.rows("file-1", "Units").await.unwrap();

    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["Price"], json!("250000"));
    assert_eq!(rows[1]["Price"], Value::Null);
    let request = mock.request(Method::GET, "/v4/spreadsheets/file-1/values/Units");
    assert_eq!(request.authorization.as_deref(), Some("Bearer at-1"));
}

#[tokio::test]
async fn google_sheets_batches_cell_writes() {
    let (base, mock) = spawn(MockProvider::default().on(
        Method::POST,
        "/v4/spreadsheets/file-1/values:batchUpdate",
        json!({}),
    ))
    .await;
    let sheets = GoogleSheetsAdapter::new(app(), redirect(), Some("at-1".into())).with_base_url(&base);

    let updates = vec![
        CellUpdate { row: 2, col: 1, value: "260000".into() },
        CellUpdate { row: 2, col: 27, value: "Yes".into() },
    ];
    sheets.batch_update("file-1", "Units", &updates).await.unwrap();

    let body = mock
        .request(Method::POST, "/v4/spreadsheets/file-1/values:batchUpdate")
        .json();
    assert_eq!(body["valueInputOption"], "USER_ENTERED");
    assert_eq!(body["data"][0], json!({ "range": "Units!B3", "values": [["260000"]] }));
    assert_eq!(body["data"][1]["range"], "Units!AB3");
}

#[tokio::test]
async fn google_sheets_appends_header_after_last_column() {
    let (base, mock) = spawn(
        MockProvider::default()
            .on(
                Method::GET,
                "/v4/spreadsheets/file-1/values/Units!1:1",
                json!({ "values": [["Address", "Price"]] }),
            )
            .on(Method::PUT, "/v4/spreadsheets/file-1/values/Units!C1", json!({})),
    )
    .await;
    let sheets = GoogleSheetsAdapter::new(app(), redirect(), Some("at-1".into())).with_base_url(&base);

    sheets.add_column("file-1", "Units", "OH: App Active").await.unwrap();

    let request = mock.request(Method::PUT, "/v4/spreadsheets/file-1/values/Units!C1");
    assert_eq!(request.query, "valueInputOption=USER_ENTERED");
    assert_eq!(request.json(), json!({ "values": [["OH: App Active"]] }));
}

#[tokio::test]
async fn google_refresh_keeps_refresh_token() {
    let (base, mock) = spawn(MockProvider::default().on(
        Method::POST,
        "/token",
        json!({ "access_token": "at-2", "expires_in": 3600, "token_type": "Bearer" }),
    ))
    .await;
    let sheets = GoogleSheetsAdapter::new(app(), redirect(), None).with_base_url(&base);

    let tokens = sheets.refresh_token("rt-1").await.unwrap();

    assert_eq!(tokens.access_token, "at-2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
    let expires_at = tokens.expires_at.unwrap();
    assert!(expires_at > Utc::now() + Duration::minutes(55));
    let form = mock.request(Method::POST, "/token").body;
    assert!(form.contains("grant_type=refresh_token"));
    assert!(form.contains("refresh_token=rt-1"));
}

#[tokio::test]
async fn token_endpoint_errors_carry_description() {
    let (base, _mock) = spawn(MockProvider::default().on_status(
        Method::POST,
        "/token",
        StatusCode::BAD_REQUEST,
        json!({ "error": "invalid_grant", "error_description": "Token has been revoked." }),
    ))
    .await;
    let sheets = GoogleSheetsAdapter::new(app(), redirect(), None).with_base_url(&base);

    let err = sheets.exchange_code("code-1").await.unwrap_err();
    assert_matches!(err, ProviderError::Api { status: 400, ref message, .. } if message == "Token has been revoked.");
}

// ---------------------------------------------------------------------------
// Microsoft Graph workbooks
// ---------------------------------------------------------------------------

#[tokio::test]
async fn graph_writes_one_range_per_row() {
    let sheet_path = "/me/drive/items/item-9/workbook/worksheets/Plot List";
    let (base, mock) = spawn(
        MockProvider::default()
            .on(Method::PATCH, &format!("{sheet_path}/range(address='B2:D2')"), json!({}))
            .on(Method::PATCH, &format!("{sheet_path}/range(address='A4:A4')"), json!({})),
    )
    .await;
    let graph = GraphWorkbookAdapter::new(app(), redirect(), Some("at-1".into())).with_base_url(&base);

    let updates = vec![
        CellUpdate { row: 1, col: 1, value: "x".into() },
        CellUpdate { row: 1, col: 3, value: "y".into() },
        CellUpdate { row: 3, col: 0, value: "z".into() },
    ];
    graph.batch_update("item-9", "Plot List", &updates).await.unwrap();

    let first = mock.request(Method::PATCH, &format!("{sheet_path}/range(address='B2:D2')"));
    assert_eq!(first.json(), json!({ "values": [["x", null, "y"]] }));
    assert_eq!(mock.requests().len(), 2);
}

#[tokio::test]
async fn graph_headers_trim_trailing_blanks() {
    let sheet_path = "/me/drive/items/item-9/workbook/worksheets/Sheet1";
    let (base, _mock) = spawn(MockProvider::default().on(
        Method::GET,
        &format!("{sheet_path}/range(address='1:1')"),
        json!({ "values": [["Plot", "Address", "", ""]] }),
    ))
    .await;
    let graph = GraphWorkbookAdapter::new(app(), redirect(), Some("at-1".into())).with_base_url(&base);

    let headers = graph.headers("item-9", "Sheet1").await.unwrap();
    assert_eq!(headers, vec!["Plot", "Address"]);
}

// ---------------------------------------------------------------------------
// HubSpot
// ---------------------------------------------------------------------------

#[tokio::test]
async fn hubspot_changed_records_search_by_modified_date() {
    let (base, mock) = spawn(MockProvider::default().on(
        Method::POST,
        "/crm/v3/objects/contacts/search",
        json!({
            "results": [{
                "id": "101",
                "properties": { "firstname": "Ann", "address": "3 Elm Close" }
            }]
        }),
    ))
    .await;
    let hubspot = HubSpotAdapter::new(app(), redirect(), Some("at-1".into())).with_base_url(&base);
    let since = Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap();

    let records = hubspot.changed_records("contacts", since).await.unwrap();

    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "101");
    assert_eq!(records[0].fields["address"], json!("3 Elm Close"));
    let body = mock.request(Method::POST, "/crm/v3/objects/contacts/search").json();
    let filter = &body["filterGroups"][0]["filters"][0];
    assert_eq!(filter["propertyName"], "hs_lastmodifieddate");
    assert_eq!(filter["operator"], "GTE");
    assert_eq!(filter["value"], json!(since.timestamp_millis().to_string()));
    assert_eq!(body["sorts"][0]["direction"], "ASCENDING");
}

#[tokio::test]
async fn hubspot_update_surfaces_provider_message() {
    let (base, mock) = spawn(MockProvider::default().on_status(
        Method::PATCH,
        "/crm/v3/objects/contacts/101",
        StatusCode::BAD_REQUEST,
        json!({ "status": "error", "message": "Property \"plot\" does not exist" }),
    ))
    .await;
    let hubspot = HubSpotAdapter::new(app(), redirect(), Some("at-1".into())).with_base_url(&base);

    let err = hubspot
        .update_record("contacts", "101", &row(&[("plot", json!("12"))]))
        .await
        .unwrap_err();

    assert_matches!(
        err,
        ProviderError::Api { provider: "HubSpot", status: 400, ref message } if message == "Property \"plot\" does not exist"
    );
    let body = mock.request(Method::PATCH, "/crm/v3/objects/contacts/101").json();
    assert_eq!(body, json!({ "properties": { "plot": "12" } }));
}

// ---------------------------------------------------------------------------
// Salesforce
// ---------------------------------------------------------------------------

#[tokio::test]
async fn salesforce_query_selects_described_fields() {
    let (base, mock) = spawn(
        MockProvider::default()
            .on(
                Method::GET,
                "/services/data/v59.0/sobjects/Contact/describe/",
                json!({
                    "fields": [
                        { "name": "Id", "label": "Contact ID", "type": "id", "nillable": false, "defaultedOnCreate": true },
                        { "name": "LastName", "label": "Last Name", "type": "string", "nillable": false },
                        { "name": "MailingAddress", "label": "Mailing Address", "type": "address" }
                    ]
                }),
            )
            .on(
                Method::GET,
                "/services/data/v59.0/query",
                json!({
                    "records": [{
                        "attributes": { "type": "Contact" },
                        "Id": "003A",
                        "LastName": "O'Brien"
                    }]
                }),
            ),
    )
    .await;
    let salesforce = SalesforceAdapter::new(app(), redirect(), None, Some("at-1".into())).with_base_url(&base);

    let records = salesforce
        .query("Contact", &[QueryFilter::new("LastName", "contains", "O'Brien")])
        .await
        .unwrap();

    assert_eq!(records[0].id, "003A");
    assert!(!records[0].fields.contains_key("attributes"));
    let query = mock.request(Method::GET, "/services/data/v59.0/query").query;
    assert_eq!(
        query,
        "q=SELECT Id, LastName FROM Contact WHERE LastName LIKE '%O\\'Brien%' LIMIT 2000"
    );
}

#[tokio::test]
async fn salesforce_describe_marks_required_fields() {
    let (base, _mock) = spawn(MockProvider::default().on(
        Method::GET,
        "/services/data/v59.0/sobjects/Opportunity/describe/",
        json!({
            "fields": [
                { "name": "StageName", "label": "Stage", "type": "picklist", "nillable": false,
                  "picklistValues": [{ "value": "Reserved" }, { "value": "Completed" }] },
                { "name": "OwnerId", "label": "Owner", "type": "reference", "nillable": false, "defaultedOnCreate": true },
                { "name": "Description", "label": "Description", "type": "textarea", "nillable": true }
            ]
        }),
    ))
    .await;
    let salesforce = SalesforceAdapter::new(app(), redirect(), Some(base), Some("at-1".into()));

    let fields = salesforce.object_fields("Opportunity").await.unwrap();

    let required: Vec<&str> = fields.iter().filter(|f| f.required).map(|f| f.name.as_str()).collect();
    assert_eq!(required, vec!["StageName"]);
    assert_eq!(fields[0].picklist_values, vec!["Reserved", "Completed"]);
}

#[tokio::test]
async fn salesforce_refresh_keeps_instance_and_refresh_token() {
    let (base, _mock) = spawn(MockProvider::default().on(
        Method::POST,
        "/services/oauth2/token",
        json!({ "access_token": "at-2" }),
    ))
    .await;
    let salesforce = SalesforceAdapter::new(
        app(),
        redirect(),
        Some("https://acme.my.salesforce.com".into()),
        Some("at-1".into()),
    )
    .with_login_url(&base);

    let tokens = salesforce.refresh_token("rt-1").await.unwrap();

    assert_eq!(tokens.access_token, "at-2");
    assert_eq!(tokens.refresh_token.as_deref(), Some("rt-1"));
    assert_eq!(tokens.instance_url.as_deref(), Some("https://acme.my.salesforce.com"));
    assert!(tokens.expires_at.unwrap() > Utc::now() + Duration::minutes(115));
}

// ---------------------------------------------------------------------------
// Dynamics 365
// ---------------------------------------------------------------------------

#[tokio::test]
async fn dynamics_create_reads_entity_id_header() {
    let (base, mock) = spawn(
        MockProvider::default()
            .on_status(Method::POST, "/api/data/v9.2/contacts", StatusCode::NO_CONTENT, Value::Null)
            .with_header(
                "odata-entityid",
                "https://org.crm.dynamics.com/api/data/v9.2/contacts(7d1c-42aa)",
            ),
    )
    .await;
    let dynamics = DynamicsAdapter::new(app(), redirect(), None, Some("at-1".into())).with_base_url(&base);

    let id = dynamics
        .create_record("contacts", &row(&[("lastname", json!("Walsh"))]))
        .await
        .unwrap();

    assert_eq!(id, "7d1c-42aa");
    assert_eq!(
        mock.request(Method::POST, "/api/data/v9.2/contacts").json(),
        json!({ "lastname": "Walsh" })
    );
}

#[tokio::test]
async fn dynamics_query_builds_odata_filter() {
    let (base, mock) = spawn(MockProvider::default().on(
        Method::GET,
        "/api/data/v9.2/contacts",
        json!({
            "value": [{
                "@odata.etag": "W/\"1\"",
                "address1_addressid": "a-9",
                "contactid": "c-1",
                "lastname": "Walsh",
                "_parentcustomerid_value": "acc-1"
            }]
        }),
    ))
    .await;
    let dynamics = DynamicsAdapter::new(app(), redirect(), Some(base), Some("at-1".into()));

    let records = dynamics
        .query("contacts", &[QueryFilter::new("lastname", "=", "Walsh")])
        .await
        .unwrap();

    assert_eq!(records[0].id, "c-1");
    assert!(!records[0].fields.contains_key("@odata.etag"));
    let query = mock.request(Method::GET, "/api/data/v9.2/contacts").query;
    assert_eq!(query, "$filter=lastname eq 'Walsh'&$top=5000");
}

#[tokio::test]
async fn dynamics_requires_organisation_url() {
    let dynamics = DynamicsAdapter::new(app(), redirect(), None, Some("at-1".into()));
    let err = dynamics.query("contacts", &[]).await.unwrap_err();
    assert_matches!(err, ProviderError::NotConfigured { provider: "Dynamics 365", .. });
}
