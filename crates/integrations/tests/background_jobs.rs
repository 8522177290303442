//! Enrichment, token refresh and the job worker.

mod common;

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};
use common::{row, tokens, Harness};
use openhouse_core::audit::actions;
use openhouse_core::integration::IntegrationType;
use openhouse_db::models::unit::UnitMetrics;
use openhouse_integrations::adapters::OAuthTokens;
use openhouse_integrations::enrichment::{APP_ACTIVE, COMPLIANCE_PERCENT, ENRICHMENT_COLUMNS, QUESTIONS_ASKED};
use openhouse_integrations::token_refresh::REFRESH_FAILED_MESSAGE;
use openhouse_integrations::{ChangeEvent, EnrichmentSummary, OutboundSyncHandle, OutboundWorker, RefreshSummary};
use serde_json::json;
use tokio_util::sync::CancellationToken;

// ---------------------------------------------------------------------------
// Enrichment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn enrichment_adds_columns_and_writes_each_unit() {
    let h = Harness::new();
    let integration = h.sheet_integration();
    let oak = h.unit("1 Oak Road", None);
    h.unit("2 Oak Road", None);
    h.store.set_metrics(
        oak.id,
        UnitMetrics {
            message_count: 4,
            questions_asked: 3,
            last_active_at: Some(Utc::now()),
            required_documents: 4,
            completed_documents: 1,
        },
    );
    h.sheet().set_sheet(
        &["Property Address", "Purchaser"],
        vec![
            row(&[("Property Address", "2 Oak Road"), ("Purchaser", "B")]),
            row(&[("Property Address", "1 Oak Road"), ("Purchaser", "A")]),
        ],
    );

    let summary = h.enrichment().enrich(integration.id).await.unwrap();

    assert_eq!(
        summary,
        EnrichmentSummary {
            columns_added: ENRICHMENT_COLUMNS.len(),
            units_enriched: 2,
            units_failed: 0,
            cells_written: 2 * ENRICHMENT_COLUMNS.len(),
        }
    );
    assert_eq!(h.sheet().state().added_columns, ENRICHMENT_COLUMNS);

    let batches = h.sheet().batches();
    assert_eq!(batches.len(), 1);
    let cell = |row: usize, header: &str| {
        let col = 2 + ENRICHMENT_COLUMNS.iter().position(|c| *c == header).unwrap();
        batches[0]
            .iter()
            .find(|u| u.row == row && u.col == col)
            .map(|u| u.value.clone())
    };
    // "1 Oak Road" is the second data row.
    assert_eq!(cell(2, APP_ACTIVE).as_deref(), Some("Yes"));
    assert_eq!(cell(2, QUESTIONS_ASKED).as_deref(), Some("3"));
    assert_eq!(cell(2, COMPLIANCE_PERCENT).as_deref(), Some("25%"));
    assert_eq!(cell(1, APP_ACTIVE).as_deref(), Some("No"));

    let audit = h.store.audit_entries();
    assert_eq!(audit.last().unwrap().action, actions::ENRICHMENT_SYNCED);
    assert_eq!(audit.last().unwrap().details["units_enriched"], 2);
}

#[tokio::test]
async fn enrichment_reuses_existing_columns() {
    let h = Harness::new();
    let integration = h.sheet_integration();
    h.unit("1 Oak Road", None);
    let mut headers = vec!["Address"];
    headers.extend_from_slice(ENRICHMENT_COLUMNS);
    h.sheet()
        .set_sheet(&headers, vec![row(&[("Address", "1 Oak Road")])]);

    let summary = h.enrichment().enrich(integration.id).await.unwrap();

    assert_eq!(summary.columns_added, 0);
    assert_eq!(summary.units_enriched, 1);
    assert!(h.sheet().state().added_columns.is_empty());
}

#[tokio::test]
async fn enrichment_isolates_unit_failures() {
    let h = Harness::new();
    let integration = h.sheet_integration();
    let broken = h.unit("1 Oak Road", None);
    h.unit("2 Oak Road", None);
    h.store.fail_metrics(broken.id);
    h.sheet().set_sheet(
        &["Address"],
        vec![row(&[("Address", "1 Oak Road")]), row(&[("Address", "2 Oak Road")])],
    );

    let summary = h.enrichment().enrich(integration.id).await.unwrap();

    assert_eq!(summary.units_failed, 1);
    assert_eq!(summary.units_enriched, 1);
    assert!(h.sheet().batches()[0].iter().all(|u| u.row == 2));
}

#[tokio::test]
async fn enrichment_skips_crm_integrations() {
    let h = Harness::new();
    let integration = h.integration(IntegrationType::Salesforce, Some("Opportunity"), &tokens("at-1", Duration::hours(2)));
    h.unit("1 Oak Road", None);

    let summary = h.enrichment().enrich(integration.id).await.unwrap();

    assert_eq!(summary, EnrichmentSummary::default());
    assert!(h.adapters.seen_tokens.lock().unwrap().is_empty());
}

#[tokio::test]
async fn enrichment_failure_is_audited() {
    let h = Harness::new();
    let integration = h.sheet_integration();
    h.sheet().state().fail_reads = true;

    assert!(h.enrichment().enrich(integration.id).await.is_err());
    let audit = h.store.audit_entries();
    assert_eq!(audit[0].action, actions::ENRICHMENT_FAILED);
}

// ---------------------------------------------------------------------------
// Token refresh
// ---------------------------------------------------------------------------

#[tokio::test]
async fn expiring_tokens_are_refreshed_and_reencrypted() {
    let h = Harness::new();
    let integration = h.integration(
        IntegrationType::GoogleSheets,
        Some("file-1"),
        &tokens("at-1", Duration::minutes(10)),
    );
    h.sheet().state().refreshed_access = Some("at-2".into());

    let summary = h.refresher().run_once().await.unwrap();

    assert_eq!(
        summary,
        RefreshSummary {
            refreshed: 1,
            failed: 0,
            skipped: 0
        }
    );
    assert_eq!(h.sheet().state().refresh_calls, vec!["rt-1"]);
    let stored = h.store.get_integration(integration.id).unwrap();
    assert_ne!(stored.credentials, integration.credentials);
    let decrypted: OAuthTokens = h
        .vault
        .decrypt(h.tenant_id, stored.credentials.as_deref().unwrap())
        .unwrap();
    assert_eq!(decrypted.access_token, "at-2");
    assert_eq!(decrypted.refresh_token.as_deref(), Some("rt-1"));
    assert!(decrypted.expires_at.unwrap() > Utc::now() + Duration::minutes(50));

    let audit = h.store.audit_entries();
    assert_eq!(audit[0].action, actions::TOKEN_REFRESHED);
    assert_eq!(audit[0].details["provider"], "Fake Sheets");
}

#[tokio::test]
async fn fresh_tokens_and_tokens_without_refresh_are_skipped() {
    let h = Harness::new();
    h.integration(IntegrationType::GoogleSheets, Some("file-1"), &tokens("at-1", Duration::hours(3)));
    let no_refresh = OAuthTokens {
        refresh_token: None,
        ..tokens("at-3", Duration::minutes(5))
    };
    h.integration(IntegrationType::GoogleSheets, Some("file-2"), &no_refresh);
    let no_expiry = OAuthTokens {
        expires_at: None,
        ..tokens("at-4", Duration::zero())
    };
    h.integration(IntegrationType::HubSpot, None, &no_expiry);

    let summary = h.refresher().run_once().await.unwrap();

    assert_eq!(summary.skipped, 3);
    assert_eq!(summary.refreshed, 0);
    assert!(h.sheet().state().refresh_calls.is_empty());
}

#[tokio::test]
async fn rejected_refresh_puts_integration_in_error() {
    let h = Harness::new();
    let integration = h.integration(
        IntegrationType::GoogleSheets,
        Some("file-1"),
        &tokens("at-1", Duration::minutes(-5)),
    );

    let summary = h.refresher().run_once().await.unwrap();

    assert_eq!(summary.failed, 1);
    let stored = h.store.get_integration(integration.id).unwrap();
    assert_eq!(stored.status, "error");
    assert_eq!(stored.last_error.as_deref(), Some(REFRESH_FAILED_MESSAGE));
    assert_eq!(stored.credentials, integration.credentials);
    let audit = h.store.audit_entries();
    assert_eq!(audit[0].action, actions::TOKEN_REFRESH_FAILED);
    assert!(audit[0].details["error"].as_str().unwrap().contains("invalid_grant"));
}

#[tokio::test]
async fn undecryptable_credentials_count_as_failures() {
    let h = Harness::new();
    let mut integration = h.sheet_integration();
    integration.id = openhouse_core::types::DbId::new_v4();
    integration.credentials = Some("00:11:22".into());
    h.store.insert_integration(integration.clone());

    let summary = h.refresher().run_once().await.unwrap();

    assert_eq!(summary.failed, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(h.store.get_integration(integration.id).unwrap().status, "error");
}

#[tokio::test]
async fn threshold_is_configurable() {
    let h = Harness::new();
    h.integration(IntegrationType::GoogleSheets, Some("file-1"), &tokens("at-1", Duration::hours(3)));
    h.sheet().state().refreshed_access = Some("at-2".into());

    let summary = h
        .refresher()
        .with_threshold(Duration::hours(4))
        .run_once()
        .await
        .unwrap();

    assert_eq!(summary.refreshed, 1);
}

#[tokio::test]
async fn single_integration_refresh_on_demand() {
    let h = Harness::new();
    let integration = h.integration(
        IntegrationType::GoogleSheets,
        Some("file-1"),
        &tokens("at-1", Duration::minutes(1)),
    );
    h.sheet().state().refreshed_access = Some("at-2".into());

    let refreshed = h.refresher().refresh_integration(integration.id).await.unwrap();

    assert!(refreshed);
    assert!(h
        .refresher()
        .refresh_integration(openhouse_core::types::DbId::new_v4())
        .await
        .is_err());
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

#[tokio::test]
async fn worker_pushes_queued_changes_until_cancelled() {
    let h = Harness::new();
    let integration = h.sheet_integration();
    h.mapping(integration.id, "Address", ("units", "address"), "bidirectional");
    h.mapping(integration.id, "Price", ("unit_sales_pipeline", "sale_price"), "bidirectional");
    let unit = h.unit("1 Oak Road", None);
    h.sheet().set_sheet(
        &["Address", "Price"],
        vec![row(&[("Address", "1 Oak Road"), ("Price", "250000")])],
    );

    let (jobs, queue) = OutboundSyncHandle::channel(8);
    let worker = OutboundWorker::new(queue, Arc::new(h.engine()), Arc::new(h.enrichment()));
    let cancel = CancellationToken::new();
    let running = tokio::spawn(worker.run(cancel.clone()));

    jobs.trigger(ChangeEvent {
        tenant_id: h.tenant_id,
        development_id: h.development_id,
        table: "unit_sales_pipeline".into(),
        field: "sale_price".into(),
        record_id: unit.id,
        unit_identifier: Some("1 Oak Road".into()),
        old_value: json!("250000"),
        new_value: json!("260000"),
    });

    let mut written = false;
    for _ in 0..100 {
        if !h.sheet().batches().is_empty() {
            written = true;
            break;
        }
        tokio::time::sleep(StdDuration::from_millis(20)).await;
    }
    assert!(written, "worker never pushed the change");
    assert_eq!(h.sheet().batches()[0][0].value, "260000");

    cancel.cancel();
    tokio::time::timeout(StdDuration::from_secs(2), running)
        .await
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn worker_stops_when_handles_are_dropped() {
    let h = Harness::new();
    let (jobs, queue) = OutboundSyncHandle::channel(1);
    let worker = OutboundWorker::new(queue, Arc::new(h.engine()), Arc::new(h.enrichment()));
    drop(jobs);

    tokio::time::timeout(StdDuration::from_secs(2), worker.run(CancellationToken::new()))
        .await
        .unwrap();
}
