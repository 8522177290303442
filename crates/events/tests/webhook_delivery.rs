//! Webhook delivery against a local HTTP endpoint.

use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use assert_matches::assert_matches;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::post;
use axum::Router;
use chrono::Utc;
use openhouse_core::types::DbId;
use openhouse_core::webhooks::{verify_signature, DELIVERY_TIMEOUT_SECS};
use openhouse_db::models::webhook::Webhook;
use openhouse_events::{
    EventBus, InMemoryWebhookStore, PlatformEvent, WebhookDispatcher, WebhookRouter, WebhookStore,
};
use serde_json::json;

// ---------------------------------------------------------------------------
// Local receiver
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct Received {
    headers: HeaderMap,
    body: String,
}

struct Receiver {
    status: AtomicU16,
    delay: Mutex<Option<Duration>>,
    requests: Mutex<Vec<Received>>,
}

impl Receiver {
    fn requests(&self) -> Vec<Received> {
        self.requests.lock().unwrap().clone()
    }
}

async fn receive(State(rx): State<Arc<Receiver>>, headers: HeaderMap, body: String) -> (StatusCode, String) {
    let delay = *rx.delay.lock().unwrap();
    if let Some(delay) = delay {
        tokio::time::sleep(delay).await;
    }
    rx.requests.lock().unwrap().push(Received { headers, body });
    let status = StatusCode::from_u16(rx.status.load(Ordering::SeqCst)).unwrap();
    (status, format!("status {}", status.as_u16()))
}

async fn spawn_receiver(status: u16) -> (String, Arc<Receiver>) {
    let rx = Arc::new(Receiver {
        status: AtomicU16::new(status),
        delay: Mutex::new(None),
        requests: Mutex::new(Vec::new()),
    });
    let app = Router::new().route("/hook", post(receive)).with_state(Arc::clone(&rx));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/hook"), rx)
}

fn webhook(tenant_id: DbId, url: &str, max_failures: i32) -> Webhook {
    Webhook {
        id: DbId::new_v4(),
        tenant_id,
        url: url.to_string(),
        secret: "whsec_test".into(),
        events: vec!["unit.updated".into(), "sync.completed".into()],
        development_ids: None,
        is_active: true,
        consecutive_failures: 0,
        max_failures,
        last_failure_reason: None,
        last_triggered_at: None,
        created_at: Utc::now(),
        updated_at: Utc::now(),
    }
}

fn setup() -> (Arc<InMemoryWebhookStore>, WebhookDispatcher) {
    let store = Arc::new(InMemoryWebhookStore::new());
    let dispatcher = WebhookDispatcher::new(store.clone() as Arc<dyn WebhookStore>);
    (store, dispatcher)
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

#[tokio::test]
async fn delivers_signed_envelope() {
    let (url, rx) = spawn_receiver(200).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    let hook = webhook(tenant, &url, 10);
    store.insert_webhook(hook.clone());

    let summary = dispatcher
        .dispatch(tenant, "unit.updated", &json!({"unit_id": "u1", "field": "status"}))
        .await
        .unwrap();
    assert_eq!(summary.delivered, 1);

    let requests = rx.requests();
    assert_eq!(requests.len(), 1);
    let request = &requests[0];
    let signature = request.headers["x-openhouse-signature"].to_str().unwrap();
    assert!(verify_signature("whsec_test", &request.body, signature));
    assert_eq!(request.headers["x-openhouse-event"], "unit.updated");

    let envelope: serde_json::Value = serde_json::from_str(&request.body).unwrap();
    assert_eq!(envelope["event"], "unit.updated");
    assert_eq!(envelope["data"]["unit_id"], "u1");
    assert!(envelope["timestamp"].as_str().unwrap().ends_with('Z'));

    let deliveries = store.deliveries();
    assert_eq!(deliveries[0].status, "delivered");
    assert_eq!(deliveries[0].http_status, Some(200));
    assert_eq!(
        request.headers["x-openhouse-delivery"].to_str().unwrap(),
        deliveries[0].id.to_string()
    );
    assert!(store.webhook(hook.id).unwrap().last_triggered_at.is_some());
    assert!(store
        .audit_entries()
        .iter()
        .any(|e| e.action == "webhook.delivered"));
}

#[tokio::test]
async fn unsubscribed_and_foreign_tenants_are_skipped() {
    let (url, rx) = spawn_receiver(200).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    store.insert_webhook(webhook(tenant, &url, 10));

    let other = dispatcher
        .dispatch(DbId::new_v4(), "unit.updated", &json!({}))
        .await
        .unwrap();
    let unsubscribed = dispatcher
        .dispatch(tenant, "integration.connected", &json!({}))
        .await
        .unwrap();

    assert_eq!(other.attempted, 0);
    assert_eq!(unsubscribed.attempted, 0);
    assert!(rx.requests().is_empty());
}

#[tokio::test]
async fn development_allow_list_filters_payloads() {
    let (url, rx) = spawn_receiver(200).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    let allowed = DbId::new_v4();
    let mut hook = webhook(tenant, &url, 10);
    hook.development_ids = Some(vec![allowed]);
    store.insert_webhook(hook);

    let skipped = dispatcher
        .dispatch(tenant, "unit.updated", &json!({"development_id": DbId::new_v4()}))
        .await
        .unwrap();
    let sent = dispatcher
        .dispatch(tenant, "unit.updated", &json!({"development_id": allowed}))
        .await
        .unwrap();
    let unscoped = dispatcher
        .dispatch(tenant, "unit.updated", &json!({"unit_id": "u1"}))
        .await
        .unwrap();

    assert_eq!(skipped.attempted, 0);
    assert_eq!(sent.delivered, 1);
    assert_eq!(unscoped.delivered, 1);
    assert_eq!(rx.requests().len(), 2);
}

// ---------------------------------------------------------------------------
// Failures and retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_2xx_schedules_retry_with_backoff() {
    let (url, _rx) = spawn_receiver(500).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    let hook = webhook(tenant, &url, 10);
    store.insert_webhook(hook.clone());

    let summary = dispatcher
        .dispatch(tenant, "unit.updated", &json!({}))
        .await
        .unwrap();
    assert_eq!(summary.retry_scheduled, 1);

    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.status, "pending");
    assert_eq!(delivery.http_status, Some(500));
    assert_eq!(delivery.response_body.as_deref(), Some("status 500"));
    let wait = delivery.next_retry_at.unwrap() - Utc::now();
    assert!(wait.num_seconds() > 100 && wait.num_seconds() <= 120);

    let stored = store.webhook(hook.id).unwrap();
    assert_eq!(stored.consecutive_failures, 1);
    assert_eq!(stored.last_failure_reason.as_deref(), Some("Webhook returned HTTP 500"));
    assert!(stored.is_active);
}

#[tokio::test]
async fn retry_sweep_delivers_and_resets_failures() {
    let (url, rx) = spawn_receiver(503).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    let hook = webhook(tenant, &url, 10);
    store.insert_webhook(hook.clone());

    dispatcher.dispatch(tenant, "unit.updated", &json!({"n": 1})).await.unwrap();

    // Not yet due.
    assert_eq!(dispatcher.retry_due().await.unwrap().attempted, 0);

    rx.status.store(200, Ordering::SeqCst);
    store.make_retries_due();
    let summary = dispatcher.retry_due().await.unwrap();
    assert_eq!(summary.delivered, 1);

    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.status, "delivered");
    assert_eq!(delivery.attempt_number, 2);
    assert!(delivery.next_retry_at.is_none());
    assert_eq!(store.webhook(hook.id).unwrap().consecutive_failures, 0);

    let second: serde_json::Value = serde_json::from_str(&rx.requests()[1].body).unwrap();
    assert_eq!(second["data"]["n"], 1);
}

#[tokio::test]
async fn circuit_breaker_disables_webhook() {
    let (url, rx) = spawn_receiver(500).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    let hook = webhook(tenant, &url, 2);
    store.insert_webhook(hook.clone());

    let first = dispatcher.dispatch(tenant, "unit.updated", &json!({})).await.unwrap();
    let second = dispatcher.dispatch(tenant, "unit.updated", &json!({})).await.unwrap();
    assert_eq!(first.retry_scheduled, 1);
    // The failure that trips the breaker is terminal.
    assert_eq!(second.failed, 1);

    let stored = store.webhook(hook.id).unwrap();
    assert!(!stored.is_active);
    assert_eq!(stored.consecutive_failures, 2);
    assert!(store
        .audit_entries()
        .iter()
        .any(|e| e.action == "webhook.disabled"));

    // Disabled webhooks receive nothing new, and their queued retries are abandoned.
    let third = dispatcher.dispatch(tenant, "unit.updated", &json!({})).await.unwrap();
    assert_eq!(third.attempted, 0);

    store.make_retries_due();
    let sweep = dispatcher.retry_due().await.unwrap();
    assert_eq!(sweep.failed, 1);
    assert!(store.deliveries().iter().all(|d| d.status == "failed"));
    assert_eq!(rx.requests().len(), 2);
}

#[tokio::test]
async fn final_attempt_is_terminal() {
    let (url, _rx) = spawn_receiver(500).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    store.insert_webhook(webhook(tenant, &url, 100));

    dispatcher.dispatch(tenant, "unit.updated", &json!({})).await.unwrap();
    let delivery_id = store.deliveries()[0].id;
    // Move to attempt 7 so the next retry is attempt 8.
    for _ in 0..6 {
        store.increment_attempt(delivery_id).await.unwrap();
    }

    store.make_retries_due();
    let summary = dispatcher.retry_due().await.unwrap();
    assert_eq!(summary.failed, 1);

    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.attempt_number, 8);
    assert_eq!(delivery.status, "failed");
    assert!(delivery.next_retry_at.is_none());
}

#[tokio::test]
async fn unattempted_delivery_is_recovered_after_its_lease() {
    let (url, rx) = spawn_receiver(200).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    let hook = webhook(tenant, &url, 10);
    store.insert_webhook(hook.clone());

    // Recorded, then the process went away before the first attempt.
    let delivery = store
        .create_delivery(hook.id, "unit.updated", &json!({"n": 7}))
        .await
        .unwrap();
    let lease = delivery.next_retry_at.unwrap() - Utc::now();
    assert!(lease.num_seconds() > DELIVERY_TIMEOUT_SECS as i64);

    // Still leased.
    assert_eq!(dispatcher.retry_due().await.unwrap().attempted, 0);

    store.make_retries_due();
    let summary = dispatcher.retry_due().await.unwrap();
    assert_eq!(summary.delivered, 1);

    let stored = &store.deliveries()[0];
    assert_eq!(stored.status, "delivered");
    assert_eq!(stored.attempt_number, 2);
    assert!(stored.next_retry_at.is_none());
    let envelope: serde_json::Value = serde_json::from_str(&rx.requests()[0].body).unwrap();
    assert_eq!(envelope["data"]["n"], 7);
}

#[tokio::test]
async fn store_error_for_one_webhook_does_not_block_the_rest() {
    let (url, rx) = spawn_receiver(200).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    let broken = webhook(tenant, &url, 10);
    let healthy = webhook(tenant, &url, 10);
    store.insert_webhook(broken.clone());
    store.insert_webhook(healthy.clone());
    store.fail_deliveries(broken.id);

    let summary = dispatcher
        .dispatch(tenant, "unit.updated", &json!({}))
        .await
        .unwrap();

    assert_eq!(summary.attempted, 1);
    assert_eq!(summary.delivered, 1);
    assert_eq!(rx.requests().len(), 1);
    let deliveries = store.deliveries();
    assert_eq!(deliveries.len(), 1);
    assert_eq!(deliveries[0].webhook_id, healthy.id);
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let (url, rx) = spawn_receiver(200).await;
    *rx.delay.lock().unwrap() = Some(Duration::from_millis(500));
    let store = Arc::new(InMemoryWebhookStore::new());
    let dispatcher = WebhookDispatcher::with_timeout(
        store.clone() as Arc<dyn WebhookStore>,
        Duration::from_millis(100),
    );
    let tenant = DbId::new_v4();
    store.insert_webhook(webhook(tenant, &url, 10));

    let summary = dispatcher.dispatch(tenant, "unit.updated", &json!({})).await.unwrap();
    assert_eq!(summary.retry_scheduled, 1);

    let delivery = &store.deliveries()[0];
    assert_eq!(delivery.status, "pending");
    assert!(delivery.http_status.is_none());
    assert_matches!(delivery.response_body.as_deref(), Some(body) if body.contains("timed out"));
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

#[tokio::test]
async fn router_forwards_tenant_events() {
    let (url, rx) = spawn_receiver(200).await;
    let (store, dispatcher) = setup();
    let tenant = DbId::new_v4();
    store.insert_webhook(webhook(tenant, &url, 10));

    let bus = EventBus::default();
    tokio::spawn(WebhookRouter::run(Arc::new(dispatcher), bus.subscribe()));

    bus.publish(PlatformEvent::new("sync.completed"));
    bus.publish(
        PlatformEvent::new("sync.completed")
            .for_tenant(tenant)
            .with_payload(json!({"records_updated": 4})),
    );

    let mut delivered = Vec::new();
    for _ in 0..50 {
        delivered = rx.requests();
        if !delivered.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(delivered.len(), 1);
    let envelope: serde_json::Value = serde_json::from_str(&delivered[0].body).unwrap();
    assert_eq!(envelope["event"], "sync.completed");
    assert_eq!(envelope["data"]["records_updated"], 4);
}
