//! Persistence seam for webhook delivery.
//!
//! [`PgWebhookStore`] delegates to the repositories; [`InMemoryWebhookStore`]
//! keeps everything in process for tests and local tooling.

use std::collections::HashSet;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use openhouse_core::integration::DeliveryStatus;
use openhouse_core::types::DbId;
use openhouse_core::webhooks::DELIVERY_LEASE_SECS;
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::webhook::{Webhook, WebhookDelivery};
use openhouse_db::repositories::webhook_repo::FailureState;
use openhouse_db::repositories::{AuditLogRepo, WebhookRepo};
use openhouse_db::DbPool;

#[async_trait]
pub trait WebhookStore: Send + Sync {
    /// Active webhooks of the tenant subscribed to `event_type`.
    async fn subscribed(&self, tenant_id: DbId, event_type: &str) -> Result<Vec<Webhook>, sqlx::Error>;

    async fn find_webhook(&self, id: DbId) -> Result<Option<Webhook>, sqlx::Error>;

    async fn create_delivery(
        &self,
        webhook_id: DbId,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookDelivery, sqlx::Error>;

    async fn mark_delivered(&self, delivery_id: DbId, http_status: i16, body: &str) -> Result<(), sqlx::Error>;

    async fn mark_failed(
        &self,
        delivery_id: DbId,
        http_status: Option<i16>,
        body: Option<&str>,
    ) -> Result<(), sqlx::Error>;

    async fn schedule_retry(
        &self,
        delivery_id: DbId,
        http_status: Option<i16>,
        body: &str,
        delay_secs: i64,
    ) -> Result<(), sqlx::Error>;

    async fn record_success(&self, webhook_id: DbId) -> Result<(), sqlx::Error>;

    async fn record_failure(&self, webhook_id: DbId, reason: &str) -> Result<Option<FailureState>, sqlx::Error>;

    /// Pending deliveries whose retry time or attempt lease has passed.
    async fn due_deliveries(&self, limit: i64) -> Result<Vec<WebhookDelivery>, sqlx::Error>;

    /// Bump the attempt counter and renew the lease. Returns the new attempt
    /// number.
    async fn increment_attempt(&self, delivery_id: DbId) -> Result<i32, sqlx::Error>;

    /// Best-effort: failures are logged, never returned.
    async fn audit(&self, entry: NewAuditEntry);
}

// ---------------------------------------------------------------------------
// Postgres
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct PgWebhookStore {
    pool: DbPool,
}

impl PgWebhookStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WebhookStore for PgWebhookStore {
    async fn subscribed(&self, tenant_id: DbId, event_type: &str) -> Result<Vec<Webhook>, sqlx::Error> {
        WebhookRepo::list_subscribed(&self.pool, tenant_id, event_type).await
    }

    async fn find_webhook(&self, id: DbId) -> Result<Option<Webhook>, sqlx::Error> {
        WebhookRepo::find_by_id(&self.pool, id).await
    }

    async fn create_delivery(
        &self,
        webhook_id: DbId,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookDelivery, sqlx::Error> {
        WebhookRepo::create_delivery(&self.pool, webhook_id, event_type, payload).await
    }

    async fn mark_delivered(&self, delivery_id: DbId, http_status: i16, body: &str) -> Result<(), sqlx::Error> {
        WebhookRepo::mark_delivered(&self.pool, delivery_id, http_status, body).await
    }

    async fn mark_failed(
        &self,
        delivery_id: DbId,
        http_status: Option<i16>,
        body: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        WebhookRepo::mark_failed(&self.pool, delivery_id, http_status, body).await
    }

    async fn schedule_retry(
        &self,
        delivery_id: DbId,
        http_status: Option<i16>,
        body: &str,
        delay_secs: i64,
    ) -> Result<(), sqlx::Error> {
        WebhookRepo::schedule_retry(&self.pool, delivery_id, http_status, body, delay_secs).await
    }

    async fn record_success(&self, webhook_id: DbId) -> Result<(), sqlx::Error> {
        WebhookRepo::record_success(&self.pool, webhook_id).await
    }

    async fn record_failure(&self, webhook_id: DbId, reason: &str) -> Result<Option<FailureState>, sqlx::Error> {
        WebhookRepo::record_failure(&self.pool, webhook_id, reason).await
    }

    async fn due_deliveries(&self, limit: i64) -> Result<Vec<WebhookDelivery>, sqlx::Error> {
        WebhookRepo::list_due_deliveries(&self.pool, limit).await
    }

    async fn increment_attempt(&self, delivery_id: DbId) -> Result<i32, sqlx::Error> {
        WebhookRepo::increment_attempt(&self.pool, delivery_id).await
    }

    async fn audit(&self, entry: NewAuditEntry) {
        AuditLogRepo::record(&self.pool, entry).await;
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    webhooks: Vec<Webhook>,
    deliveries: Vec<WebhookDelivery>,
    failing_webhooks: HashSet<DbId>,
    audit: Vec<NewAuditEntry>,
}

/// Process-local store with the same semantics as the Postgres queries.
#[derive(Default)]
pub struct InMemoryWebhookStore {
    state: Mutex<MemoryState>,
}

impl InMemoryWebhookStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_webhook(&self, webhook: Webhook) {
        self.lock().webhooks.push(webhook);
    }

    pub fn webhook(&self, id: DbId) -> Option<Webhook> {
        self.lock().webhooks.iter().find(|w| w.id == id).cloned()
    }

    pub fn deliveries(&self) -> Vec<WebhookDelivery> {
        self.lock().deliveries.clone()
    }

    pub fn audit_entries(&self) -> Vec<NewAuditEntry> {
        self.lock().audit.clone()
    }

    /// Make creating deliveries for `webhook_id` fail.
    pub fn fail_deliveries(&self, webhook_id: DbId) {
        self.lock().failing_webhooks.insert(webhook_id);
    }

    /// Pull every scheduled retry and lease into the past so the next sweep picks it up.
    pub fn make_retries_due(&self) {
        let past = Utc::now() - Duration::seconds(1);
        for delivery in self.lock().deliveries.iter_mut() {
            if delivery.next_retry_at.is_some() {
                delivery.next_retry_at = Some(past);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn with_delivery(&self, id: DbId, f: impl FnOnce(&mut WebhookDelivery)) -> Result<(), sqlx::Error> {
        let mut state = self.lock();
        let delivery = state
            .deliveries
            .iter_mut()
            .find(|d| d.id == id)
            .ok_or(sqlx::Error::RowNotFound)?;
        f(delivery);
        Ok(())
    }
}

#[async_trait]
impl WebhookStore for InMemoryWebhookStore {
    async fn subscribed(&self, tenant_id: DbId, event_type: &str) -> Result<Vec<Webhook>, sqlx::Error> {
        Ok(self
            .lock()
            .webhooks
            .iter()
            .filter(|w| w.tenant_id == tenant_id && w.is_active && w.subscribes_to(event_type))
            .cloned()
            .collect())
    }

    async fn find_webhook(&self, id: DbId) -> Result<Option<Webhook>, sqlx::Error> {
        Ok(self.webhook(id))
    }

    async fn create_delivery(
        &self,
        webhook_id: DbId,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookDelivery, sqlx::Error> {
        if self.lock().failing_webhooks.contains(&webhook_id) {
            return Err(sqlx::Error::PoolTimedOut);
        }
        let delivery = WebhookDelivery {
            id: DbId::new_v4(),
            webhook_id,
            event_type: event_type.to_string(),
            payload: payload.clone(),
            status: DeliveryStatus::Pending.as_str().to_string(),
            http_status: None,
            response_body: None,
            attempt_number: 1,
            next_retry_at: Some(Utc::now() + Duration::seconds(DELIVERY_LEASE_SECS)),
            created_at: Utc::now(),
        };
        self.lock().deliveries.push(delivery.clone());
        Ok(delivery)
    }

    async fn mark_delivered(&self, delivery_id: DbId, http_status: i16, body: &str) -> Result<(), sqlx::Error> {
        self.with_delivery(delivery_id, |d| {
            d.status = DeliveryStatus::Delivered.as_str().to_string();
            d.http_status = Some(http_status);
            d.response_body = Some(body.to_string());
            d.next_retry_at = None;
        })
    }

    async fn mark_failed(
        &self,
        delivery_id: DbId,
        http_status: Option<i16>,
        body: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        self.with_delivery(delivery_id, |d| {
            d.status = DeliveryStatus::Failed.as_str().to_string();
            if http_status.is_some() {
                d.http_status = http_status;
            }
            if let Some(body) = body {
                d.response_body = Some(body.to_string());
            }
            d.next_retry_at = None;
        })
    }

    async fn schedule_retry(
        &self,
        delivery_id: DbId,
        http_status: Option<i16>,
        body: &str,
        delay_secs: i64,
    ) -> Result<(), sqlx::Error> {
        self.with_delivery(delivery_id, |d| {
            d.status = DeliveryStatus::Pending.as_str().to_string();
            d.http_status = http_status;
            d.response_body = Some(body.to_string());
            d.next_retry_at = Some(Utc::now() + Duration::seconds(delay_secs));
        })
    }

    async fn record_success(&self, webhook_id: DbId) -> Result<(), sqlx::Error> {
        let mut state = self.lock();
        if let Some(w) = state.webhooks.iter_mut().find(|w| w.id == webhook_id) {
            w.consecutive_failures = 0;
            w.last_failure_reason = None;
            w.last_triggered_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn record_failure(&self, webhook_id: DbId, reason: &str) -> Result<Option<FailureState>, sqlx::Error> {
        let mut state = self.lock();
        let Some(w) = state.webhooks.iter_mut().find(|w| w.id == webhook_id) else {
            return Ok(None);
        };
        w.consecutive_failures += 1;
        w.last_failure_reason = Some(reason.to_string());
        if w.consecutive_failures >= w.max_failures {
            w.is_active = false;
        }
        Ok(Some(FailureState {
            consecutive_failures: w.consecutive_failures,
            is_active: w.is_active,
        }))
    }

    async fn due_deliveries(&self, limit: i64) -> Result<Vec<WebhookDelivery>, sqlx::Error> {
        let now = Utc::now();
        let mut due: Vec<WebhookDelivery> = self
            .lock()
            .deliveries
            .iter()
            .filter(|d| {
                d.status == DeliveryStatus::Pending.as_str()
                    && d.next_retry_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|d| d.next_retry_at);
        due.truncate(limit.max(0) as usize);
        Ok(due)
    }

    async fn increment_attempt(&self, delivery_id: DbId) -> Result<i32, sqlx::Error> {
        let mut attempt = 0;
        self.with_delivery(delivery_id, |d| {
            d.attempt_number += 1;
            d.next_retry_at = Some(Utc::now() + Duration::seconds(DELIVERY_LEASE_SECS));
            attempt = d.attempt_number;
        })?;
        Ok(attempt)
    }

    async fn audit(&self, entry: NewAuditEntry) {
        self.lock().audit.push(entry);
    }
}
