//! Signed webhook delivery with a persistent retry queue.
//!
//! Every delivery row is created leased before the network call. A crash or
//! store error between the two leaves a `pending` row that the retry sweep
//! picks up once the lease expires. Failed attempts are rescheduled with
//! exponential backoff until they succeed, run out of attempts, or the owning
//! webhook is disabled by its circuit breaker.

use std::sync::Arc;
use std::time::Duration;

use chrono::{SecondsFormat, Utc};
use openhouse_core::audit::{actions, actor_types};
use openhouse_core::types::DbId;
use openhouse_core::webhooks::{
    retry_delay_secs, should_retry, signature_header_value, truncate_response_body,
    DELIVERY_HEADER, DELIVERY_TIMEOUT_SECS, EVENT_HEADER, RETRY_BATCH_SIZE, SIGNATURE_HEADER,
};
use openhouse_db::models::audit::NewAuditEntry;
use openhouse_db::models::webhook::{Webhook, WebhookDelivery};
use serde_json::json;

use crate::store::WebhookStore;

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Why a single delivery attempt failed.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Webhook request timed out after {0:?}")]
    Timeout(Duration),

    /// Network, DNS, TLS or connection failure.
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    RetryScheduled { delay_secs: i64 },
    /// Terminal: attempts exhausted, webhook disabled, or webhook gone.
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchSummary {
    pub attempted: usize,
    pub delivered: usize,
    pub retry_scheduled: usize,
    pub failed: usize,
}

impl DispatchSummary {
    fn record(&mut self, outcome: DeliveryOutcome) {
        self.attempted += 1;
        match outcome {
            DeliveryOutcome::Delivered => self.delivered += 1,
            DeliveryOutcome::RetryScheduled { .. } => self.retry_scheduled += 1,
            DeliveryOutcome::Failed => self.failed += 1,
        }
    }
}

/// Status and body of a completed HTTP exchange.
struct Response {
    status: u16,
    body: String,
}

// ---------------------------------------------------------------------------
// WebhookDispatcher
// ---------------------------------------------------------------------------

pub struct WebhookDispatcher {
    store: Arc<dyn WebhookStore>,
    client: reqwest::Client,
    timeout: Duration,
}

impl WebhookDispatcher {
    pub fn new(store: Arc<dyn WebhookStore>) -> Self {
        Self::with_timeout(store, Duration::from_secs(DELIVERY_TIMEOUT_SECS))
    }

    pub fn with_timeout(store: Arc<dyn WebhookStore>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build reqwest HTTP client");
        Self {
            store,
            client,
            timeout,
        }
    }

    /// Deliver `payload` to every active webhook of the tenant subscribed to
    /// `event_type`.
    ///
    /// Webhooks with a non-empty development allow-list only receive payloads
    /// whose `development_id` is on the list; payloads without one are not
    /// filtered. A store error for one webhook is logged and the remaining
    /// webhooks are still attempted.
    pub async fn dispatch(
        &self,
        tenant_id: DbId,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<DispatchSummary, sqlx::Error> {
        let development_id = payload
            .get("development_id")
            .and_then(|v| v.as_str())
            .and_then(|s| s.parse::<DbId>().ok());

        let mut summary = DispatchSummary::default();
        for webhook in self.store.subscribed(tenant_id, event_type).await? {
            if !webhook.accepts_development(development_id) {
                continue;
            }
            match self.deliver(&webhook, event_type, payload).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => tracing::error!(
                    webhook_id = %webhook.id,
                    event_type,
                    error = %e,
                    "Failed to record webhook delivery"
                ),
            }
        }

        if summary.attempted > 0 {
            tracing::debug!(
                tenant_id = %tenant_id,
                event_type,
                delivered = summary.delivered,
                retry_scheduled = summary.retry_scheduled,
                failed = summary.failed,
                "Webhook event dispatched"
            );
        }
        Ok(summary)
    }

    /// Re-attempt due pending deliveries, oldest first.
    pub async fn retry_pending(&self, limit: i64) -> Result<DispatchSummary, sqlx::Error> {
        let mut summary = DispatchSummary::default();

        for delivery in self.store.due_deliveries(limit).await? {
            match self.redeliver(&delivery).await {
                Ok(outcome) => summary.record(outcome),
                Err(e) => tracing::error!(
                    delivery_id = %delivery.id,
                    error = %e,
                    "Webhook retry failed"
                ),
            }
        }

        if summary.attempted > 0 {
            tracing::info!(
                attempted = summary.attempted,
                delivered = summary.delivered,
                failed = summary.failed,
                "Webhook retry sweep finished"
            );
        }
        Ok(summary)
    }

    /// One sweep with the default batch size.
    pub async fn retry_due(&self) -> Result<DispatchSummary, sqlx::Error> {
        self.retry_pending(RETRY_BATCH_SIZE).await
    }

    // ---- private helpers ----

    async fn deliver(
        &self,
        webhook: &Webhook,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<DeliveryOutcome, sqlx::Error> {
        let delivery = self
            .store
            .create_delivery(webhook.id, event_type, payload)
            .await?;
        self.attempt(webhook, delivery.id, event_type, payload, delivery.attempt_number)
            .await
    }

    /// Deliveries whose webhook is gone or inactive are abandoned as `failed`.
    async fn redeliver(&self, delivery: &WebhookDelivery) -> Result<DeliveryOutcome, sqlx::Error> {
        let webhook = match self.store.find_webhook(delivery.webhook_id).await? {
            Some(webhook) if webhook.is_active => webhook,
            _ => {
                self.store
                    .mark_failed(delivery.id, None, Some("Webhook disabled"))
                    .await?;
                return Ok(DeliveryOutcome::Failed);
            }
        };

        let attempt = self.store.increment_attempt(delivery.id).await?;
        self.attempt(&webhook, delivery.id, &delivery.event_type, &delivery.payload, attempt)
            .await
    }

    async fn attempt(
        &self,
        webhook: &Webhook,
        delivery_id: DbId,
        event_type: &str,
        payload: &serde_json::Value,
        attempt: i32,
    ) -> Result<DeliveryOutcome, sqlx::Error> {
        let body = json!({
            "event": event_type,
            "timestamp": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            "data": payload,
        })
        .to_string();

        let result = match self.send(webhook, delivery_id, event_type, body).await {
            Ok(response) if (200..300).contains(&response.status) => Ok(response),
            Ok(response) => Err((DeliveryError::HttpStatus(response.status), Some(response))),
            Err(e) => Err((e, None)),
        };

        match result {
            Ok(response) => {
                let stored = truncate_response_body(&response.body);
                self.store
                    .mark_delivered(delivery_id, response.status as i16, &stored)
                    .await?;
                self.store.record_success(webhook.id).await?;
                self.store
                    .audit(
                        NewAuditEntry::system(
                            webhook.tenant_id,
                            actions::WEBHOOK_DELIVERED,
                            json!({
                                "webhook_id": webhook.id,
                                "delivery_id": delivery_id,
                                "event_type": event_type,
                                "http_status": response.status,
                            }),
                        )
                        .with_actor(actor_types::WEBHOOK, Some(webhook.id)),
                    )
                    .await;
                Ok(DeliveryOutcome::Delivered)
            }
            Err((error, response)) => {
                self.handle_failure(webhook, delivery_id, event_type, attempt, error, response)
                    .await
            }
        }
    }

    async fn send(
        &self,
        webhook: &Webhook,
        delivery_id: DbId,
        event_type: &str,
        body: String,
    ) -> Result<Response, DeliveryError> {
        let signature = signature_header_value(&webhook.secret, &body);
        let sent = self
            .client
            .post(&webhook.url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(SIGNATURE_HEADER, signature)
            .header(EVENT_HEADER, event_type)
            .header(DELIVERY_HEADER, delivery_id.to_string())
            .body(body)
            .send()
            .await;

        let response = match sent {
            Ok(response) => response,
            Err(e) if e.is_timeout() => return Err(DeliveryError::Timeout(self.timeout)),
            Err(e) => return Err(DeliveryError::Request(e)),
        };
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        Ok(Response { status, body })
    }

    async fn handle_failure(
        &self,
        webhook: &Webhook,
        delivery_id: DbId,
        event_type: &str,
        attempt: i32,
        error: DeliveryError,
        response: Option<Response>,
    ) -> Result<DeliveryOutcome, sqlx::Error> {
        let reason = error.to_string();
        let http_status = response.as_ref().map(|r| r.status as i16);
        let stored_body = truncate_response_body(
            response.as_ref().map(|r| r.body.as_str()).unwrap_or(&reason),
        );

        tracing::warn!(
            webhook_id = %webhook.id,
            delivery_id = %delivery_id,
            attempt,
            error = %error,
            "Webhook delivery attempt failed"
        );

        let state = self.store.record_failure(webhook.id, &reason).await?;
        let still_active = state.is_some_and(|s| s.is_active);

        if let Some(state) = state.filter(|s| !s.is_active) {
            tracing::warn!(
                webhook_id = %webhook.id,
                consecutive_failures = state.consecutive_failures,
                "Webhook disabled after repeated failures"
            );
            self.store
                .audit(
                    NewAuditEntry::system(
                        webhook.tenant_id,
                        actions::WEBHOOK_DISABLED,
                        json!({
                            "webhook_id": webhook.id,
                            "consecutive_failures": state.consecutive_failures,
                            "reason": reason,
                        }),
                    )
                    .with_actor(actor_types::WEBHOOK, Some(webhook.id)),
                )
                .await;
        }

        let outcome = if still_active && should_retry(attempt) {
            let delay_secs = retry_delay_secs(attempt);
            self.store
                .schedule_retry(delivery_id, http_status, &stored_body, delay_secs)
                .await?;
            DeliveryOutcome::RetryScheduled { delay_secs }
        } else {
            self.store
                .mark_failed(delivery_id, http_status, Some(&stored_body))
                .await?;
            DeliveryOutcome::Failed
        };

        self.store
            .audit(
                NewAuditEntry::system(
                    webhook.tenant_id,
                    actions::WEBHOOK_FAILED,
                    json!({
                        "webhook_id": webhook.id,
                        "delivery_id": delivery_id,
                        "event_type": event_type,
                        "http_status": http_status,
                        "attempt": attempt,
                        "error": reason,
                    }),
                )
                .with_actor(actor_types::WEBHOOK, Some(webhook.id)),
            )
            .await;

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delivery_error_display() {
        assert_eq!(DeliveryError::HttpStatus(502).to_string(), "Webhook returned HTTP 502");
        assert_eq!(
            DeliveryError::Timeout(Duration::from_secs(10)).to_string(),
            "Webhook request timed out after 10s"
        );
    }

    #[test]
    fn summary_counts_outcomes() {
        let mut summary = DispatchSummary::default();
        summary.record(DeliveryOutcome::Delivered);
        summary.record(DeliveryOutcome::RetryScheduled { delay_secs: 120 });
        summary.record(DeliveryOutcome::Failed);
        assert_eq!(
            summary,
            DispatchSummary {
                attempted: 3,
                delivered: 1,
                retry_scheduled: 1,
                failed: 1,
            }
        );
    }
}
