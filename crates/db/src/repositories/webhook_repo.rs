//! Repository for the `webhooks` and `webhook_deliveries` tables.

use openhouse_core::types::DbId;
use openhouse_core::webhooks::DELIVERY_LEASE_SECS;
use sqlx::PgPool;

use crate::models::webhook::{Webhook, WebhookDelivery};

// ---------------------------------------------------------------------------
// Column lists
// ---------------------------------------------------------------------------

const WEBHOOK_COLUMNS: &str = "\
    id, tenant_id, url, secret, events, development_ids, is_active, \
    consecutive_failures, max_failures, last_failure_reason, last_triggered_at, \
    created_at, updated_at";

const DELIVERY_COLUMNS: &str = "\
    id, webhook_id, event_type, payload, status, http_status, response_body, \
    attempt_number, next_retry_at, created_at";

/// Failure bookkeeping result after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, sqlx::FromRow)]
pub struct FailureState {
    pub consecutive_failures: i32,
    pub is_active: bool,
}

pub struct WebhookRepo;

impl WebhookRepo {
    // -----------------------------------------------------------------------
    // Webhook CRUD
    // -----------------------------------------------------------------------

    pub async fn create(
        pool: &PgPool,
        tenant_id: DbId,
        url: &str,
        secret: &str,
        events: &[String],
        development_ids: Option<&[DbId]>,
        max_failures: i32,
    ) -> Result<Webhook, sqlx::Error> {
        let query = format!(
            "INSERT INTO webhooks (tenant_id, url, secret, events, development_ids, max_failures) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {WEBHOOK_COLUMNS}"
        );
        sqlx::query_as::<_, Webhook>(&query)
            .bind(tenant_id)
            .bind(url)
            .bind(secret)
            .bind(events)
            .bind(development_ids)
            .bind(max_failures)
            .fetch_one(pool)
            .await
    }

    pub async fn list_by_tenant(pool: &PgPool, tenant_id: DbId) -> Result<Vec<Webhook>, sqlx::Error> {
        let query = format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE tenant_id = $1 ORDER BY created_at DESC"
        );
        sqlx::query_as::<_, Webhook>(&query)
            .bind(tenant_id)
            .fetch_all(pool)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Webhook>, sqlx::Error> {
        let query = format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = $1");
        sqlx::query_as::<_, Webhook>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_for_tenant(
        pool: &PgPool,
        tenant_id: DbId,
        id: DbId,
    ) -> Result<Option<Webhook>, sqlx::Error> {
        let query =
            format!("SELECT {WEBHOOK_COLUMNS} FROM webhooks WHERE id = $1 AND tenant_id = $2");
        sqlx::query_as::<_, Webhook>(&query)
            .bind(id)
            .bind(tenant_id)
            .fetch_optional(pool)
            .await
    }

    /// Active webhooks of `tenant_id` subscribed to `event_type`.
    pub async fn list_subscribed(
        pool: &PgPool,
        tenant_id: DbId,
        event_type: &str,
    ) -> Result<Vec<Webhook>, sqlx::Error> {
        let query = format!(
            "SELECT {WEBHOOK_COLUMNS} FROM webhooks \
             WHERE tenant_id = $1 AND is_active AND $2 = ANY(events) \
             ORDER BY created_at"
        );
        sqlx::query_as::<_, Webhook>(&query)
            .bind(tenant_id)
            .bind(event_type)
            .fetch_all(pool)
            .await
    }

    /// Partial update. Re-activating resets the failure counter.
    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        pool: &PgPool,
        tenant_id: DbId,
        id: DbId,
        url: Option<&str>,
        events: Option<&[String]>,
        development_ids: Option<&[DbId]>,
        is_active: Option<bool>,
        max_failures: Option<i32>,
    ) -> Result<Option<Webhook>, sqlx::Error> {
        let query = format!(
            "UPDATE webhooks SET \
                 url = COALESCE($3, url), \
                 events = COALESCE($4, events), \
                 development_ids = COALESCE($5, development_ids), \
                 consecutive_failures = CASE WHEN $6 AND NOT is_active THEN 0 \
                                             ELSE consecutive_failures END, \
                 is_active = COALESCE($6, is_active), \
                 max_failures = COALESCE($7, max_failures) \
             WHERE id = $1 AND tenant_id = $2 \
             RETURNING {WEBHOOK_COLUMNS}"
        );
        sqlx::query_as::<_, Webhook>(&query)
            .bind(id)
            .bind(tenant_id)
            .bind(url)
            .bind(events)
            .bind(development_ids)
            .bind(is_active)
            .bind(max_failures)
            .fetch_optional(pool)
            .await
    }

    /// Delete a webhook. Deliveries cascade.
    pub async fn delete(pool: &PgPool, tenant_id: DbId, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM webhooks WHERE id = $1 AND tenant_id = $2")
            .bind(id)
            .bind(tenant_id)
            .execute(pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // -----------------------------------------------------------------------
    // Circuit breaker
    // -----------------------------------------------------------------------

    pub async fn record_success(pool: &PgPool, webhook_id: DbId) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhooks SET \
                 consecutive_failures = 0, last_failure_reason = NULL, last_triggered_at = NOW() \
             WHERE id = $1",
        )
        .bind(webhook_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Increment the failure counter and disable the webhook once it reaches
    /// `max_failures`, in one statement.
    pub async fn record_failure(
        pool: &PgPool,
        webhook_id: DbId,
        reason: &str,
    ) -> Result<Option<FailureState>, sqlx::Error> {
        sqlx::query_as::<_, FailureState>(
            "UPDATE webhooks SET \
                 consecutive_failures = consecutive_failures + 1, \
                 last_failure_reason = $2, \
                 is_active = CASE WHEN consecutive_failures + 1 >= max_failures \
                                  THEN false ELSE is_active END \
             WHERE id = $1 \
             RETURNING consecutive_failures, is_active",
        )
        .bind(webhook_id)
        .bind(reason)
        .fetch_optional(pool)
        .await
    }

    // -----------------------------------------------------------------------
    // Deliveries
    // -----------------------------------------------------------------------

    /// New deliveries start leased, so one whose first attempt never
    /// finishes is picked up by the retry sweep.
    pub async fn create_delivery(
        pool: &PgPool,
        webhook_id: DbId,
        event_type: &str,
        payload: &serde_json::Value,
    ) -> Result<WebhookDelivery, sqlx::Error> {
        let query = format!(
            "INSERT INTO webhook_deliveries (webhook_id, event_type, payload, next_retry_at) \
             VALUES ($1, $2, $3, NOW() + make_interval(secs => $4)) \
             RETURNING {DELIVERY_COLUMNS}"
        );
        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(webhook_id)
            .bind(event_type)
            .bind(payload)
            .bind(DELIVERY_LEASE_SECS as f64)
            .fetch_one(pool)
            .await
    }

    pub async fn mark_delivered(
        pool: &PgPool,
        delivery_id: DbId,
        http_status: i16,
        response_body: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhook_deliveries SET \
                 status = 'delivered', http_status = $2, response_body = $3, next_retry_at = NULL \
             WHERE id = $1",
        )
        .bind(delivery_id)
        .bind(http_status)
        .bind(response_body)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Terminal failure: no further retry.
    pub async fn mark_failed(
        pool: &PgPool,
        delivery_id: DbId,
        http_status: Option<i16>,
        response_body: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhook_deliveries SET \
                 status = 'failed', http_status = COALESCE($2, http_status), \
                 response_body = COALESCE($3, response_body), next_retry_at = NULL \
             WHERE id = $1",
        )
        .bind(delivery_id)
        .bind(http_status)
        .bind(response_body)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a failed attempt and put the delivery back in the retry queue.
    pub async fn schedule_retry(
        pool: &PgPool,
        delivery_id: DbId,
        http_status: Option<i16>,
        response_body: &str,
        delay_secs: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE webhook_deliveries SET \
                 status = 'pending', http_status = $2, response_body = $3, \
                 next_retry_at = NOW() + make_interval(secs => $4) \
             WHERE id = $1",
        )
        .bind(delivery_id)
        .bind(http_status)
        .bind(response_body)
        .bind(delay_secs as f64)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Pending deliveries whose retry time or attempt lease has passed,
    /// oldest first.
    pub async fn list_due_deliveries(
        pool: &PgPool,
        limit: i64,
    ) -> Result<Vec<WebhookDelivery>, sqlx::Error> {
        let query = format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries \
             WHERE status = 'pending' AND next_retry_at IS NOT NULL AND next_retry_at <= NOW() \
             ORDER BY next_retry_at LIMIT $1"
        );
        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(limit)
            .fetch_all(pool)
            .await
    }

    /// Bump the attempt counter before a retry and renew the lease. Returns
    /// the new value.
    pub async fn increment_attempt(pool: &PgPool, delivery_id: DbId) -> Result<i32, sqlx::Error> {
        sqlx::query_scalar(
            "UPDATE webhook_deliveries SET attempt_number = attempt_number + 1, \
                 next_retry_at = NOW() + make_interval(secs => $2) \
             WHERE id = $1 RETURNING attempt_number",
        )
        .bind(delivery_id)
        .bind(DELIVERY_LEASE_SECS as f64)
        .fetch_one(pool)
        .await
    }

    pub async fn list_deliveries_for_webhook(
        pool: &PgPool,
        webhook_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WebhookDelivery>, sqlx::Error> {
        let query = format!(
            "SELECT {DELIVERY_COLUMNS} FROM webhook_deliveries \
             WHERE webhook_id = $1 \
             ORDER BY created_at DESC LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, WebhookDelivery>(&query)
            .bind(webhook_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }
}
