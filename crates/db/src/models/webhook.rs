//! Webhook subscription and delivery models.

use openhouse_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

/// A row from the `webhooks` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Webhook {
    pub id: DbId,
    pub tenant_id: DbId,
    pub url: String,
    #[serde(skip_serializing)]
    pub secret: String,
    pub events: Vec<String>,
    pub development_ids: Option<Vec<DbId>>,
    pub is_active: bool,
    pub consecutive_failures: i32,
    pub max_failures: i32,
    pub last_failure_reason: Option<String>,
    pub last_triggered_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Webhook {
    pub fn subscribes_to(&self, event_type: &str) -> bool {
        self.events.iter().any(|e| e == event_type)
    }

    /// An empty or missing allow-list accepts every development, and events
    /// without a development id are never filtered.
    pub fn accepts_development(&self, development_id: Option<DbId>) -> bool {
        match (self.development_ids.as_deref(), development_id) {
            (Some(ids), Some(dev)) if !ids.is_empty() => ids.contains(&dev),
            _ => true,
        }
    }
}

/// DTO for creating a webhook. The secret is generated when omitted.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateWebhook {
    #[validate(url)]
    pub url: String,
    pub secret: Option<String>,
    #[validate(length(min = 1))]
    pub events: Vec<String>,
    pub development_ids: Option<Vec<DbId>>,
    #[validate(range(min = 1, max = 100))]
    pub max_failures: Option<i32>,
}

/// DTO for updating a webhook. Re-activating resets the failure counter.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateWebhook {
    #[validate(url)]
    pub url: Option<String>,
    pub events: Option<Vec<String>>,
    pub development_ids: Option<Vec<DbId>>,
    pub is_active: Option<bool>,
    #[validate(range(min = 1, max = 100))]
    pub max_failures: Option<i32>,
}

/// A row from the `webhook_deliveries` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct WebhookDelivery {
    pub id: DbId,
    pub webhook_id: DbId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub status: String,
    pub http_status: Option<i16>,
    pub response_body: Option<String>,
    pub attempt_number: i32,
    pub next_retry_at: Option<Timestamp>,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;

    fn webhook(development_ids: Option<Vec<DbId>>) -> Webhook {
        Webhook {
            id: DbId::new_v4(),
            tenant_id: DbId::new_v4(),
            url: "https://example.test/hook".into(),
            secret: "s".into(),
            events: vec!["unit.updated".into()],
            development_ids,
            is_active: true,
            consecutive_failures: 0,
            max_failures: 10,
            last_failure_reason: None,
            last_triggered_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn subscription_is_exact() {
        let hook = webhook(None);
        assert!(hook.subscribes_to("unit.updated"));
        assert!(!hook.subscribes_to("unit.created"));
    }

    #[test]
    fn development_filter() {
        let dev = DbId::new_v4();
        assert!(webhook(None).accepts_development(Some(dev)));
        assert!(webhook(Some(vec![])).accepts_development(Some(dev)));
        assert!(webhook(Some(vec![dev])).accepts_development(Some(dev)));
        assert!(!webhook(Some(vec![DbId::new_v4()])).accepts_development(Some(dev)));
        assert!(webhook(Some(vec![dev])).accepts_development(None));
    }

    #[test]
    fn secret_never_serialized() {
        let out = serde_json::to_value(webhook(None)).unwrap();
        assert!(out.get("secret").is_none());
    }
}
