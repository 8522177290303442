//! Audit log entries.

use openhouse_core::types::{DbId, Timestamp};
use serde::Serialize;
use sqlx::FromRow;

/// A row from the `audit_log` table (append-only).
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct AuditLogEntry {
    pub id: DbId,
    pub tenant_id: DbId,
    pub action: String,
    pub actor_type: String,
    pub actor_id: Option<DbId>,
    pub details: serde_json::Value,
    pub created_at: Timestamp,
}

/// Insert payload. Details are redacted by the repository before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub tenant_id: DbId,
    pub action: &'static str,
    pub actor_type: &'static str,
    pub actor_id: Option<DbId>,
    pub details: serde_json::Value,
}

impl NewAuditEntry {
    pub fn system(tenant_id: DbId, action: &'static str, details: serde_json::Value) -> Self {
        Self {
            tenant_id,
            action,
            actor_type: openhouse_core::audit::actor_types::SYSTEM,
            actor_id: None,
            details,
        }
    }

    pub fn with_actor(mut self, actor_type: &'static str, actor_id: Option<DbId>) -> Self {
        self.actor_type = actor_type;
        self.actor_id = actor_id;
        self
    }
}
