//! Integration, field mapping, sync log, and conflict models.

use openhouse_core::error::CoreError;
use openhouse_core::integration::{IntegrationStatus, IntegrationType, SyncDirection};
use openhouse_core::matching::MappingTarget;
use openhouse_core::transform::TransformRule;
use openhouse_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use validator::Validate;

// ---------------------------------------------------------------------------
// Integration
// ---------------------------------------------------------------------------

/// A row from the `integrations` table.
///
/// `credentials` holds the vault blob and is never serialized.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Integration {
    pub id: DbId,
    pub tenant_id: DbId,
    pub development_id: Option<DbId>,
    pub integration_type: String,
    pub name: String,
    pub status: String,
    #[serde(skip_serializing)]
    pub credentials: Option<String>,
    pub sync_direction: String,
    pub sync_frequency: String,
    pub external_ref: Option<String>,
    pub last_sync_at: Option<Timestamp>,
    pub last_error: Option<String>,
    pub last_error_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Integration {
    pub fn kind(&self) -> Result<IntegrationType, CoreError> {
        self.integration_type.parse()
    }

    pub fn status(&self) -> Result<IntegrationStatus, CoreError> {
        self.status.parse()
    }

    pub fn direction(&self) -> Result<SyncDirection, CoreError> {
        self.sync_direction.parse()
    }
}

/// DTO for starting an OAuth connection. The row is created disconnected.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateIntegration {
    pub development_id: Option<DbId>,
    pub integration_type: String,
    #[validate(length(min = 1, max = 200))]
    pub name: String,
    pub sync_direction: Option<String>,
    pub external_ref: Option<String>,
}

/// DTO for operator edits after connection.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct UpdateIntegration {
    #[validate(length(min = 1, max = 200))]
    pub name: Option<String>,
    pub sync_direction: Option<String>,
    pub sync_frequency: Option<String>,
    pub external_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Field mapping
// ---------------------------------------------------------------------------

/// A row from the `integration_field_mappings` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct FieldMapping {
    pub id: DbId,
    pub integration_id: DbId,
    pub external_field: String,
    pub external_field_label: Option<String>,
    pub oh_table: String,
    pub oh_field: String,
    pub direction: String,
    pub transform_rule: Option<serde_json::Value>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl FieldMapping {
    /// Unparseable directions are treated as bidirectional.
    pub fn direction(&self) -> SyncDirection {
        self.direction.parse().unwrap_or(SyncDirection::Bidirectional)
    }

    pub fn rule(&self) -> Option<TransformRule> {
        self.transform_rule.as_ref().and_then(TransformRule::from_json)
    }

    /// CRM object name from an `object.field` label, e.g. `contact` from
    /// `contact.firstname`.
    pub fn external_object(&self) -> Option<&str> {
        let label = self.external_field_label.as_deref()?;
        let (object, field) = label.split_once('.')?;
        (!object.is_empty() && !field.is_empty()).then_some(object)
    }
}

impl MappingTarget for FieldMapping {
    fn external_field(&self) -> &str {
        &self.external_field
    }

    fn oh_table(&self) -> &str {
        &self.oh_table
    }

    fn oh_field(&self) -> &str {
        &self.oh_field
    }
}

/// One confirmed column mapping submitted by an operator.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct CreateFieldMapping {
    #[validate(length(min = 1, max = 500))]
    pub external_field: String,
    pub external_field_label: Option<String>,
    pub oh_table: String,
    pub oh_field: String,
    pub direction: Option<String>,
    pub transform_rule: Option<serde_json::Value>,
}

// ---------------------------------------------------------------------------
// Sync log
// ---------------------------------------------------------------------------

/// A row from the `integration_sync_log` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct SyncLog {
    pub id: DbId,
    pub integration_id: DbId,
    pub sync_type: String,
    pub direction: String,
    pub status: String,
    pub records_processed: i32,
    pub records_created: i32,
    pub records_updated: i32,
    pub records_skipped: i32,
    pub records_errored: i32,
    pub conflicts_detected: i32,
    pub error_message: Option<String>,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub duration_ms: Option<i64>,
}

/// Counters accumulated during a run and written when it completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SyncStats {
    pub records_processed: i32,
    pub records_created: i32,
    pub records_updated: i32,
    pub records_skipped: i32,
    pub records_errored: i32,
    pub conflicts_detected: i32,
}

// ---------------------------------------------------------------------------
// Conflict
// ---------------------------------------------------------------------------

/// A row from the `integration_conflicts` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Conflict {
    pub id: DbId,
    pub integration_id: DbId,
    pub sync_log_id: Option<DbId>,
    pub oh_table: String,
    pub oh_record_id: DbId,
    pub oh_field: String,
    pub local_value: Option<String>,
    pub remote_value: Option<String>,
    pub status: String,
    pub created_at: Timestamp,
}

/// Insert payload for a detected conflict. Status is always `pending`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConflict {
    pub integration_id: DbId,
    pub sync_log_id: DbId,
    pub oh_table: String,
    pub oh_record_id: DbId,
    pub oh_field: String,
    pub local_value: String,
    pub remote_value: String,
}
