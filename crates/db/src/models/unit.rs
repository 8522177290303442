//! Unit views used for matching, the external API, and enrichment.

use openhouse_core::matching::UnitCandidate;
use openhouse_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A row from the `units` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Unit {
    pub id: DbId,
    pub tenant_id: DbId,
    pub development_id: DbId,
    pub address: String,
    pub unit_number: Option<String>,
    pub unit_type_id: Option<DbId>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<&Unit> for UnitCandidate {
    fn from(unit: &Unit) -> Self {
        UnitCandidate {
            id: unit.id,
            address: unit.address.clone(),
            unit_number: unit.unit_number.clone(),
        }
    }
}

/// Unit joined with its sales pipeline, as returned by the external API.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UnitWithPipeline {
    pub id: DbId,
    pub development_id: DbId,
    pub address: String,
    pub unit_number: Option<String>,
    pub purchaser_name: Option<String>,
    pub status: Option<String>,
    pub sale_price: Option<String>,
    pub closing_date: Option<Timestamp>,
    pub handover_date: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// A field write submitted through the external API.
#[derive(Debug, Clone, Deserialize)]
pub struct UnitFieldUpdate {
    pub table: String,
    pub field: String,
    pub value: serde_json::Value,
}

/// A recorded CRM id for a unit.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct UnitExternalRef {
    pub id: DbId,
    pub unit_id: DbId,
    pub integration_id: DbId,
    pub external_object: String,
    pub external_id: String,
    pub created_at: Timestamp,
}

/// Engagement and compliance figures behind the enrichment columns.
#[derive(Debug, Clone, Default, PartialEq, Eq, FromRow)]
pub struct UnitMetrics {
    pub message_count: i64,
    pub questions_asked: i64,
    pub last_active_at: Option<Timestamp>,
    pub required_documents: i64,
    pub completed_documents: i64,
}
