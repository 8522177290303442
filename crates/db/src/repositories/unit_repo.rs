//! Repository for units and the per-unit tables field mappings can target.
//!
//! Mapped fields are addressed dynamically by `(table, field)`. Only pairs in
//! the column-mapper target list are accepted, which keeps identifiers out of
//! caller control before they are interpolated into SQL.

use openhouse_core::column_mapper::{find_target, TargetField};
use openhouse_core::types::DbId;
use sqlx::PgPool;

use crate::models::unit::{Unit, UnitExternalRef, UnitMetrics, UnitWithPipeline};

const UNIT_COLUMNS: &str = "\
    id, tenant_id, development_id, address, unit_number, unit_type_id, created_at, updated_at";

const REF_COLUMNS: &str = "id, unit_id, integration_id, external_object, external_id, created_at";

/// Compliance documents that count as complete.
const COMPLETE_DOCUMENT_STATUSES: &[&str] = &["uploaded", "verified"];

fn resolve_target(table: &str, field: &str) -> Result<&'static TargetField, sqlx::Error> {
    find_target(table, field).ok_or_else(|| sqlx::Error::ColumnNotFound(format!("{table}.{field}")))
}

/// SQL cast applied to the bound text value for a target kind.
fn cast_for(kind: &str) -> &'static str {
    match kind {
        "date" => "::TIMESTAMPTZ",
        "currency" => "::NUMERIC",
        "reference" => "::UUID",
        _ => "",
    }
}

pub struct UnitRepo;

impl UnitRepo {
    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<Unit>, sqlx::Error> {
        let query = format!("SELECT {UNIT_COLUMNS} FROM units WHERE id = $1");
        sqlx::query_as::<_, Unit>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Units of a development in address order, the candidate set for matching.
    pub async fn list_for_development(
        pool: &PgPool,
        development_id: DbId,
    ) -> Result<Vec<Unit>, sqlx::Error> {
        let query = format!(
            "SELECT {UNIT_COLUMNS} FROM units WHERE development_id = $1 ORDER BY address"
        );
        sqlx::query_as::<_, Unit>(&query)
            .bind(development_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list_with_pipeline(
        pool: &PgPool,
        tenant_id: DbId,
        development_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<UnitWithPipeline>, sqlx::Error> {
        sqlx::query_as::<_, UnitWithPipeline>(
            "SELECT u.id, u.development_id, u.address, u.unit_number, \
                    p.purchaser_name, p.status, p.sale_price::TEXT AS sale_price, \
                    p.closing_date, p.handover_date, u.updated_at \
             FROM units u \
             LEFT JOIN unit_sales_pipeline p ON p.unit_id = u.id \
             WHERE u.tenant_id = $1 AND u.development_id = $2 \
             ORDER BY u.address LIMIT $3 OFFSET $4",
        )
        .bind(tenant_id)
        .bind(development_id)
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await
    }

    // -----------------------------------------------------------------------
    // Mapped field access
    // -----------------------------------------------------------------------

    /// Current value of a mapped field as text. `None` when unset.
    pub async fn read_field(
        pool: &PgPool,
        table: &str,
        field: &str,
        unit_id: DbId,
    ) -> Result<Option<String>, sqlx::Error> {
        let target = resolve_target(table, field)?;
        let query = match target.table {
            "units" => format!("SELECT {}::TEXT FROM units WHERE id = $1", target.field),
            "unit_pipeline_notes" => format!(
                "SELECT {}::TEXT FROM unit_pipeline_notes WHERE unit_id = $1 \
                 ORDER BY created_at DESC LIMIT 1",
                target.field
            ),
            other => format!("SELECT {}::TEXT FROM {other} WHERE unit_id = $1", target.field),
        };
        let row: Option<Option<String>> = sqlx::query_scalar(&query)
            .bind(unit_id)
            .fetch_optional(pool)
            .await?;
        Ok(row.flatten())
    }

    /// Write a mapped field. One-per-unit tables are upserted; notes are
    /// appended as a new entry.
    pub async fn write_field(
        pool: &PgPool,
        table: &str,
        field: &str,
        unit_id: DbId,
        value: Option<&str>,
    ) -> Result<(), sqlx::Error> {
        let target = resolve_target(table, field)?;
        let cast = cast_for(target.kind);
        let column = target.field;
        let query = match target.table {
            "units" => format!("UPDATE units SET {column} = $2{cast} WHERE id = $1"),
            "unit_pipeline_notes" => {
                format!("INSERT INTO unit_pipeline_notes (unit_id, {column}) VALUES ($1, $2)")
            }
            other => format!(
                "INSERT INTO {other} (unit_id, {column}) VALUES ($1, $2{cast}) \
                 ON CONFLICT (unit_id) DO UPDATE SET {column} = EXCLUDED.{column}"
            ),
        };
        sqlx::query(&query)
            .bind(unit_id)
            .bind(value)
            .execute(pool)
            .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // External references
    // -----------------------------------------------------------------------

    pub async fn find_external_ref(
        pool: &PgPool,
        unit_id: DbId,
        integration_id: DbId,
        external_object: Option<&str>,
    ) -> Result<Option<UnitExternalRef>, sqlx::Error> {
        let query = format!(
            "SELECT {REF_COLUMNS} FROM unit_external_refs \
             WHERE unit_id = $1 AND integration_id = $2 \
               AND ($3::TEXT IS NULL OR external_object = $3) \
             ORDER BY created_at LIMIT 1"
        );
        sqlx::query_as::<_, UnitExternalRef>(&query)
            .bind(unit_id)
            .bind(integration_id)
            .bind(external_object)
            .fetch_optional(pool)
            .await
    }

    pub async fn upsert_external_ref(
        pool: &PgPool,
        unit_id: DbId,
        integration_id: DbId,
        external_object: &str,
        external_id: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO unit_external_refs (unit_id, integration_id, external_object, external_id) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT ON CONSTRAINT uq_unit_external_refs \
             DO UPDATE SET external_id = EXCLUDED.external_id",
        )
        .bind(unit_id)
        .bind(integration_id)
        .bind(external_object)
        .bind(external_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Enrichment metrics
    // -----------------------------------------------------------------------

    /// Engagement and compliance figures for one unit.
    pub async fn metrics(pool: &PgPool, unit_id: DbId) -> Result<UnitMetrics, sqlx::Error> {
        sqlx::query_as::<_, UnitMetrics>(
            "SELECT \
                 (SELECT COUNT(*) FROM messages m WHERE m.unit_id = u.id) AS message_count, \
                 (SELECT COUNT(*) FROM messages m WHERE m.unit_id = u.id AND m.sender = 'user') \
                     AS questions_asked, \
                 (SELECT MAX(m.created_at) FROM messages m WHERE m.unit_id = u.id) AS last_active_at, \
                 (SELECT COUNT(*) FROM compliance_document_types t \
                     WHERE t.development_id = u.development_id) AS required_documents, \
                 (SELECT COUNT(*) FROM compliance_documents d \
                     WHERE d.unit_id = u.id AND d.status = ANY($2)) AS completed_documents \
             FROM units u WHERE u.id = $1",
        )
        .bind(unit_id)
        .bind(COMPLETE_DOCUMENT_STATUSES)
        .fetch_optional(pool)
        .await
        .map(Option::unwrap_or_default)
    }
}
