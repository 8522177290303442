//! Repository for the `integration_field_mappings` table.

use openhouse_core::types::DbId;
use sqlx::PgPool;

use crate::models::integration::{CreateFieldMapping, FieldMapping};

const COLUMNS: &str = "\
    id, integration_id, external_field, external_field_label, oh_table, oh_field, \
    direction, transform_rule, is_active, created_at, updated_at";

pub struct FieldMappingRepo;

impl FieldMappingRepo {
    pub async fn list_for_integration(
        pool: &PgPool,
        integration_id: DbId,
    ) -> Result<Vec<FieldMapping>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integration_field_mappings \
             WHERE integration_id = $1 ORDER BY created_at"
        );
        sqlx::query_as::<_, FieldMapping>(&query)
            .bind(integration_id)
            .fetch_all(pool)
            .await
    }

    pub async fn list_active(
        pool: &PgPool,
        integration_id: DbId,
    ) -> Result<Vec<FieldMapping>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM integration_field_mappings \
             WHERE integration_id = $1 AND is_active ORDER BY created_at"
        );
        sqlx::query_as::<_, FieldMapping>(&query)
            .bind(integration_id)
            .fetch_all(pool)
            .await
    }

    /// Insert or replace the mapping for `external_field`, re-activating it.
    pub async fn upsert(
        pool: &PgPool,
        integration_id: DbId,
        input: &CreateFieldMapping,
    ) -> Result<FieldMapping, sqlx::Error> {
        let query = format!(
            "INSERT INTO integration_field_mappings \
                (integration_id, external_field, external_field_label, oh_table, oh_field, \
                 direction, transform_rule) \
             VALUES ($1, $2, $3, $4, $5, COALESCE($6, 'bidirectional'), $7) \
             ON CONFLICT ON CONSTRAINT uq_field_mappings_external DO UPDATE SET \
                 external_field_label = EXCLUDED.external_field_label, \
                 oh_table = EXCLUDED.oh_table, \
                 oh_field = EXCLUDED.oh_field, \
                 direction = EXCLUDED.direction, \
                 transform_rule = EXCLUDED.transform_rule, \
                 is_active = true \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, FieldMapping>(&query)
            .bind(integration_id)
            .bind(&input.external_field)
            .bind(&input.external_field_label)
            .bind(&input.oh_table)
            .bind(&input.oh_field)
            .bind(&input.direction)
            .bind(&input.transform_rule)
            .fetch_one(pool)
            .await
    }

    /// Deactivate every mapping whose external field is not in `keep`.
    pub async fn deactivate_except(
        pool: &PgPool,
        integration_id: DbId,
        keep: &[String],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE integration_field_mappings SET is_active = false \
             WHERE integration_id = $1 AND is_active AND NOT (external_field = ANY($2))",
        )
        .bind(integration_id)
        .bind(keep)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
