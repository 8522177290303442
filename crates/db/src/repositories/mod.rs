//! Repository layer.
//!
//! Each repository is a zero-sized struct providing async methods that take
//! `&PgPool` as the first argument.

pub mod api_key_repo;
pub mod audit_log_repo;
pub mod field_mapping_repo;
pub mod integration_repo;
pub mod sync_log_repo;
pub mod unit_repo;
pub mod webhook_repo;

pub use api_key_repo::ApiKeyRepo;
pub use audit_log_repo::AuditLogRepo;
pub use field_mapping_repo::FieldMappingRepo;
pub use integration_repo::IntegrationRepo;
pub use sync_log_repo::{ConflictRepo, SyncLogRepo};
pub use unit_repo::UnitRepo;
pub use webhook_repo::WebhookRepo;
