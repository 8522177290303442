/// All primary keys are PostgreSQL UUIDs (`gen_random_uuid()`).
pub type DbId = uuid::Uuid;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// One external record or spreadsheet row, keyed by external field name.
pub type ExternalRow = serde_json::Map<String, serde_json::Value>;
