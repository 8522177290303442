//! External system integrations for OpenHouse.
//!
//! - [`adapters`] -- provider adapters behind the CRM and spreadsheet traits.
//! - [`engine`] -- inbound and outbound field synchronisation.
//! - [`outbound`] -- background worker for fire-and-forget sync jobs.
//! - [`enrichment`] -- `OH:` columns written back to spreadsheets.
//! - [`token_refresh`] -- periodic OAuth token renewal.
//! - [`store`] -- persistence seam with Postgres and in-memory backends.

pub mod adapters;
pub mod engine;
pub mod enrichment;
pub mod error;
pub mod outbound;
pub mod store;
pub mod token_refresh;

pub use engine::{OutboundResult, SyncContext, SyncEngine, SyncResult};
pub use enrichment::{EnrichmentSummary, EnrichmentWriter};
pub use error::SyncError;
pub use outbound::{ChangeEvent, OutboundSyncHandle, OutboundWorker, SyncJob};
pub use store::{InMemorySyncStore, PgSyncStore, SyncStore};
pub use token_refresh::{RefreshSummary, TokenRefresher};
