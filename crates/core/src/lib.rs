//! OpenHouse integration core.
//!
//! Domain logic with no database or network dependencies, shared by the
//! repository layer, the sync engine, the webhook dispatcher and the API
//! server:
//!
//! - [`vault`] -- per-tenant credential encryption.
//! - [`transform`] / [`matching`] / [`column_mapper`] -- field mapping support.
//! - [`api_keys`] / [`rate_limit`] -- API gateway primitives.
//! - [`webhooks`] -- payload signing and retry backoff.
//! - [`audit`] -- audit action names and redaction.

pub mod api_keys;
pub mod audit;
pub mod column_mapper;
pub mod error;
pub mod integration;
pub mod matching;
pub mod rate_limit;
pub mod transform;
pub mod types;
pub mod vault;
pub mod webhooks;
