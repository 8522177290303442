//! Row structs and DTOs.
//!
//! Each submodule pairs `FromRow` + `Serialize` entity structs with the
//! `Deserialize` DTOs accepted by the API for inserts and patches.

pub mod api_key;
pub mod audit;
pub mod integration;
pub mod unit;
pub mod webhook;
