//! Operator JWTs and external API keys.

pub mod api_keys;
pub mod jwt;
