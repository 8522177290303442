//! Request authentication extractors.
//!
//! - [`auth::AuthUser`] -- operator identity from a JWT Bearer token.
//! - [`api_key::ApiKeyAuth`] -- external API gateway: key authentication,
//!   scope check and rate limiting.

pub mod api_key;
pub mod auth;
