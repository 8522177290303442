//! OpenHouse event bus and outbound webhook delivery.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the domain event envelope.
//! - [`WebhookDispatcher`]: signed delivery to tenant webhooks with a
//!   persistent retry queue and a per-webhook circuit breaker.
//! - [`WebhookRouter`]: bus subscriber that forwards tenant events to the
//!   dispatcher.

pub mod bus;
pub mod dispatcher;
pub mod router;
pub mod store;

pub use bus::{EventBus, PlatformEvent};
pub use dispatcher::{DeliveryError, DeliveryOutcome, DispatchSummary, WebhookDispatcher};
pub use router::WebhookRouter;
pub use store::{InMemoryWebhookStore, PgWebhookStore, WebhookStore};
