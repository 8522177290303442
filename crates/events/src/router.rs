//! Forwards tenant events from the [`EventBus`](crate::bus::EventBus) to
//! webhook delivery.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::bus::PlatformEvent;
use crate::dispatcher::WebhookDispatcher;

/// Background subscriber that hands every tenant-scoped event to the
/// [`WebhookDispatcher`].
///
/// Each event is dispatched on its own task so a slow endpoint never stalls
/// the bus receiver.
pub struct WebhookRouter;

impl WebhookRouter {
    /// Run until the bus is dropped.
    pub async fn run(
        dispatcher: Arc<WebhookDispatcher>,
        mut receiver: broadcast::Receiver<PlatformEvent>,
    ) {
        loop {
            match receiver.recv().await {
                Ok(event) => {
                    let Some(tenant_id) = event.tenant_id else {
                        continue;
                    };
                    let dispatcher = Arc::clone(&dispatcher);
                    tokio::spawn(async move {
                        if let Err(e) = dispatcher
                            .dispatch(tenant_id, &event.event_type, &event.payload)
                            .await
                        {
                            tracing::error!(
                                error = %e,
                                event_type = %event.event_type,
                                tenant_id = %tenant_id,
                                "Failed to dispatch webhook event"
                            );
                        }
                    });
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!(skipped = n, "Webhook router lagged, some events were not dispatched");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    tracing::info!("Event bus closed, webhook router shutting down");
                    break;
                }
            }
        }
    }
}
