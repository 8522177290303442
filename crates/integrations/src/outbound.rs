//! Fire-and-forget sync jobs.
//!
//! Request handlers and the inbound engine enqueue [`SyncJob`]s through an
//! [`OutboundSyncHandle`] and return immediately. A single
//! [`OutboundWorker`] drains the queue, running each job on its own task so a
//! panic in one job never takes the worker down.

use std::sync::Arc;

use openhouse_core::types::DbId;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::engine::SyncEngine;
use crate::enrichment::EnrichmentWriter;

/// Default queue depth before new jobs are dropped.
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// One internal field change to push outward.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub tenant_id: DbId,
    pub development_id: DbId,
    pub table: String,
    pub field: String,
    /// The unit id.
    pub record_id: DbId,
    /// Address used to find the unit's spreadsheet row. Looked up when absent.
    #[serde(default)]
    pub unit_identifier: Option<String>,
    #[serde(default)]
    pub old_value: Value,
    pub new_value: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SyncJob {
    Outbound(ChangeEvent),
    Enrich { integration_id: DbId },
}

/// Cloneable producer side of the job queue.
#[derive(Debug, Clone)]
pub struct OutboundSyncHandle {
    sender: mpsc::Sender<SyncJob>,
}

impl OutboundSyncHandle {
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<SyncJob>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (Self { sender }, receiver)
    }

    /// Queue an outbound push. Never fails the caller.
    pub fn trigger(&self, change: ChangeEvent) {
        self.enqueue(SyncJob::Outbound(change));
    }

    /// Queue an enrichment refresh for a spreadsheet integration.
    pub fn enrich(&self, integration_id: DbId) {
        self.enqueue(SyncJob::Enrich { integration_id });
    }

    fn enqueue(&self, job: SyncJob) {
        if let Err(e) = self.sender.try_send(job) {
            tracing::warn!(error = %e, "Failed to enqueue sync job");
        }
    }
}

pub struct OutboundWorker {
    receiver: mpsc::Receiver<SyncJob>,
    engine: Arc<SyncEngine>,
    enrichment: Arc<EnrichmentWriter>,
}

impl OutboundWorker {
    pub fn new(
        receiver: mpsc::Receiver<SyncJob>,
        engine: Arc<SyncEngine>,
        enrichment: Arc<EnrichmentWriter>,
    ) -> Self {
        Self {
            receiver,
            engine,
            enrichment,
        }
    }

    /// Process jobs until cancelled or every handle is dropped.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!("Sync job worker started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Sync job worker stopping");
                    break;
                }
                job = self.receiver.recv() => match job {
                    Some(job) => self.handle(job).await,
                    None => {
                        tracing::info!("Sync job queue closed");
                        break;
                    }
                },
            }
        }
    }

    async fn handle(&self, job: SyncJob) {
        let engine = Arc::clone(&self.engine);
        let enrichment = Arc::clone(&self.enrichment);
        let task = tokio::spawn(async move {
            match job {
                SyncJob::Outbound(change) => match engine.sync_outbound(&change).await {
                    Ok(results) => tracing::debug!(
                        record_id = %change.record_id,
                        integrations = results.len(),
                        "Outbound change pushed"
                    ),
                    Err(e) => tracing::error!(
                        record_id = %change.record_id,
                        error = %e,
                        "Outbound sync failed"
                    ),
                },
                SyncJob::Enrich { integration_id } => {
                    if let Err(e) = enrichment.enrich(integration_id).await {
                        tracing::error!(integration_id = %integration_id, error = %e, "Enrichment failed");
                    }
                }
            }
        });
        if let Err(e) = task.await {
            tracing::error!(error = %e, "Sync job panicked");
        }
    }
}
