//! Background worker: scheduled inbound syncs, OAuth token refresh and
//! webhook retries, plus the outbound job queue those syncs feed.

mod config;
mod schedule;

use std::sync::Arc;
use std::time::Duration;

use openhouse_core::vault::CredentialVault;
use openhouse_events::{EventBus, PgWebhookStore, WebhookDispatcher, WebhookRouter};
use openhouse_integrations::adapters::{AdapterFactory, AdapterSource};
use openhouse_integrations::outbound::DEFAULT_QUEUE_CAPACITY;
use openhouse_integrations::{
    EnrichmentWriter, OutboundSyncHandle, OutboundWorker, PgSyncStore, SyncEngine, SyncStore,
    TokenRefresher,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::WorkerConfig;
use crate::schedule::run_periodic;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "openhouse_worker=debug,openhouse_integrations=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = WorkerConfig::from_env();
    tracing::info!(
        sync_secs = config.sync_interval.as_secs(),
        refresh_secs = config.token_refresh_interval.as_secs(),
        retry_secs = config.webhook_retry_interval.as_secs(),
        "Worker starting"
    );

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
    let pool = openhouse_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    openhouse_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database connection pool ready");

    // --- Integrations ---
    let vault = CredentialVault::new(config.credentials_master_key.clone())
        .expect("CREDENTIALS_MASTER_KEY is not a usable master secret");
    let adapters: Arc<dyn AdapterSource> = Arc::new(AdapterFactory::new(config.oauth.clone()));
    let store: Arc<dyn SyncStore> = Arc::new(PgSyncStore::new(pool.clone()));

    let event_bus = Arc::new(EventBus::default());
    let dispatcher = Arc::new(WebhookDispatcher::new(Arc::new(PgWebhookStore::new(pool))));
    let webhook_handle = tokio::spawn(WebhookRouter::run(
        Arc::clone(&dispatcher),
        event_bus.subscribe(),
    ));

    let (jobs, queue) = OutboundSyncHandle::channel(DEFAULT_QUEUE_CAPACITY);
    let engine = Arc::new(
        SyncEngine::new(Arc::clone(&store), Arc::clone(&adapters), vault.clone())
            .with_events(Arc::clone(&event_bus))
            .with_jobs(jobs),
    );
    let enrichment = Arc::new(EnrichmentWriter::new(
        Arc::clone(&store),
        Arc::clone(&adapters),
        vault.clone(),
    ));
    let refresher = Arc::new(TokenRefresher::new(store, adapters, vault));

    // --- Tasks ---
    let cancel = CancellationToken::new();
    let mut tasks = Vec::new();

    tasks.push(tokio::spawn(
        OutboundWorker::new(queue, Arc::clone(&engine), enrichment).run(cancel.clone()),
    ));

    let sync_engine = Arc::clone(&engine);
    tasks.push(tokio::spawn(run_periodic(
        "scheduled_sync",
        config.sync_interval,
        cancel.clone(),
        move || {
            let engine = Arc::clone(&sync_engine);
            async move {
                match engine.run_scheduled().await {
                    Ok(succeeded) => tracing::debug!(succeeded, "Scheduled sync sweep finished"),
                    Err(e) => tracing::error!(error = %e, "Scheduled sync sweep failed"),
                }
            }
        },
    )));

    tasks.push(tokio::spawn(run_periodic(
        "token_refresh",
        config.token_refresh_interval,
        cancel.clone(),
        move || {
            let refresher = Arc::clone(&refresher);
            async move {
                match refresher.run_once().await {
                    Ok(summary) => tracing::debug!(
                        refreshed = summary.refreshed,
                        failed = summary.failed,
                        skipped = summary.skipped,
                        "Token refresh sweep finished"
                    ),
                    Err(e) => tracing::error!(error = %e, "Token refresh sweep failed"),
                }
            }
        },
    )));

    let retry_dispatcher = Arc::clone(&dispatcher);
    tasks.push(tokio::spawn(run_periodic(
        "webhook_retry",
        config.webhook_retry_interval,
        cancel.clone(),
        move || {
            let dispatcher = Arc::clone(&retry_dispatcher);
            async move {
                if let Err(e) = dispatcher.retry_due().await {
                    tracing::error!(error = %e, "Webhook retry sweep failed");
                }
            }
        },
    )));

    shutdown_signal().await;

    // --- Shutdown ---
    cancel.cancel();
    for task in tasks {
        if tokio::time::timeout(config.shutdown_timeout, task).await.is_err() {
            tracing::warn!("Background task did not stop in time");
        }
    }

    drop(engine);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), webhook_handle).await;

    tracing::info!("Worker shut down");
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}
