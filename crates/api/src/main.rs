use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use openhouse_core::rate_limit::FixedWindowRateLimiter;
use openhouse_core::vault::CredentialVault;
use openhouse_events::{EventBus, PgWebhookStore, WebhookDispatcher, WebhookRouter};
use openhouse_integrations::adapters::{AdapterFactory, AdapterSource};
use openhouse_integrations::outbound::DEFAULT_QUEUE_CAPACITY;
use openhouse_integrations::{
    EnrichmentWriter, OutboundSyncHandle, OutboundWorker, PgSyncStore, SyncEngine, SyncStore,
};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use openhouse_api::auth::api_keys::{ApiKeyAuthenticator, PgApiKeyStore};
use openhouse_api::config::ServerConfig;
use openhouse_api::router::build_app_router;
use openhouse_api::state::AppState;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "openhouse_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let pool = openhouse_db::create_pool(&database_url)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    openhouse_db::health_check(&pool)
        .await
        .expect("Database health check failed");
    tracing::info!("Database health check passed");

    openhouse_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- Integrations ---
    let vault = CredentialVault::new(config.credentials_master_key.clone())
        .expect("CREDENTIALS_MASTER_KEY is not a usable master secret");
    let adapters: Arc<dyn AdapterSource> = Arc::new(AdapterFactory::new(config.oauth.clone()));
    let store: Arc<dyn SyncStore> = Arc::new(PgSyncStore::new(pool.clone()));

    // --- Event bus ---
    let event_bus = Arc::new(EventBus::default());

    let dispatcher = Arc::new(WebhookDispatcher::new(Arc::new(PgWebhookStore::new(
        pool.clone(),
    ))));
    let webhook_handle = tokio::spawn(WebhookRouter::run(dispatcher, event_bus.subscribe()));
    tracing::info!("Webhook router started");

    // --- Sync job worker ---
    let (jobs, queue) = OutboundSyncHandle::channel(DEFAULT_QUEUE_CAPACITY);
    let engine = Arc::new(
        SyncEngine::new(Arc::clone(&store), Arc::clone(&adapters), vault.clone())
            .with_events(Arc::clone(&event_bus))
            .with_jobs(jobs.clone()),
    );
    let enrichment = Arc::new(EnrichmentWriter::new(
        store,
        Arc::clone(&adapters),
        vault.clone(),
    ));

    let worker_cancel = CancellationToken::new();
    let worker_handle = tokio::spawn(
        OutboundWorker::new(queue, Arc::clone(&engine), enrichment).run(worker_cancel.clone()),
    );

    // --- App state ---
    let state = AppState {
        pool: pool.clone(),
        config: Arc::new(config.clone()),
        vault,
        adapters,
        engine: Arc::clone(&engine),
        jobs,
        event_bus: Arc::clone(&event_bus),
        api_keys: ApiKeyAuthenticator::new(Arc::new(PgApiKeyStore::new(pool))),
        rate_limiter: FixedWindowRateLimiter::per_minute(config.api_rate_limit_per_min),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");
    let drain = Duration::from_secs(config.shutdown_timeout_secs);

    // Stop the job worker first; queued jobs beyond the current one are dropped.
    worker_cancel.cancel();
    if tokio::time::timeout(drain, worker_handle).await.is_err() {
        tracing::warn!("Sync job worker did not stop in time");
    }
    tracing::info!("Sync job worker stopped");

    // Dropping the last bus sender closes the channel and ends the router.
    drop(engine);
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), webhook_handle).await;
    tracing::info!("Webhook router shut down");

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
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
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
