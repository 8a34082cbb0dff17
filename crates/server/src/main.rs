//! Booking server entry point.

use std::sync::Arc;
use std::time::Duration;

use booking::{
    ExpirationSweeper, InMemorySoldOutRanking, RedisSoldOutRanking, SoldOutRanking,
};
use common::SystemClock;
use distributed_lock::{DistributedLock, InMemoryLock, LockManager, RedisLock};
use metrics_exporter_prometheus::PrometheusHandle;
use server::config::{Config, LogFormat};
use server::error::ServerError;
use store::{InMemoryStore, PostgresStore, Store};
use tokio::signal;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

const WORKER_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("received SIGINT, starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        }
    }
}

fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    let registry = tracing_subscriber::registry().with(filter);
    match config.log_format {
        LogFormat::Json => registry
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Text => registry.with(tracing_subscriber::fmt::layer()).init(),
    }
}

async fn open_store(database_url: &str) -> Result<PostgresStore, ServerError> {
    let store = PostgresStore::connect(database_url).await?;
    store.run_migrations().await?;
    tracing::info!("connected to PostgreSQL, migrations applied");
    Ok(store)
}

async fn open_redis(
    redis_url: &str,
) -> Result<(RedisLock, Arc<dyn SoldOutRanking>), ServerError> {
    let lock = RedisLock::connect(redis_url).await?;
    let ranking: Arc<dyn SoldOutRanking> = Arc::new(RedisSoldOutRanking::connect(redis_url).await?);
    tracing::info!("connected to Redis");
    Ok((lock, ranking))
}

fn in_memory_ranking() -> Arc<dyn SoldOutRanking> {
    Arc::new(InMemorySoldOutRanking::new())
}

/// Runs the HTTP server and background tasks until a shutdown signal.
async fn serve<S, L>(
    config: Config,
    store: S,
    lock: L,
    ranking: Arc<dyn SoldOutRanking>,
    metrics_handle: PrometheusHandle,
) -> Result<(), ServerError>
where
    S: Store + Clone,
    L: DistributedLock + 'static,
{
    // 1. Services and the notification worker
    let locks = LockManager::with_settings(lock, config.lock_settings());
    let (state, worker) = server::create_default_state(store.clone(), locks, ranking, &config);
    let worker = tokio::spawn(worker.run());

    // 2. Expiration sweeper
    let (stop_sweeper, mut sweeper_stopped) = tokio::sync::watch::channel(false);
    let sweeper = ExpirationSweeper::new(store, SystemClock, config.sweep_interval());
    let sweeper = tokio::spawn(sweeper.run(async move {
        let _ = sweeper_stopped.changed().await;
    }));

    // 3. HTTP
    let app = server::create_app(state, metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting booking server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    // 4. Stop the sweeper, then let the worker drain what is already queued
    let _ = stop_sweeper.send(true);
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "sweeper task failed");
    }
    match tokio::time::timeout(WORKER_DRAIN_TIMEOUT, worker).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "notification worker failed"),
        Err(_) => tracing::warn!("notification worker did not drain in time"),
    }

    tracing::info!("server shut down gracefully");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), ServerError> {
    let config = Config::from_env();

    // 1. Initialize tracing
    init_tracing(&config);

    // 2. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new().install_recorder()?;

    // 3. Pick backends and run
    match (config.database_url.clone(), config.redis_url.clone()) {
        (Some(database_url), Some(redis_url)) => {
            let store = open_store(&database_url).await?;
            let (lock, ranking) = open_redis(&redis_url).await?;
            serve(config, store, lock, ranking, metrics_handle).await
        }
        (Some(database_url), None) => {
            tracing::warn!("REDIS_URL not set; lock and ranking are process-local");
            let store = open_store(&database_url).await?;
            serve(config, store, InMemoryLock::new(), in_memory_ranking(), metrics_handle).await
        }
        (None, Some(redis_url)) => {
            tracing::warn!("DATABASE_URL not set; using the in-memory store");
            let (lock, ranking) = open_redis(&redis_url).await?;
            serve(config, InMemoryStore::new(), lock, ranking, metrics_handle).await
        }
        (None, None) => {
            tracing::warn!("DATABASE_URL and REDIS_URL not set; running fully in memory");
            serve(
                config,
                InMemoryStore::new(),
                InMemoryLock::new(),
                in_memory_ranking(),
                metrics_handle,
            )
            .await
        }
    }
}
