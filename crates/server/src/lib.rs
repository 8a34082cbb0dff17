//! HTTP server for the seat booking system.
//!
//! Exposes seat claim, cancellation and payment over REST, runs the expiry
//! sweeper and the payment notification worker in the background, and
//! reports through structured logging (tracing) and Prometheus metrics.

pub mod config;
pub mod error;
pub mod routes;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use booking::{
    DataPlatformListener, NotificationWorker, PaymentPublisher, SoldOutRanking,
    SoldOutRankingListener,
};
use distributed_lock::{DistributedLock, LockManager};
use metrics_exporter_prometheus::PrometheusHandle;
use store::Store;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use state::AppState;

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S, L>(state: Arc<AppState<S, L>>, metrics_handle: PrometheusHandle) -> Router
where
    S: Store + Clone,
    L: DistributedLock + 'static,
{
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/seats/{id}", get(routes::seats::get::<S, L>))
        .route("/reservations", post(routes::reservations::claim::<S, L>))
        .route(
            "/reservations/{id}",
            get(routes::reservations::get::<S, L>).delete(routes::reservations::cancel::<S, L>),
        )
        .route(
            "/reservations/{id}/payment",
            post(routes::reservations::pay::<S, L>),
        )
        .route("/rankings/sold-out", get(routes::rankings::sold_out::<S, L>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Creates the application state and a notification worker with the
/// sold-out ranking and data platform listeners registered.
///
/// The worker stops once the returned state, which owns the only publisher,
/// has been dropped.
pub fn create_default_state<S, L>(
    store: S,
    locks: LockManager<L>,
    ranking: Arc<dyn SoldOutRanking>,
    config: &Config,
) -> (Arc<AppState<S, L>>, NotificationWorker)
where
    S: Store + Clone,
    L: DistributedLock + 'static,
{
    let (publisher, receiver) = PaymentPublisher::channel(config.notification_buffer);

    let mut worker = NotificationWorker::new(receiver);
    worker.register(Box::new(SoldOutRankingListener::new(
        store.clone(),
        ranking.clone(),
    )));
    worker.register(Box::new(DataPlatformListener));

    let state = Arc::new(AppState::new(
        store,
        locks,
        ranking,
        config.booking_policy(),
        publisher,
    ));

    (state, worker)
}
