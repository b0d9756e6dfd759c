//! Bus host: runs the message bus as a background service next to an HTTP
//! server exposing health, metrics and live saga state.

pub mod config;
pub mod error;
pub mod invoices;
pub mod routes;
pub mod service;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use bus::{Bus, BusBuilder};
use metrics_exporter_prometheus::PrometheusHandle;
use saga_storage::{
    InMemorySagaStorage, PersistedSagas, PostgresSagaStorage, SagaStorage, SagaStorageError,
    SagaStorageTap,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use transport::{FaultInjectingTransport, FaultInjectionOptions, InMemNetwork, InMemoryTransport};

use crate::config::Config;
use crate::error::Result;

/// Shared state of the HTTP handlers.
pub struct AppState {
    pub bus: Arc<Bus>,
    pub persisted: PersistedSagas,
}

/// Creates the Axum application router.
pub fn create_app(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::render))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/sagas", get(routes::sagas::list))
        .route("/sagas/{saga_type}", get(routes::sagas::of_type))
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

/// Opens the configured saga storage, wrapped in a tap that records every
/// persisted instance.
pub async fn saga_storage(config: &Config) -> Result<(Arc<dyn SagaStorage>, PersistedSagas)> {
    let persisted = PersistedSagas::new();
    let storage: Arc<dyn SagaStorage> = match &config.database_url {
        Some(url) => {
            let pool = PgPoolOptions::new().max_connections(5).connect(url).await?;
            let storage = PostgresSagaStorage::new(pool);
            storage
                .run_migrations()
                .await
                .map_err(SagaStorageError::from)?;
            tracing::info!("Using PostgreSQL saga storage");
            Arc::new(SagaStorageTap::new(storage, persisted.clone()))
        }
        None => {
            tracing::info!("Using in-memory saga storage");
            Arc::new(SagaStorageTap::new(
                InMemorySagaStorage::new(),
                persisted.clone(),
            ))
        }
    };
    Ok((storage, persisted))
}

/// Starts the bus on `network` with the demo workflow registered.
pub async fn start_bus(config: &Config, network: &InMemNetwork) -> Result<Arc<AppState>> {
    let (storage, persisted) = saga_storage(config).await?;
    let transport = InMemoryTransport::new(network.clone(), config.input_queue.clone());

    let builder = BusBuilder::new()
        .with_saga_storage(storage)
        .with_options(config.bus.clone());
    let builder = if config.fault_commit_probability > 0.0 {
        tracing::warn!(
            probability = config.fault_commit_probability,
            "Injecting commit failures into received messages"
        );
        builder.with_transport(FaultInjectingTransport::new(
            transport,
            FaultInjectionOptions {
                commit_failure_probability: config.fault_commit_probability,
                receive_delay: None,
            },
        ))
    } else {
        builder.with_transport(transport)
    };

    let bus = invoices::register(builder)?.start().await?;
    Ok(Arc::new(AppState {
        bus: Arc::new(bus),
        persisted,
    }))
}
