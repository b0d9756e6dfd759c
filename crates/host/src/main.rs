//! Host entry point.

use std::sync::Arc;

use host::config::Config;
use host::error::HostError;
use host::service::BusService;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use transport::InMemNetwork;

/// Waits for a shutdown signal (SIGINT or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
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

async fn run(config: Config) -> Result<(), HostError> {
    // 1. Install Prometheus metrics recorder
    let metrics_handle = metrics_exporter_prometheus::PrometheusBuilder::new()
        .install_recorder()
        .map_err(|e| std::io::Error::other(e.to_string()))?;

    // 2. Start the bus and hand it to the background service
    let network = InMemNetwork::new();
    let state = host::start_bus(&config, &network).await?;
    let service = BusService::new(state.bus.clone());
    let stopping = service.stopping_token();
    let service_task = tokio::spawn(service.run());

    // 3. Demo traffic
    if config.demo_messages > 0 {
        host::invoices::send_demo_invoices(&state.bus, config.demo_messages).await?;
    }

    // 4. Serve until a shutdown signal arrives
    let app = host::create_app(Arc::clone(&state), metrics_handle);
    let addr = config.addr();
    tracing::info!(%addr, "starting host");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await;

    // 5. Stop the bus whether or not the server exited cleanly
    stop(stopping, service_task).await;
    served?;

    tracing::info!("host shut down gracefully");
    Ok(())
}

async fn stop(stopping: CancellationToken, service_task: tokio::task::JoinHandle<()>) {
    stopping.cancel();
    if let Err(e) = service_task.await {
        tracing::error!(error = %e, "bus service panicked");
    }
}

#[tokio::main]
async fn main() {
    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run(config).await {
        tracing::error!(error = %e, "host failed");
        std::process::exit(1);
    }
}
