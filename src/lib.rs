pub mod config;
pub mod connection;
pub mod cosmos;
pub mod error;
pub mod health;
pub mod logging;
pub mod model;
pub mod pagination;
pub mod provision;
pub mod repository;
pub mod server;
pub mod shutdown;
pub mod store;

pub use config::{CliArgs, ConnectionMode, ConsistencyLevel, ServerConfig, StoreBackend};
pub use connection::{ConnectionHandle, ConnectionManager, ConnectionOptions};
pub use error::{ERROR_METRICS, ErrorKind, ResultExt, StoreError, StoreResult};
pub use logging::{LoggingConfig, init_logging};
pub use model::Project;
pub use pagination::{PageCursor, ScanOptions};
pub use provision::{ProvisionedContainer, ProvisioningOptions, ensure_ready};
pub use repository::ProjectRepository;
pub use shutdown::{ShutdownConfig, ShutdownCoordinator};
pub use store::{DocumentStore, InMemoryStore};

use anyhow::Result;
use shutdown::{CompositeShutdownHandler, ConnectionShutdownHandler};
use std::{future::IntoFuture, sync::Arc};
use tokio::net::TcpListener;

/// Connect, provision, serve the REST API until a shutdown signal, then tear down.
///
/// Provisioning failure aborts startup before the listener is bound.
pub async fn run_server(config: ServerConfig) -> Result<()> {
    let manager = Arc::new(ConnectionManager::new());

    let handle = match config.backend {
        StoreBackend::Cosmos => manager
            .connect(&config.connection_options()?)
            .with_operation("connect")?,
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store; data is lost on exit");
            manager
                .attach(Arc::new(InMemoryStore::new()))
                .with_operation("connect")?
        }
    };

    tracing::info!(
        backend = %config.backend,
        database = %config.database,
        container = %config.container,
        "provisioning store resources",
    );

    let container = match ensure_ready(&handle, &config.provisioning_options()).await {
        Ok(container) => container,
        Err(err) => {
            tracing::error!(error = %err, "startup aborted: provisioning failed");
            manager.shutdown().await;
            return Err::<(), _>(err).with_operation("provision");
        }
    };

    let target = container.target().clone();
    let repository = ProjectRepository::with_scan_options(container, config.scan_options());
    let health_checker = Arc::new(health::HealthChecker::new(handle, target));
    let router = server::build_router(repository, health_checker);

    let coordinator = Arc::new(ShutdownCoordinator::new(
        ShutdownConfig::default().with_total_timeout(config.shutdown_timeout_secs),
    ));
    let mut composite_handler = CompositeShutdownHandler::new();
    composite_handler.add_handler(Box::new(ConnectionShutdownHandler::new(manager.clone())));

    let listener = match TcpListener::bind(config.http_bind_address).await {
        Ok(listener) => listener,
        Err(err) => {
            manager.shutdown().await;
            return Err(anyhow::Error::from(err)
                .context(format!("failed to bind {}", config.http_bind_address)));
        }
    };
    let actual_addr = listener.local_addr()?;
    tracing::info!(transport = "http", bind = %actual_addr, path = server::API_BASE_PATH, "listening");

    let signal_coordinator = coordinator.clone();
    tokio::spawn(async move {
        signal_coordinator.wait_for_signal().await;
    });

    let token = coordinator.token();
    let server_future = axum::serve(listener, router)
        .with_graceful_shutdown(async move { token.cancelled().await })
        .into_future();
    tokio::pin!(server_future);

    // Serve until shutdown begins, then give in-flight requests the drain budget.
    let shutdown_started = coordinator.token();
    let server_result = tokio::select! {
        result = &mut server_future => Some(result),
        _ = shutdown_started.cancelled() => coordinator.drain(&mut server_future).await,
    };

    tracing::info!("server stopped, running shutdown handlers");
    if let Err(e) = coordinator.close(&composite_handler).await {
        tracing::error!("error during shutdown: {}", e);
    }

    match server_result {
        Some(result) => result.map_err(anyhow::Error::from),
        None => Ok(()),
    }
}
