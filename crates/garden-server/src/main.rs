//! Garden grid service binary.
//!
//! Wires the persistence backend, the garden state store, the viewer hub,
//! and the HTTP server together, then serves until `Ctrl-C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `garden-config.yaml` (path overridable with
//!    `GARDEN_CONFIG`)
//! 2. Initialize structured logging (tracing)
//! 3. Open the persistence backend (`memory` or `postgres`)
//! 4. Hydrate the state store from persisted gardens
//! 5. Start the persistence worker
//! 6. Create the viewer hub and ingestion gateway
//! 7. Serve HTTP until `Ctrl-C`
//! 8. Flush queued writes, close the database pool and exit

mod error;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use garden_core::config::{LoggingConfig, PersistenceConfig};
use garden_core::{
    spawn_persistence, GardenConfig, GardenRepository, GardenStateStore, MemoryRepository,
    RetryPolicy, StorageBackend, SyncHub,
};
use garden_db::{PostgresConfig, PostgresPool, PostgresRepository};
use garden_observer::{AppState, ServerConfig};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::ServerAppError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "garden-config.yaml";

/// How long shutdown waits for the persistence queue to drain.
const SHUTDOWN_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Application entry point.
///
/// # Errors
///
/// Returns an error if any initialization step or the server fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let config_path = std::env::var("GARDEN_CONFIG")
        .map_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);
    let config = GardenConfig::load_or_default(&config_path).map_err(ServerAppError::from)?;

    // 2. Initialize structured logging.
    init_logging(&config.logging);
    info!(
        config_path = %config_path.display(),
        backend = ?config.storage.backend,
        port = config.server.port,
        viewer_queue_capacity = config.sync.viewer_queue_capacity,
        "garden-server starting"
    );

    // 3-5. Open the backend, hydrate, start the persistence worker.
    let (store, _worker, db_pool) = match config.storage.backend {
        StorageBackend::Memory => {
            warn!("Using in-memory storage; garden state is lost on restart");
            let (store, worker) =
                start_persistence(MemoryRepository::new(), &config.persistence).await?;
            (store, worker, None)
        }
        StorageBackend::Postgres => {
            let pool = PostgresPool::connect(&PostgresConfig::from(&config.storage))
                .await
                .map_err(ServerAppError::from)?;
            pool.run_migrations().await.map_err(ServerAppError::from)?;
            let (store, worker) =
                start_persistence(PostgresRepository::new(pool.clone()), &config.persistence)
                    .await?;
            (store, worker, Some(pool))
        }
    };
    info!(gardens = store.len().await, "Garden state ready");

    // 6. Viewer hub and ingestion gateway.
    let hub = Arc::new(SyncHub::new(config.sync.viewer_queue_capacity));
    let state = Arc::new(AppState::from_parts(store, hub));

    // 7. Serve until Ctrl-C.
    let server_config = ServerConfig::from(&config.server);
    garden_observer::start_server(&server_config, Arc::clone(&state), shutdown_signal())
        .await
        .map_err(ServerAppError::from)?;

    // 8. Flush queued writes before exiting.
    match tokio::time::timeout(SHUTDOWN_FLUSH_TIMEOUT, state.gateway().store().flush()).await {
        Ok(Ok(())) => info!("Persistence queue flushed"),
        Ok(Err(e)) => error!(error = %e, "Persistence queue flush failed"),
        Err(_elapsed) => warn!(
            timeout_secs = SHUTDOWN_FLUSH_TIMEOUT.as_secs(),
            "Persistence queue did not drain before timeout"
        ),
    }
    if let Some(pool) = db_pool {
        pool.close().await;
    }

    info!("garden-server stopped");
    Ok(())
}

/// Install the global tracing subscriber. `RUST_LOG` overrides the
/// configured level.
fn init_logging(config: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.level));
    if config.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Load persisted gardens from `repo`, then hand it to a persistence
/// worker and build the store on top.
async fn start_persistence<R: GardenRepository>(
    repo: R,
    config: &PersistenceConfig,
) -> Result<(GardenStateStore, JoinHandle<()>), ServerAppError> {
    let records = repo.load_gardens().await?;
    let policy = RetryPolicy::from(config);
    let (handle, worker) = spawn_persistence(repo, policy);
    let handle = handle.with_query_timeout(config.query_timeout());
    info!(
        max_attempts = policy.max_attempts,
        initial_backoff_ms = config.initial_backoff_ms,
        query_timeout_ms = config.query_timeout_ms,
        "Persistence worker started"
    );
    Ok((GardenStateStore::hydrate(records, handle), worker))
}

/// Resolve on `Ctrl-C`.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for Ctrl-C; running until killed");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
