//! Service binary for disaster relief coordination.
//!
//! Loads configuration, connects the configured record store and
//! response cache, and serves the HTTP and `WebSocket` API until
//! `Ctrl+C`.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from `relief-config.yaml` (or the path in
//!    `RELIEF_CONFIG`, or the first argument)
//! 2. Initialize structured logging (tracing)
//! 3. Connect the record store, running migrations for `PostgreSQL`
//! 4. Connect the response cache
//! 5. Assemble the coordinator and application state
//! 6. Serve until shutdown

mod error;

use std::path::PathBuf;
use std::sync::Arc;

use relief_api::{AppState, BroadcastBus, Coordinator, CoordinatorSettings, ImageVerifier, ServerConfig};
use relief_core::config::{CacheBackendKind, LoggingConfig, StoreBackendKind};
use relief_core::{Clock, ReliefConfig, StaticDirectory, SystemClock};
use relief_db::{
    DragonflyCache, DragonflyPool, MemoryCache, MemoryStore, PostgresConfig, PostgresPool,
    RecordStore, ResponseCache,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::error::LaunchError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "relief-config.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, a backend connection, or the
/// listener fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = load_config()?;
    init_tracing(&config.logging);

    info!(
        host = config.server.host,
        port = config.server.port,
        store = ?config.infrastructure.store,
        cache = ?config.infrastructure.cache,
        "relief-server starting"
    );

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let store = connect_store(&config).await?;
    let cache = connect_cache(&config, Arc::clone(&clock)).await?;
    info!(store = store.name(), cache = cache.name(), "Backends ready");

    let coordinator = Coordinator::new(
        store,
        cache,
        BroadcastBus::new(),
        clock,
        CoordinatorSettings::from_config(&config),
    );
    let verifier = ImageVerifier::from_service_url(config.verification.service_url.as_deref());
    info!(verifier = verifier.name(), "Image verifier selected");

    let state = Arc::new(AppState::new(
        coordinator,
        Arc::new(StaticDirectory::from_config(&config.identity)),
        verifier,
        &config,
    ));

    relief_api::start_server(&ServerConfig::from(&config.server), state)
        .await
        .map_err(LaunchError::from)?;

    info!("relief-server shutdown complete");
    Ok(())
}

/// Install the global tracing subscriber.
///
/// `RUST_LOG` wins over the configured level when set.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    if logging.json {
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

/// Resolve the configuration path from `RELIEF_CONFIG`, then the first
/// argument, then the default.
fn config_path() -> PathBuf {
    std::env::var_os("RELIEF_CONFIG")
        .or_else(|| std::env::args_os().nth(1))
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from)
}

/// Load configuration. A missing file yields defaults with environment
/// overrides applied.
fn load_config() -> Result<ReliefConfig, LaunchError> {
    let path = config_path();
    if path.exists() {
        Ok(ReliefConfig::from_file(&path)?)
    } else {
        let mut config = ReliefConfig::default();
        config.apply_env_overrides();
        Ok(config)
    }
}

async fn connect_store(config: &ReliefConfig) -> Result<RecordStore, LaunchError> {
    match config.infrastructure.store {
        StoreBackendKind::Postgres => {
            let pool =
                PostgresPool::connect(&PostgresConfig::from(&config.infrastructure))
                    .await?;
            pool.run_migrations().await?;
            Ok(RecordStore::from(pool.record_store()))
        }
        StoreBackendKind::Memory => {
            info!("Using in-memory record store, data is lost on restart");
            Ok(RecordStore::from(MemoryStore::new()))
        }
    }
}

async fn connect_cache(
    config: &ReliefConfig,
    clock: Arc<dyn Clock>,
) -> Result<ResponseCache, LaunchError> {
    match config.infrastructure.cache {
        CacheBackendKind::Dragonfly => {
            let pool = DragonflyPool::connect(&config.infrastructure.dragonfly_url).await?;
            Ok(ResponseCache::from(DragonflyCache::new(pool, clock)))
        }
        CacheBackendKind::Memory => Ok(ResponseCache::from(
            MemoryCache::new(clock).with_max_entries(config.cache.max_entries),
        )),
    }
}
