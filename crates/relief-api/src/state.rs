//! Shared application state for the API server.
//!
//! [`AppState`] is wrapped in an [`Arc`] and injected into every handler
//! via Axum's `State` extractor. It is built once at startup; nothing in
//! it is swapped at runtime.

use std::sync::Arc;
use std::time::Duration;

use relief_core::config::ReliefConfig;
use relief_core::{Clock, IdentityResolver, StaticDirectory};
use relief_db::{MemoryCache, MemoryStore, RecordStore, ResponseCache};

use crate::bus::BroadcastBus;
use crate::coordinator::{Coordinator, CoordinatorSettings};
use crate::verifier::ImageVerifier;

/// Shared state for the Axum application.
pub struct AppState {
    /// The mutation and query pipeline.
    pub coordinator: Coordinator,
    /// Resolves the requesting user of every call.
    pub identity: Arc<dyn IdentityResolver>,
    /// Image verification backend.
    pub verifier: ImageVerifier,
    /// Per-request deadline applied by the router.
    pub request_timeout: Duration,
}

impl AppState {
    /// Assemble state from already-built parts.
    pub fn new(
        coordinator: Coordinator,
        identity: Arc<dyn IdentityResolver>,
        verifier: ImageVerifier,
        config: &ReliefConfig,
    ) -> Self {
        Self {
            coordinator,
            identity,
            verifier,
            request_timeout: Duration::from_millis(config.server.request_timeout_ms),
        }
    }

    /// State backed entirely by in-process stores: memory record store,
    /// memory cache, the configured user directory, and the verifier the
    /// configuration selects.
    pub fn in_memory(config: &ReliefConfig, clock: Arc<dyn Clock>) -> Self {
        let store = RecordStore::from(MemoryStore::new());
        let cache = ResponseCache::from(
            MemoryCache::new(Arc::clone(&clock)).with_max_entries(config.cache.max_entries),
        );
        let coordinator = Coordinator::new(
            store,
            cache,
            BroadcastBus::new(),
            clock,
            CoordinatorSettings::from_config(config),
        );
        Self::new(
            coordinator,
            Arc::new(StaticDirectory::from_config(&config.identity)),
            ImageVerifier::from_service_url(config.verification.service_url.as_deref()),
            config,
        )
    }
}
