//! Error types for the service binary.
//!
//! [`LaunchError`] wraps every failure mode between process start and a
//! clean listener shutdown, so `main` can propagate with `?`.

/// Top-level error for the service binary.
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    /// Configuration loading failed.
    #[error("config error: {source}")]
    Config {
        /// The underlying config error.
        #[from]
        source: relief_core::ConfigError,
    },

    /// A storage or cache backend could not be reached or migrated.
    #[error("backend error: {source}")]
    Backend {
        /// The underlying store error.
        #[from]
        source: relief_db::StoreError,
    },

    /// The HTTP listener failed to bind or serve.
    #[error("server error: {source}")]
    Server {
        /// The underlying server error.
        #[from]
        source: relief_api::ServerError,
    },
}
