//! Error types for the data layer.
//!
//! Every adapter and cache failure surfaces as a [`StoreError`] carrying
//! a human-readable cause. Nothing in this crate retries; retry policy
//! belongs to the caller.

/// Errors that can occur in the data layer.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A `PostgreSQL` operation failed.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] sqlx::Error),

    /// A `PostgreSQL` migration failed.
    #[error("PostgreSQL migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A `Dragonfly`/Redis operation failed.
    #[error("Dragonfly error: {0}")]
    Dragonfly(#[from] fred::error::Error),

    /// A serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The addressed record does not exist (or was deleted).
    #[error("not found: {0}")]
    NotFound(String),

    /// The backend refused the input (constraint violation, bad value).
    #[error("rejected: {0}")]
    Rejected(String),

    /// The backend is not reachable.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A configuration error.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl StoreError {
    /// Whether the failure is the caller's fault rather than the backend's.
    pub const fn is_client_error(&self) -> bool {
        matches!(self, Self::NotFound(_) | Self::Rejected(_))
    }
}

/// Classify a `sqlx` error, turning constraint violations into
/// [`StoreError::Rejected`].
pub(crate) fn classify_sqlx(err: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &err
        && (db.is_foreign_key_violation() || db.is_check_violation() || db.is_unique_violation())
    {
        return StoreError::Rejected(db.message().to_owned());
    }
    StoreError::Postgres(err)
}
