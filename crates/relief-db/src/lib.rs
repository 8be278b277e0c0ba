//! Data layer for the relief coordination core.
//!
//! `PostgreSQL` is the durable source of truth for disaster records,
//! resources, and reports. `Dragonfly` optionally fronts derived reads as
//! a shared cache. Both have in-memory counterparts used for development
//! and tests, selected at startup through enum dispatch.
//!
//! ```text
//! Coordinator
//!     |
//!     +-- RecordStore ---> PgRecordStore (PostgresPool) | MemoryStore
//!     |
//!     +-- ResponseCache -> DragonflyCache (DragonflyPool) | MemoryCache
//! ```
//!
//! # Modules
//!
//! - [`store`] -- Record store contract and backend dispatch
//! - [`pg_store`] -- `PostgreSQL` record store
//! - [`memory`] -- In-memory record store
//! - [`postgres`] -- `PostgreSQL` connection pool and configuration
//! - [`cache`] -- Response cache contract and backends
//! - [`dragonfly`] -- `Dragonfly` (Redis-compatible) connection
//! - [`error`] -- Shared error types

pub mod cache;
pub mod dragonfly;
pub mod error;
pub mod memory;
pub mod pg_store;
pub mod postgres;
pub mod store;

pub use cache::{CacheEntry, CacheLookup, DragonflyCache, MemoryCache, ResponseCache};
pub use dragonfly::DragonflyPool;
pub use error::StoreError;
pub use memory::MemoryStore;
pub use pg_store::{DisasterRow, PgRecordStore, ReportRow, ResourceRow};
pub use postgres::{PostgresConfig, PostgresPool};
pub use store::{NewRecord, RecordFilter, RecordStore};
