//! The record store adapter.
//!
//! [`RecordStore`] is the narrow contract the coordination core talks
//! to. It owns no coordination logic: it stores, filters, and applies
//! audit entries atomically per record, nothing more.
//!
//! # Contract
//!
//! | Operation | Atomicity |
//! |-----------|-----------|
//! | `create` | single insert |
//! | `get_all` | single read |
//! | `update` | row lock: patch applied and entry appended together |
//! | `delete` | single delete; dependent resources/reports go with it |
//!
//! Uses enum dispatch rather than a trait object because async methods
//! are not dyn-compatible.

use chrono::{DateTime, Utc};
use relief_core::NearbyQuery;
use relief_types::{
    AuditEntry, Disaster, DisasterId, DisasterPatch, NewReport, NewResource, Report, Resource,
};

use crate::error::StoreError;
use crate::memory::MemoryStore;
use crate::pg_store::PgRecordStore;

/// Filter for [`RecordStore::get_all`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    /// Only records whose tag set contains this tag.
    pub tag: Option<String>,
}

impl RecordFilter {
    /// Filter on tag membership.
    pub fn tagged(tag: impl Into<String>) -> Self {
        Self {
            tag: Some(tag.into()),
        }
    }

    /// Whether `record` passes the filter.
    pub fn matches(&self, record: &Disaster) -> bool {
        self.tag.as_deref().is_none_or(|tag| record.has_tag(tag))
    }
}

/// A record ready for insertion. The store assigns the id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewRecord {
    /// Short human title.
    pub title: String,
    /// Free-form place name.
    pub location_name: String,
    /// Free-text description.
    pub description: String,
    /// Deduplicated tags.
    pub tags: std::collections::BTreeSet<String>,
    /// Owning identity.
    pub owner_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Initial trail, normally a single `create` entry.
    pub audit_trail: Vec<AuditEntry>,
}

/// A record store backend.
pub enum RecordStore {
    /// `PostgreSQL`-backed store.
    Postgres(PgRecordStore),
    /// Process-local store.
    Memory(MemoryStore),
}

impl RecordStore {
    /// Insert a new record and return it with its assigned id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the backend rejects or fails the insert.
    pub async fn create(&self, record: NewRecord) -> Result<Disaster, StoreError> {
        match self {
            Self::Postgres(store) => store.create(record).await,
            Self::Memory(store) => store.create(record).await,
        }
    }

    /// Fetch one active record.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no active record has `id`.
    pub async fn get(&self, id: DisasterId) -> Result<Disaster, StoreError> {
        match self {
            Self::Postgres(store) => store.get(id).await,
            Self::Memory(store) => store.get(id).await,
        }
    }

    /// All active records passing `filter`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    pub async fn get_all(&self, filter: &RecordFilter) -> Result<Vec<Disaster>, StoreError> {
        match self {
            Self::Postgres(store) => store.get_all(filter).await,
            Self::Memory(store) => store.get_all(filter).await,
        }
    }

    /// Apply `patch` and append `entry` to the trail in one atomic step.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist.
    pub async fn update(
        &self,
        id: DisasterId,
        patch: &DisasterPatch,
        entry: &AuditEntry,
    ) -> Result<Disaster, StoreError> {
        match self {
            Self::Postgres(store) => store.update(id, patch, entry).await,
            Self::Memory(store) => store.update(id, patch, entry).await,
        }
    }

    /// Remove a record from the active set.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the record does not exist, so
    /// a repeated delete is observable as a failure.
    pub async fn delete(&self, id: DisasterId) -> Result<(), StoreError> {
        match self {
            Self::Postgres(store) => store.delete(id).await,
            Self::Memory(store) => store.delete(id).await,
        }
    }

    /// Register a resource under a disaster.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the disaster does not exist.
    pub async fn create_resource(
        &self,
        disaster_id: DisasterId,
        resource: &NewResource,
        created_at: DateTime<Utc>,
    ) -> Result<Resource, StoreError> {
        match self {
            Self::Postgres(store) => store.create_resource(disaster_id, resource, created_at).await,
            Self::Memory(store) => store.create_resource(disaster_id, resource, created_at).await,
        }
    }

    /// All resources of a disaster.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    pub async fn list_resources(&self, disaster_id: DisasterId) -> Result<Vec<Resource>, StoreError> {
        match self {
            Self::Postgres(store) => store.list_resources(disaster_id).await,
            Self::Memory(store) => store.list_resources(disaster_id).await,
        }
    }

    /// Store-side nearby-resource resolution.
    ///
    /// Returns candidate rows; the caller owns the final filter and
    /// ordering.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the call fails.
    pub async fn nearby_resources(&self, query: &NearbyQuery) -> Result<Vec<Resource>, StoreError> {
        match self {
            Self::Postgres(store) => store.nearby_resources(query).await,
            Self::Memory(store) => store.nearby_resources(query).await,
        }
    }

    /// Record a field report with `pending` verification.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the disaster does not exist.
    pub async fn create_report(
        &self,
        disaster_id: DisasterId,
        user_id: &str,
        report: &NewReport,
        created_at: DateTime<Utc>,
    ) -> Result<Report, StoreError> {
        match self {
            Self::Postgres(store) => {
                store
                    .create_report(disaster_id, user_id, report, created_at)
                    .await
            }
            Self::Memory(store) => {
                store
                    .create_report(disaster_id, user_id, report, created_at)
                    .await
            }
        }
    }

    /// All reports of a disaster, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the read fails.
    pub async fn list_reports(&self, disaster_id: DisasterId) -> Result<Vec<Report>, StoreError> {
        match self {
            Self::Postgres(store) => store.list_reports(disaster_id).await,
            Self::Memory(store) => store.list_reports(disaster_id).await,
        }
    }

    /// Human-readable backend name for logging.
    pub const fn name(&self) -> &str {
        match self {
            Self::Postgres(_) => "postgres",
            Self::Memory(_) => "memory",
        }
    }
}

impl From<MemoryStore> for RecordStore {
    fn from(store: MemoryStore) -> Self {
        Self::Memory(store)
    }
}

impl From<PgRecordStore> for RecordStore {
    fn from(store: PgRecordStore) -> Self {
        Self::Postgres(store)
    }
}
