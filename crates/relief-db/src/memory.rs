//! Process-local record store.
//!
//! Backs development runs and the test suite. Every operation takes the
//! single [`RwLock`] for its whole duration, which gives the same
//! single-record atomicity the `PostgreSQL` store gets from row locks.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use relief_core::{append_entry, great_circle_distance, GeoPoint, NearbyQuery};
use relief_types::{
    AuditEntry, Disaster, DisasterId, DisasterPatch, NewReport, NewResource, Report, ReportId,
    Resource, ResourceId, VerificationStatus,
};
use tokio::sync::RwLock;

use crate::error::StoreError;
use crate::store::{NewRecord, RecordFilter};

fn store_millis(slot: &AtomicU64, delay: Duration) {
    slot.store(u64::try_from(delay.as_millis()).unwrap_or(u64::MAX), Ordering::Relaxed);
}

async fn hold(slot: &AtomicU64) {
    let millis = slot.load(Ordering::Relaxed);
    if millis > 0 {
        tokio::time::sleep(Duration::from_millis(millis)).await;
    }
}

#[derive(Default)]
struct Tables {
    disasters: BTreeMap<DisasterId, Disaster>,
    resources: BTreeMap<ResourceId, Resource>,
    reports: BTreeMap<ReportId, Report>,
}

/// In-memory [`RecordStore`](crate::RecordStore) backend.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
    nearby_calls: AtomicU64,
    unavailable: AtomicBool,
    ack_delay_ms: AtomicU64,
    list_delay_ms: AtomicU64,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of nearby-resource calls served so far.
    pub fn nearby_calls(&self) -> u64 {
        self.nearby_calls.load(Ordering::Relaxed)
    }

    /// Make every subsequent call fail with [`StoreError::Unavailable`],
    /// or restore normal operation.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::Relaxed);
    }

    /// Hold back the reply of every committed write by `delay`, the way a
    /// slow link delays a database's commit acknowledgement.
    pub fn set_ack_delay(&self, delay: Duration) {
        store_millis(&self.ack_delay_ms, delay);
    }

    /// Hold back the reply of every record listing by `delay`. The rows
    /// are read before the wait, so writes made meanwhile are not in it.
    pub fn set_list_delay(&self, delay: Duration) {
        store_millis(&self.list_delay_ms, delay);
    }

    async fn acknowledge(&self) {
        hold(&self.ack_delay_ms).await;
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::Relaxed) {
            return Err(StoreError::Unavailable(String::from(
                "memory store switched off",
            )));
        }
        Ok(())
    }

    pub(crate) async fn create(&self, record: NewRecord) -> Result<Disaster, StoreError> {
        self.check_available()?;
        let disaster = Disaster {
            id: DisasterId::new(),
            title: record.title,
            location_name: record.location_name,
            description: record.description,
            tags: record.tags,
            owner_id: record.owner_id,
            created_at: record.created_at,
            audit_trail: record.audit_trail,
        };
        self.tables
            .write()
            .await
            .disasters
            .insert(disaster.id, disaster.clone());
        self.acknowledge().await;
        Ok(disaster)
    }

    pub(crate) async fn get(&self, id: DisasterId) -> Result<Disaster, StoreError> {
        self.check_available()?;
        self.tables
            .read()
            .await
            .disasters
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(format!("disaster {id}")))
    }

    pub(crate) async fn get_all(&self, filter: &RecordFilter) -> Result<Vec<Disaster>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut records: Vec<Disaster> = tables
            .disasters
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        drop(tables);
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        hold(&self.list_delay_ms).await;
        Ok(records)
    }

    pub(crate) async fn update(
        &self,
        id: DisasterId,
        patch: &DisasterPatch,
        entry: &AuditEntry,
    ) -> Result<Disaster, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        let record = tables
            .disasters
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("disaster {id}")))?;
        patch.apply_to(record);
        record.audit_trail = append_entry(
            Some(&record.audit_trail),
            entry.action,
            &entry.user_id,
            entry.timestamp,
        );
        let updated = record.clone();
        drop(tables);
        self.acknowledge().await;
        Ok(updated)
    }

    pub(crate) async fn delete(&self, id: DisasterId) -> Result<(), StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if tables.disasters.remove(&id).is_none() {
            return Err(StoreError::NotFound(format!("disaster {id}")));
        }
        tables.resources.retain(|_, r| r.disaster_id != id);
        tables.reports.retain(|_, r| r.disaster_id != id);
        drop(tables);
        self.acknowledge().await;
        Ok(())
    }

    pub(crate) async fn create_resource(
        &self,
        disaster_id: DisasterId,
        resource: &NewResource,
        created_at: DateTime<Utc>,
    ) -> Result<Resource, StoreError> {
        self.check_available()?;
        GeoPoint::new(resource.lat, resource.lon)
            .map_err(|e| StoreError::Rejected(e.to_string()))?;
        let mut tables = self.tables.write().await;
        if !tables.disasters.contains_key(&disaster_id) {
            return Err(StoreError::NotFound(format!("disaster {disaster_id}")));
        }
        let row = Resource {
            id: ResourceId::new(),
            disaster_id,
            name: resource.name.clone(),
            resource_type: resource.resource_type.clone(),
            location_name: resource.location_name.clone(),
            lat: resource.lat,
            lon: resource.lon,
            created_at,
        };
        tables.resources.insert(row.id, row.clone());
        Ok(row)
    }

    pub(crate) async fn list_resources(
        &self,
        disaster_id: DisasterId,
    ) -> Result<Vec<Resource>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut rows: Vec<Resource> = tables
            .resources
            .values()
            .filter(|r| r.disaster_id == disaster_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }

    pub(crate) async fn nearby_resources(
        &self,
        query: &NearbyQuery,
    ) -> Result<Vec<Resource>, StoreError> {
        self.check_available()?;
        self.nearby_calls.fetch_add(1, Ordering::Relaxed);
        let tables = self.tables.read().await;
        Ok(tables
            .resources
            .values()
            .filter(|r| r.disaster_id == query.disaster_id)
            .filter(|r| {
                GeoPoint::new(r.lat, r.lon).is_ok_and(|point| {
                    great_circle_distance(query.center, point) <= query.radius_meters
                })
            })
            .cloned()
            .collect())
    }

    pub(crate) async fn create_report(
        &self,
        disaster_id: DisasterId,
        user_id: &str,
        report: &NewReport,
        created_at: DateTime<Utc>,
    ) -> Result<Report, StoreError> {
        self.check_available()?;
        let mut tables = self.tables.write().await;
        if !tables.disasters.contains_key(&disaster_id) {
            return Err(StoreError::NotFound(format!("disaster {disaster_id}")));
        }
        let row = Report {
            id: ReportId::new(),
            disaster_id,
            user_id: user_id.to_owned(),
            content: report.content.clone(),
            image_url: report.image_url.clone(),
            verification_status: VerificationStatus::Pending,
            created_at,
        };
        tables.reports.insert(row.id, row.clone());
        Ok(row)
    }

    pub(crate) async fn list_reports(
        &self,
        disaster_id: DisasterId,
    ) -> Result<Vec<Report>, StoreError> {
        self.check_available()?;
        let tables = self.tables.read().await;
        let mut rows: Vec<Report> = tables
            .reports
            .values()
            .filter(|r| r.disaster_id == disaster_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        Ok(rows)
    }
}
