//! The mutation and query pipeline for disaster records.
//!
//! Every mutation follows the same path: build the audit entry, commit
//! through the [`RecordStore`], and only after the commit succeeded
//! publish exactly one [`ChangeEvent`] on the [`BroadcastBus`]. A failed
//! write publishes nothing.
//!
//! Commit and publish run on a spawned task that the caller awaits. A
//! request that times out or whose client hangs up drops only the wait;
//! a write that reached the store is still announced.
//!
//! Derived reads (nearby resources, social-media feed) go through the
//! [`ResponseCache`]. Cache failures are logged and the read falls back
//! to the store; the cache never turns a good read into an error.
//!
//! Nearby results are keyed by a per-disaster resource generation,
//! bumped on every resource insert and on delete, so a result computed
//! before the resource set changed is never served afterwards. The
//! social-media feed is dropped from the cache whenever its record is
//! updated or deleted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, TimeDelta, Utc};
use relief_core::config::ReliefConfig;
use relief_core::{append_entry, new_trail, rank_nearby, Clock, GeoPoint, NearbyQuery};
use relief_db::{CacheLookup, NewRecord, RecordFilter, RecordStore, ResponseCache};
use relief_types::{
    AuditEntry, ChangeAction, ChangeEvent, Disaster, DisasterId, DisasterPatch, Identity,
    NearbyResource, NewDisaster, NewReport, NewResource, Report, Resource, SocialMediaPost,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::bus::BroadcastBus;
use crate::error::ApiError;

/// Tunables of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CoordinatorSettings {
    /// Lifetime of a cached nearby-resources result.
    pub resource_ttl: TimeDelta,
    /// Lifetime of a cached social-media feed.
    pub social_media_ttl: TimeDelta,
    /// Radius used when a nearby query names none.
    pub default_radius_meters: f64,
}

impl CoordinatorSettings {
    /// Derive settings from the loaded configuration.
    pub fn from_config(config: &ReliefConfig) -> Self {
        Self {
            resource_ttl: secs(config.cache.resource_ttl_secs),
            social_media_ttl: secs(config.cache.social_media_ttl_secs),
            default_radius_meters: config.geo.default_radius_meters,
        }
    }
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self::from_config(&ReliefConfig::default())
    }
}

fn secs(value: u64) -> TimeDelta {
    i64::try_from(value)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

fn social_key(disaster_id: DisasterId) -> String {
    format!("social:{disaster_id}")
}

/// Resource generations of the disasters this process has touched.
///
/// Every value handed out comes from one increasing counter. A deleted
/// disaster's entry is removed and the fallback for unknown disasters
/// moves past every value issued so far, so the table only holds live
/// disasters and no disaster ever sees an earlier generation again.
#[derive(Debug, Default)]
struct Generations {
    issued: u64,
    fallback: u64,
    by_disaster: HashMap<DisasterId, u64>,
}

impl Generations {
    fn current(&self, disaster_id: DisasterId) -> u64 {
        self.by_disaster
            .get(&disaster_id)
            .copied()
            .unwrap_or(self.fallback)
    }

    fn bump(&mut self, disaster_id: DisasterId) {
        self.issued = self.issued.saturating_add(1);
        self.by_disaster.insert(disaster_id, self.issued);
    }

    fn retire(&mut self, disaster_id: DisasterId) {
        self.issued = self.issued.saturating_add(1);
        self.fallback = self.issued;
        self.by_disaster.remove(&disaster_id);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.by_disaster.len()
    }
}

/// Run `work` on its own task and wait for it.
///
/// Dropping the returned future abandons the wait, not the work.
async fn detached<T, F>(work: F) -> Result<T, ApiError>
where
    T: Send + 'static,
    F: Future<Output = Result<T, ApiError>> + Send + 'static,
{
    tokio::spawn(work)
        .await
        .map_err(|e| ApiError::Internal(format!("mutation task failed: {e}")))?
}

/// Owns the store, cache, bus, and clock, and sequences every operation
/// across them.
pub struct Coordinator {
    pipeline: Arc<Pipeline>,
}

struct Pipeline {
    store: RecordStore,
    cache: ResponseCache,
    bus: BroadcastBus,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
    generations: Mutex<Generations>,
}

impl Coordinator {
    /// Assemble a coordinator.
    pub fn new(
        store: RecordStore,
        cache: ResponseCache,
        bus: BroadcastBus,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            pipeline: Arc::new(Pipeline {
                store,
                cache,
                bus,
                clock,
                settings,
                generations: Mutex::new(Generations::default()),
            }),
        }
    }

    /// The bus events are published on.
    pub fn bus(&self) -> &BroadcastBus {
        &self.pipeline.bus
    }

    /// The underlying record store.
    pub fn store(&self) -> &RecordStore {
        &self.pipeline.store
    }

    // =========================================================================
    // Disaster records
    // =========================================================================

    /// Create a record owned by `payload.owner_id` (or the requester).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Rejected`] for a blank title and store errors
    /// unchanged.
    pub async fn create_disaster(
        &self,
        actor: &Identity,
        payload: NewDisaster,
    ) -> Result<Disaster, ApiError> {
        let payload = payload.normalized();
        if payload.title.trim().is_empty() {
            return Err(ApiError::Rejected(String::from("title must not be empty")));
        }
        let pipeline = Arc::clone(&self.pipeline);
        let actor = actor.clone();
        detached(async move { pipeline.create_disaster(&actor, payload).await }).await
    }

    /// All active records, optionally filtered by tag.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    pub async fn list_disasters(&self, filter: &RecordFilter) -> Result<Vec<Disaster>, ApiError> {
        Ok(self.pipeline.store.get_all(filter).await?)
    }

    /// One active record.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the record does not exist.
    pub async fn get_disaster(&self, id: DisasterId) -> Result<Disaster, ApiError> {
        Ok(self.pipeline.store.get(id).await?)
    }

    /// Apply a partial update on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the record does not exist.
    pub async fn update_disaster(
        &self,
        actor: &Identity,
        id: DisasterId,
        patch: &DisasterPatch,
    ) -> Result<Disaster, ApiError> {
        if patch.title.as_deref().is_some_and(|t| t.trim().is_empty()) {
            return Err(ApiError::Rejected(String::from("title must not be empty")));
        }
        let pipeline = Arc::clone(&self.pipeline);
        let actor = actor.clone();
        let patch = patch.clone();
        detached(async move { pipeline.update_disaster(&actor, id, &patch).await }).await
    }

    /// Delete a record on behalf of `actor`.
    ///
    /// The `delete` entry is appended to the record's trail and carried
    /// on the event; the record then leaves the active set. Of two
    /// racing deletes only one succeeds, so the event fires once.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the record does not exist.
    pub async fn delete_disaster(&self, actor: &Identity, id: DisasterId) -> Result<(), ApiError> {
        let pipeline = Arc::clone(&self.pipeline);
        let actor = actor.clone();
        detached(async move { pipeline.delete_disaster(&actor, id).await }).await
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// Register a resource under a disaster.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidQuery`] for out-of-range coordinates and
    /// [`ApiError::NotFound`] if the disaster does not exist.
    pub async fn create_resource(
        &self,
        disaster_id: DisasterId,
        payload: &NewResource,
    ) -> Result<Resource, ApiError> {
        GeoPoint::new(payload.lat, payload.lon)?;
        let pipeline = Arc::clone(&self.pipeline);
        let payload = payload.clone();
        detached(async move { pipeline.create_resource(disaster_id, &payload).await }).await
    }

    /// All resources of a disaster.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    pub async fn list_resources(&self, disaster_id: DisasterId) -> Result<Vec<Resource>, ApiError> {
        Ok(self.pipeline.store.list_resources(disaster_id).await?)
    }

    /// Resources of `disaster_id` within `radius_meters` of `(lat, lon)`,
    /// nearest first.
    ///
    /// The query is validated before anything else is touched.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::InvalidQuery`] for bad coordinates or radius,
    /// and store errors unchanged.
    pub async fn nearby(
        &self,
        disaster_id: DisasterId,
        lat: f64,
        lon: f64,
        radius_meters: Option<f64>,
    ) -> Result<Vec<NearbyResource>, ApiError> {
        let p = &self.pipeline;
        let query = NearbyQuery::new(
            disaster_id,
            lat,
            lon,
            radius_meters,
            p.settings.default_radius_meters,
        )?;
        let key = query.cache_key(p.generation(disaster_id));

        if let Some(hit) = p.cached::<Vec<NearbyResource>>(&key).await {
            debug!(%key, "Nearby resources served from cache");
            return Ok(hit);
        }

        let candidates = p.store.nearby_resources(&query).await?;
        let ranked = rank_nearby(&query, candidates);
        p.remember(&key, &ranked, p.settings.resource_ttl).await;
        Ok(ranked)
    }

    // =========================================================================
    // Social media
    // =========================================================================

    /// The social-media feed of a disaster.
    ///
    /// A cache miss regenerates the feed, caches it, and publishes one
    /// `social_media_updated` event.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::NotFound`] if the disaster does not exist.
    pub async fn social_media(
        &self,
        disaster_id: DisasterId,
    ) -> Result<Vec<SocialMediaPost>, ApiError> {
        if let Some(hit) = self
            .pipeline
            .cached::<Vec<SocialMediaPost>>(&social_key(disaster_id))
            .await
        {
            return Ok(hit);
        }
        let pipeline = Arc::clone(&self.pipeline);
        detached(async move { pipeline.refresh_social_media(disaster_id).await }).await
    }

    // =========================================================================
    // Reports
    // =========================================================================

    /// Submit a field report on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Rejected`] for empty content and
    /// [`ApiError::NotFound`] if the disaster does not exist.
    pub async fn create_report(
        &self,
        actor: &Identity,
        disaster_id: DisasterId,
        payload: &NewReport,
    ) -> Result<Report, ApiError> {
        if payload.content.trim().is_empty() {
            return Err(ApiError::Rejected(String::from("content must not be empty")));
        }
        let p = &self.pipeline;
        let report = p
            .store
            .create_report(disaster_id, &actor.id, payload, p.clock.now())
            .await?;
        info!(
            disaster_id = %disaster_id,
            report_id = %report.id,
            user_id = %actor.id,
            "Report submitted"
        );
        Ok(report)
    }

    /// All reports of a disaster.
    ///
    /// # Errors
    ///
    /// Returns store errors unchanged.
    pub async fn list_reports(&self, disaster_id: DisasterId) -> Result<Vec<Report>, ApiError> {
        Ok(self.pipeline.store.list_reports(disaster_id).await?)
    }
}

// =============================================================================
// Commit-and-publish steps, run on detached tasks
// =============================================================================

impl Pipeline {
    async fn create_disaster(
        &self,
        actor: &Identity,
        payload: NewDisaster,
    ) -> Result<Disaster, ApiError> {
        let now = self.clock.now();
        let record = NewRecord {
            title: payload.title,
            location_name: payload.location_name,
            description: payload.description,
            tags: payload.tags,
            owner_id: payload.owner_id.unwrap_or_else(|| actor.id.clone()),
            created_at: now,
            audit_trail: new_trail(&actor.id, now),
        };
        let disaster = self.store.create(record).await?;

        info!(
            target: "audit",
            disaster_id = %disaster.id,
            action = ChangeAction::Create.as_str(),
            user_id = %actor.id,
            "Disaster created"
        );
        self.bus.publish(ChangeEvent::disaster(
            ChangeAction::Create,
            disaster.clone(),
            now,
        ));
        Ok(disaster)
    }

    async fn update_disaster(
        &self,
        actor: &Identity,
        id: DisasterId,
        patch: &DisasterPatch,
    ) -> Result<Disaster, ApiError> {
        let now = self.clock.now();
        let entry = AuditEntry {
            action: ChangeAction::Update,
            user_id: actor.id.clone(),
            timestamp: now,
        };
        let disaster = self.store.update(id, patch, &entry).await?;
        self.forget(&social_key(id)).await;

        info!(
            target: "audit",
            disaster_id = %id,
            action = ChangeAction::Update.as_str(),
            user_id = %actor.id,
            trail_len = disaster.audit_trail.len(),
            "Disaster updated"
        );
        self.bus.publish(ChangeEvent::disaster(
            ChangeAction::Update,
            disaster.clone(),
            now,
        ));
        Ok(disaster)
    }

    async fn delete_disaster(&self, actor: &Identity, id: DisasterId) -> Result<(), ApiError> {
        let record = self.store.get(id).await?;
        let now = self.clock.now();
        let trail = append_entry(
            Some(&record.audit_trail),
            ChangeAction::Delete,
            &actor.id,
            now,
        );
        let entry = trail.last().cloned().ok_or_else(|| {
            ApiError::Rejected(String::from("audit trail could not be extended"))
        })?;

        self.store.delete(id).await?;
        self.generations().retire(id);
        self.forget(&social_key(id)).await;

        info!(
            target: "audit",
            disaster_id = %id,
            action = ChangeAction::Delete.as_str(),
            user_id = %actor.id,
            trail_len = trail.len(),
            "Disaster deleted"
        );
        self.bus
            .publish(ChangeEvent::disaster_deleted(id, entry, now));
        Ok(())
    }

    async fn create_resource(
        &self,
        disaster_id: DisasterId,
        payload: &NewResource,
    ) -> Result<Resource, ApiError> {
        let now = self.clock.now();
        let resource = self
            .store
            .create_resource(disaster_id, payload, now)
            .await?;
        self.generations().bump(disaster_id);

        info!(
            disaster_id = %disaster_id,
            resource_id = %resource.id,
            resource_type = %resource.resource_type,
            "Resource created"
        );
        self.bus.publish(ChangeEvent::resources(
            ChangeAction::Create,
            disaster_id,
            vec![resource.clone()],
            now,
        ));
        Ok(resource)
    }

    async fn refresh_social_media(
        &self,
        disaster_id: DisasterId,
    ) -> Result<Vec<SocialMediaPost>, ApiError> {
        let disaster = self.store.get(disaster_id).await?;
        let now = self.clock.now();
        let posts = mock_feed(&disaster, now);
        self.remember(&social_key(disaster_id), &posts, self.settings.social_media_ttl)
            .await;
        self.bus
            .publish(ChangeEvent::social_media(disaster_id, posts.clone(), now));
        Ok(posts)
    }

    // =========================================================================
    // Cache helpers
    // =========================================================================

    fn generations(&self) -> MutexGuard<'_, Generations> {
        self.generations.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn generation(&self, disaster_id: DisasterId) -> u64 {
        self.generations().current(disaster_id)
    }

    async fn cached<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        match self.cache.get(key).await {
            Ok(CacheLookup::Hit(value)) => serde_json::from_value(value)
                .inspect_err(|e| warn!(%key, error = %e, "Discarding undecodable cache entry"))
                .ok(),
            Ok(CacheLookup::Miss) => None,
            Err(e) => {
                warn!(%key, backend = self.cache.name(), error = %e, "Cache read failed, querying store");
                None
            }
        }
    }

    async fn remember<T: Serialize>(&self, key: &str, value: &T, ttl: TimeDelta) {
        let expires_at = self
            .clock
            .now()
            .checked_add_signed(ttl)
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        let result = match serde_json::to_value(value) {
            Ok(json) => self.cache.set(key, json, expires_at).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            warn!(%key, backend = self.cache.name(), error = %e, "Cache write failed");
        }
    }

    async fn forget(&self, key: &str) {
        if let Err(e) = self.cache.invalidate(key).await {
            warn!(%key, backend = self.cache.name(), error = %e, "Cache invalidation failed");
        }
    }
}

/// Deterministic stand-in for a social-media search on the record's
/// tags and place.
fn mock_feed(disaster: &Disaster, now: DateTime<Utc>) -> Vec<SocialMediaPost> {
    let mut posts: Vec<SocialMediaPost> = disaster
        .tags
        .iter()
        .map(|tag| SocialMediaPost {
            disaster_id: disaster.id,
            post: format!("#{tag} Need help near {}", disaster.location_name),
            user: String::from("citizen1"),
            timestamp: now,
        })
        .collect();
    posts.push(SocialMediaPost {
        disaster_id: disaster.id,
        post: format!(
            "Offering shelter and supplies for anyone affected by the {} in {}",
            disaster.title.to_lowercase(),
            disaster.location_name
        ),
        user: String::from("reliefAdmin"),
        timestamp: now,
    });
    posts
}
