//! Integration tests for the coordination API.
//!
//! Tests use Axum's `Router` directly via `tower::ServiceExt` without
//! starting a TCP server, backed by the in-memory store and cache and a
//! manual clock.

#![allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{Duration, TimeZone, Utc};
use relief_api::{build_router, AppState, EventScope};
use relief_core::config::ReliefConfig;
use relief_core::ManualClock;
use relief_db::RecordStore;
use relief_types::{ChangeAction, EventChannel};
use serde_json::Value;
use tower::ServiceExt;

struct Harness {
    state: Arc<AppState>,
    clock: Arc<ManualClock>,
}

impl Harness {
    fn new() -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap(),
        ));
        let state = Arc::new(AppState::in_memory(&ReliefConfig::default(), clock.clone()));
        Self { state, clock }
    }

    fn router(&self) -> Router {
        build_router(Arc::clone(&self.state))
    }

    fn nearby_calls(&self) -> u64 {
        match self.state.coordinator.store() {
            RecordStore::Memory(store) => store.nearby_calls(),
            RecordStore::Postgres(_) => 0,
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    async fn get(&self, path: &str) -> (StatusCode, Value) {
        self.send(Request::get(path).body(Body::empty()).unwrap())
            .await
    }

    async fn json(&self, method: &str, path: &str, user: &str, body: &Value) -> (StatusCode, Value) {
        self.send(
            Request::builder()
                .method(method)
                .uri(path)
                .header("content-type", "application/json")
                .header("x-user", user)
                .body(Body::from(body.to_string()))
                .unwrap(),
        )
        .await
    }

    async fn create_flood(&self) -> String {
        let (status, json) = self
            .json(
                "POST",
                "/disasters",
                "netrunnerX",
                &serde_json::json!({
                    "title": "Flood",
                    "location_name": "NYC",
                    "tags": ["flood", "urgent"],
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        json["id"].as_str().unwrap().to_owned()
    }

    async fn add_resource(&self, id: &str, name: &str, lat: f64, lon: f64) -> Value {
        let (status, json) = self
            .json(
                "POST",
                &format!("/disasters/{id}/resources"),
                "reliefAdmin",
                &serde_json::json!({
                    "name": name,
                    "type": "shelter",
                    "location_name": "NYC",
                    "lat": lat,
                    "lon": lon,
                }),
            )
            .await;
        assert_eq!(status, StatusCode::CREATED);
        json
    }
}

// =========================================================================
// Tests
// =========================================================================

#[tokio::test]
async fn health_reports_ok() {
    let h = Harness::new();
    let (status, json) = h.get("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn flood_lifecycle_publishes_one_event_per_mutation() {
    let h = Harness::new();
    let bus = h.state.coordinator.bus().clone();
    let mut sub = bus.subscribe(EventScope::All);
    sub.mark_connected().unwrap();

    let id = h.create_flood().await;
    let (_, record) = h.get(&format!("/disasters/{id}")).await;
    assert_eq!(record["audit_trail"].as_array().unwrap().len(), 1);
    assert_eq!(record["audit_trail"][0]["action"], "create");

    let (status, updated) = h
        .json(
            "PUT",
            &format!("/disasters/{id}"),
            "reliefAdmin",
            &serde_json::json!({ "description": "rising water" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["description"], "rising water");
    assert_eq!(updated["audit_trail"].as_array().unwrap().len(), 2);
    assert_eq!(updated["audit_trail"][1]["user_id"], "reliefAdmin");

    let (status, deleted) = h
        .json("DELETE", &format!("/disasters/{id}"), "reliefAdmin", &Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["success"], true);

    let (_, all) = h.get("/disasters").await;
    assert!(all.as_array().unwrap().is_empty());

    let created = sub.recv().await.unwrap();
    assert_eq!(created.kind, ChangeAction::Create);
    let update = sub.recv().await.unwrap();
    assert_eq!(update.kind, ChangeAction::Update);
    let delete = sub.recv().await.unwrap();
    assert_eq!(delete.channel, EventChannel::DisasterUpdated);
    assert_eq!(delete.kind, ChangeAction::Delete);
    assert_eq!(delete.disaster_id().to_string(), id);
    assert!(created.sequence < update.sequence && update.sequence < delete.sequence);
    assert_eq!(bus.last_sequence(), delete.sequence);

    // A second delete fails and publishes nothing.
    let (status, _) = h
        .json("DELETE", &format!("/disasters/{id}"), "reliefAdmin", &Value::Null)
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(bus.last_sequence(), delete.sequence);
}

#[tokio::test]
async fn tag_filter_selects_matching_records() {
    let h = Harness::new();
    h.create_flood().await;
    let (status, _) = h
        .json(
            "POST",
            "/disasters",
            "citizen1",
            &serde_json::json!({"title": "Fire", "location_name": "LA", "tags": ["fire"]}),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);

    let (_, floods) = h.get("/disasters?tag=flood").await;
    assert_eq!(floods.as_array().unwrap().len(), 1);
    assert_eq!(floods[0]["title"], "Flood");

    let (_, all) = h.get("/disasters").await;
    assert_eq!(all.as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn update_cannot_replace_audit_trail() {
    let h = Harness::new();
    let id = h.create_flood().await;

    let (status, json) = h
        .json(
            "PUT",
            &format!("/disasters/{id}"),
            "citizen2",
            &serde_json::json!({ "description": "x", "audit_trail": [] }),
        )
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);

    let (_, record) = h.get(&format!("/disasters/{id}")).await;
    assert_eq!(record["audit_trail"].as_array().unwrap().len(), 1);
    assert_eq!(record["description"], "");
}

#[tokio::test]
async fn unknown_user_resolves_to_default_identity() {
    let h = Harness::new();
    let (_, json) = h
        .json(
            "POST",
            "/disasters",
            "mallory",
            &serde_json::json!({"title": "Quake", "location_name": "SF"}),
        )
        .await;
    assert_eq!(json["owner_id"], "netrunnerX");
    assert_eq!(json["audit_trail"][0]["user_id"], "netrunnerX");
}

#[tokio::test]
async fn user_query_parameter_names_actor() {
    let h = Harness::new();
    let (status, json) = h
        .send(
            Request::post("/disasters?user=citizen1")
                .header("content-type", "application/json")
                .body(Body::from(
                    serde_json::json!({"title": "Storm", "location_name": "Miami"}).to_string(),
                ))
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["owner_id"], "citizen1");
}

#[tokio::test]
async fn missing_and_malformed_ids() {
    let h = Harness::new();
    let (status, _) = h
        .get(&format!("/disasters/{}", uuid::Uuid::now_v7()))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, json) = h.get("/disasters/not-a-uuid").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(json["status"], 400);
}

#[tokio::test]
async fn nearby_returns_resources_within_radius_nearest_first() {
    let h = Harness::new();
    let id = h.create_flood().await;
    h.add_resource(&id, "Brooklyn Hall", 40.6782, -73.9442).await;
    h.add_resource(&id, "Lower East Side Shelter", 40.715, -73.985).await;
    h.add_resource(&id, "Philadelphia Depot", 39.9526, -75.1652).await;

    let (status, json) = h
        .get(&format!(
            "/disasters/{id}/resources?lat=40.7128&lon=-74.0060&radius=10000"
        ))
        .await;
    assert_eq!(status, StatusCode::OK);
    let rows = json.as_array().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0]["resource"]["name"], "Lower East Side Shelter");
    assert_eq!(rows[1]["resource"]["name"], "Brooklyn Hall");
    assert!(rows[0]["distance_meters"].as_f64().unwrap() <= rows[1]["distance_meters"].as_f64().unwrap());

    let (_, all) = h.get(&format!("/disasters/{id}/resources")).await;
    assert_eq!(all.as_array().unwrap().len(), 3);
}

#[tokio::test]
async fn nearby_is_cached_until_expiry() {
    let h = Harness::new();
    let id = h.create_flood().await;
    h.add_resource(&id, "Lower East Side Shelter", 40.715, -73.985).await;
    let path = format!("/disasters/{id}/resources?lat=40.7128&lon=-74.0060");

    h.get(&path).await;
    assert_eq!(h.nearby_calls(), 1);
    h.get(&path).await;
    assert_eq!(h.nearby_calls(), 1);

    // Default resource TTL is 300 s.
    h.clock.advance(Duration::seconds(299));
    h.get(&path).await;
    assert_eq!(h.nearby_calls(), 1);
    h.clock.advance(Duration::seconds(2));
    h.get(&path).await;
    assert_eq!(h.nearby_calls(), 2);
}

#[tokio::test]
async fn new_resource_is_visible_immediately_and_announced() {
    let h = Harness::new();
    let id = h.create_flood().await;
    let mut sub = h.state.coordinator.bus().subscribe(EventScope::All);
    sub.mark_connected().unwrap();
    let path = format!("/disasters/{id}/resources?lat=40.7128&lon=-74.0060");

    let (_, before) = h.get(&path).await;
    assert!(before.as_array().unwrap().is_empty());

    h.add_resource(&id, "Lower East Side Shelter", 40.715, -73.985).await;
    let event = sub.recv().await.unwrap();
    assert_eq!(event.channel, EventChannel::ResourcesUpdated);
    assert_eq!(event.kind, ChangeAction::Create);

    let (_, after) = h.get(&path).await;
    assert_eq!(after.as_array().unwrap().len(), 1);
    assert_eq!(h.nearby_calls(), 2);
}

#[tokio::test]
async fn invalid_latitude_is_rejected_before_store_call() {
    let h = Harness::new();
    let id = h.create_flood().await;

    let (status, json) = h
        .get(&format!("/disasters/{id}/resources?lat=200&lon=-74.0060"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("lat"));
    assert_eq!(h.nearby_calls(), 0);

    let (status, _) = h
        .get(&format!("/disasters/{id}/resources?lat=40.7&lon=-74.0&radius=-5"))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = h.get(&format!("/disasters/{id}/resources?lat=40.7")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(h.nearby_calls(), 0);
}

#[tokio::test]
async fn social_media_feed_is_cached_and_announced_once() {
    let h = Harness::new();
    let id = h.create_flood().await;
    let bus = h.state.coordinator.bus().clone();
    let before = bus.last_sequence();

    let (status, posts) = h.get(&format!("/disasters/{id}/social-media")).await;
    assert_eq!(status, StatusCode::OK);
    assert!(!posts.as_array().unwrap().is_empty());
    assert_eq!(bus.last_sequence(), before + 1);

    let (_, again) = h.get(&format!("/disasters/{id}/social-media")).await;
    assert_eq!(again, posts);
    assert_eq!(bus.last_sequence(), before + 1);
}

#[tokio::test]
async fn social_media_feed_follows_tag_update() {
    let h = Harness::new();
    let id = h.create_flood().await;
    let (_, posts) = h.get(&format!("/disasters/{id}/social-media")).await;
    assert!(posts.to_string().contains("#flood"));

    let (status, _) = h
        .json(
            "PUT",
            &format!("/disasters/{id}"),
            "netrunnerX",
            &serde_json::json!({ "tags": ["fire"] }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, posts) = h.get(&format!("/disasters/{id}/social-media")).await;
    assert_eq!(status, StatusCode::OK);
    let text = posts.to_string();
    assert!(text.contains("#fire"), "{text}");
    assert!(!text.contains("#flood"), "{text}");
}

#[tokio::test]
async fn social_media_feed_of_deleted_disaster_is_gone() {
    let h = Harness::new();
    let id = h.create_flood().await;
    let (status, _) = h.get(&format!("/disasters/{id}/social-media")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h
        .json("DELETE", &format!("/disasters/{id}"), "reliefAdmin", &Value::Null)
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = h.get(&format!("/disasters/{id}/social-media")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn reports_are_created_pending_and_listed() {
    let h = Harness::new();
    let id = h.create_flood().await;

    let (status, report) = h
        .json(
            "POST",
            &format!("/disasters/{id}/reports"),
            "citizen1",
            &serde_json::json!({
                "content": "Basement flooded on 5th Ave",
                "image_url": "https://example.org/flood.jpg",
            }),
        )
        .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(report["verification_status"], "pending");
    assert_eq!(report["user_id"], "citizen1");

    let (_, listed) = h.get(&format!("/disasters/{id}/reports")).await;
    assert_eq!(listed.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn verify_image_uses_mock_backend() {
    let h = Harness::new();
    let id = h.create_flood().await;

    let (status, verdict) = h
        .json(
            "POST",
            &format!("/disasters/{id}/verify-image"),
            "citizen1",
            &serde_json::json!({ "image_url": "https://example.org/flood.jpg" }),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verdict["status"], "verified");
}

#[tokio::test]
async fn failed_write_publishes_nothing() {
    let h = Harness::new();
    let bus = h.state.coordinator.bus().clone();
    if let RecordStore::Memory(store) = h.state.coordinator.store() {
        store.set_unavailable(true);
    }

    let (status, json) = h
        .json(
            "POST",
            "/disasters",
            "netrunnerX",
            &serde_json::json!({"title": "Flood", "location_name": "NYC"}),
        )
        .await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["status"], 500);
    assert_eq!(bus.last_sequence(), 0);
}

#[tokio::test]
async fn nonexistent_route_returns_404() {
    let h = Harness::new();
    let (status, _) = h.get("/api/nonexistent").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
