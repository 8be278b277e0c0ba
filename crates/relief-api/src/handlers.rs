//! REST API endpoint handlers.
//!
//! Handlers parse and validate the request, resolve the actor, and hand
//! off to the [`Coordinator`](crate::coordinator::Coordinator). They hold
//! no state of their own.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET` | `/health` | Liveness probe |
//! | `POST` | `/disasters` | Create a record |
//! | `GET` | `/disasters?tag=` | List records |
//! | `GET` | `/disasters/:id` | Single record |
//! | `PUT` | `/disasters/:id` | Partial update |
//! | `DELETE` | `/disasters/:id` | Delete |
//! | `GET` | `/disasters/:id/resources?lat=&lon=&radius=` | Nearby (or all) resources |
//! | `POST` | `/disasters/:id/resources` | Register a resource |
//! | `GET` | `/disasters/:id/social-media` | Social-media feed |
//! | `POST` | `/disasters/:id/reports` | Submit a report |
//! | `GET` | `/disasters/:id/reports` | List reports |
//! | `POST` | `/disasters/:id/verify-image` | Verify a report image |

use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use relief_db::RecordFilter;
use relief_types::{DisasterId, DisasterPatch, NewDisaster, NewReport, NewResource};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::ApiError;
use crate::extract::Actor;
use crate::state::AppState;

// ---------------------------------------------------------------------------
// Query parameter and body structs
// ---------------------------------------------------------------------------

/// Query parameters for `GET /disasters`.
#[derive(Debug, Deserialize)]
pub struct ListQuery {
    /// Only records carrying this tag.
    pub tag: Option<String>,
}

/// Query parameters for `GET /disasters/:id/resources`.
#[derive(Debug, Deserialize)]
pub struct ResourcesQuery {
    /// Query latitude in degrees.
    pub lat: Option<f64>,
    /// Query longitude in degrees.
    pub lon: Option<f64>,
    /// Search radius in meters.
    pub radius: Option<f64>,
}

/// Body of `POST /disasters/:id/verify-image`.
#[derive(Debug, Deserialize)]
pub struct VerifyImageRequest {
    /// Image to verify.
    pub image_url: String,
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

/// Liveness probe.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "message": "Disaster coordination API running",
    }))
}

// ---------------------------------------------------------------------------
// Disaster records
// ---------------------------------------------------------------------------

/// Create a disaster record. Responds `201` with the stored record.
pub async fn create_disaster(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    body: Result<Json<NewDisaster>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let payload = json_body(body)?;
    let disaster = state.coordinator.create_disaster(&actor, payload).await?;
    Ok((StatusCode::CREATED, Json(disaster)))
}

/// List active records, optionally filtered by `tag`.
pub async fn list_disasters(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let filter = RecordFilter {
        tag: params.tag.filter(|t| !t.trim().is_empty()),
    };
    let disasters = state.coordinator.list_disasters(&filter).await?;
    Ok(Json(disasters))
}

/// Fetch a single record.
pub async fn get_disaster(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    Ok(Json(state.coordinator.get_disaster(id).await?))
}

/// Apply a partial update. `audit_trail` (or any unknown field) in the
/// body is refused with `400`.
pub async fn update_disaster(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id_str): Path<String>,
    body: Result<Json<DisasterPatch>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    let patch = json_body(body)?;
    let disaster = state
        .coordinator
        .update_disaster(&actor, id, &patch)
        .await?;
    Ok(Json(disaster))
}

/// Delete a record.
pub async fn delete_disaster(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    state.coordinator.delete_disaster(&actor, id).await?;
    Ok(Json(serde_json::json!({ "success": true })))
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// Resources of a disaster.
///
/// With `lat` and `lon` the result is the nearby query (distance-ranked,
/// cached); without them it is every resource of the disaster.
pub async fn get_resources(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    Query(params): Query<ResourcesQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    match (params.lat, params.lon) {
        (Some(lat), Some(lon)) => {
            let nearby = state
                .coordinator
                .nearby(id, lat, lon, params.radius)
                .await?;
            Ok(Json(serde_json::to_value(nearby)?))
        }
        (None, None) => {
            let resources = state.coordinator.list_resources(id).await?;
            Ok(Json(serde_json::to_value(resources)?))
        }
        _ => Err(ApiError::InvalidQuery(String::from(
            "lat and lon must be given together",
        ))),
    }
}

/// Register a resource. Responds `201` with the stored resource.
pub async fn create_resource(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    body: Result<Json<NewResource>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    let payload = json_body(body)?;
    let resource = state.coordinator.create_resource(id, &payload).await?;
    Ok((StatusCode::CREATED, Json(resource)))
}

// ---------------------------------------------------------------------------
// Social media
// ---------------------------------------------------------------------------

/// Social-media feed of a disaster.
pub async fn get_social_media(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    Ok(Json(state.coordinator.social_media(id).await?))
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// Submit a report. Responds `201` with the stored report.
pub async fn create_report(
    State(state): State<Arc<AppState>>,
    Actor(actor): Actor,
    Path(id_str): Path<String>,
    body: Result<Json<NewReport>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    let payload = json_body(body)?;
    let report = state
        .coordinator
        .create_report(&actor, id, &payload)
        .await?;
    Ok((StatusCode::CREATED, Json(report)))
}

/// Reports of a disaster.
pub async fn list_reports(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    Ok(Json(state.coordinator.list_reports(id).await?))
}

/// Verify an image for a disaster's reports.
pub async fn verify_image(
    State(state): State<Arc<AppState>>,
    Path(id_str): Path<String>,
    body: Result<Json<VerifyImageRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_disaster_id(&id_str)?;
    let request = json_body(body)?;
    state.coordinator.get_disaster(id).await?;
    let verdict = state.verifier.verify(&request.image_url).await?;
    tracing::info!(
        disaster_id = %id,
        status = ?verdict.status,
        verifier = state.verifier.name(),
        "Image verified"
    );
    Ok(Json(verdict))
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Parse a disaster id from a path segment.
pub(crate) fn parse_disaster_id(s: &str) -> Result<DisasterId, ApiError> {
    s.parse::<Uuid>()
        .map(DisasterId::from)
        .map_err(|e| ApiError::InvalidUuid(format!("{s}: {e}")))
}

/// Unwrap a JSON body, turning any extraction failure into a `400`.
fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|e| ApiError::Rejected(e.body_text()))
}
