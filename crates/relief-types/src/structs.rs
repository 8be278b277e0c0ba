//! Core entity structs: disaster records, audit entries, resources,
//! reports, and social-media posts.
//!
//! Request payloads (`NewDisaster`, `DisasterPatch`, ...) live next to the
//! entities they produce. None of them carries an audit trail: the trail
//! is only ever extended by the store through an appended entry.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ChangeAction, Role, VerificationStatus};
use crate::ids::{DisasterId, ReportId, ResourceId};

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A resolved caller identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Identity {
    /// User handle (e.g. `netrunnerX`).
    pub id: String,
    /// Role of the user.
    pub role: Role,
}

// ---------------------------------------------------------------------------
// Audit trail
// ---------------------------------------------------------------------------

/// One immutable entry in a record's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct AuditEntry {
    /// What was done to the record.
    pub action: ChangeAction,
    /// Who did it.
    pub user_id: String,
    /// When it was done.
    pub timestamp: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Disaster records
// ---------------------------------------------------------------------------

/// A disaster record as held by the store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Disaster {
    /// Store-assigned identifier.
    pub id: DisasterId,
    /// Short human title (e.g. "Flood").
    pub title: String,
    /// Free-form place name (e.g. "Manhattan, NYC").
    pub location_name: String,
    /// Free-text description.
    pub description: String,
    /// Deduplicated tags, serialized as a sorted list.
    pub tags: BTreeSet<String>,
    /// Identity that owns the record.
    pub owner_id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Append-only action history. Legacy rows without a trail read as empty.
    #[serde(default)]
    pub audit_trail: Vec<AuditEntry>,
}

impl Disaster {
    /// Whether the record carries `tag`.
    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// Payload for creating a disaster record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NewDisaster {
    /// Short human title.
    pub title: String,
    /// Free-form place name.
    pub location_name: String,
    /// Free-text description.
    #[serde(default)]
    pub description: String,
    /// Tags; duplicates and blank entries are dropped.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Explicit owner. Defaults to the requesting identity.
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl NewDisaster {
    /// Trim tags and drop blank ones.
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.tags = normalize_tags(self.tags);
        self
    }
}

/// Partial update of a disaster record.
///
/// Unknown fields are rejected, which in particular rejects any attempt to
/// supply `audit_trail` and overwrite history.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[serde(deny_unknown_fields)]
#[ts(export, export_to = "bindings/")]
pub struct DisasterPatch {
    /// New title.
    #[serde(default)]
    pub title: Option<String>,
    /// New place name.
    #[serde(default)]
    pub location_name: Option<String>,
    /// New description.
    #[serde(default)]
    pub description: Option<String>,
    /// Replacement tag set.
    #[serde(default)]
    pub tags: Option<BTreeSet<String>>,
    /// New owner.
    #[serde(default)]
    pub owner_id: Option<String>,
}

impl DisasterPatch {
    /// Apply the patch to a record in place. The audit trail is untouched.
    pub fn apply_to(&self, record: &mut Disaster) {
        if let Some(title) = &self.title {
            record.title.clone_from(title);
        }
        if let Some(location_name) = &self.location_name {
            record.location_name.clone_from(location_name);
        }
        if let Some(description) = &self.description {
            record.description.clone_from(description);
        }
        if let Some(tags) = &self.tags {
            record.tags = normalize_tags(tags.clone());
        }
        if let Some(owner_id) = &self.owner_id {
            record.owner_id.clone_from(owner_id);
        }
    }
}

/// Trim every tag and drop the ones left empty.
fn normalize_tags(tags: BTreeSet<String>) -> BTreeSet<String> {
    tags.into_iter()
        .map(|t| t.trim().to_owned())
        .filter(|t| !t.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Resources
// ---------------------------------------------------------------------------

/// A physical resource (shelter, hospital, food depot) tied to a disaster.
///
/// The disaster does not own the resource; the link is a foreign relation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Resource {
    /// Resource identifier.
    pub id: ResourceId,
    /// Disaster this resource serves.
    pub disaster_id: DisasterId,
    /// Display name.
    pub name: String,
    /// Free-form category (e.g. `shelter`, `hospital`).
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Free-form place name.
    pub location_name: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

/// Payload for registering a resource under a disaster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NewResource {
    /// Display name.
    pub name: String,
    /// Free-form category.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Free-form place name.
    #[serde(default)]
    pub location_name: String,
    /// Latitude in degrees.
    pub lat: f64,
    /// Longitude in degrees.
    pub lon: f64,
}

/// A resource together with its great-circle distance from a query point.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NearbyResource {
    /// The resource row.
    pub resource: Resource,
    /// Distance from the query point in meters.
    pub distance_meters: f64,
}

// ---------------------------------------------------------------------------
// Reports
// ---------------------------------------------------------------------------

/// A field report submitted for a disaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct Report {
    /// Report identifier.
    pub id: ReportId,
    /// Disaster the report is about.
    pub disaster_id: DisasterId,
    /// Submitting identity.
    pub user_id: String,
    /// Report text.
    pub content: String,
    /// Optional photo URL.
    pub image_url: Option<String>,
    /// Verification state of the photo.
    pub verification_status: VerificationStatus,
    /// Submission time.
    pub created_at: DateTime<Utc>,
}

/// Payload for submitting a report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct NewReport {
    /// Report text.
    pub content: String,
    /// Optional photo URL.
    #[serde(default)]
    pub image_url: Option<String>,
}

/// Result of an image verification call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ImageVerification {
    /// The image that was checked.
    pub image_url: String,
    /// Verdict.
    pub status: VerificationStatus,
    /// Human-readable explanation.
    pub details: String,
}

// ---------------------------------------------------------------------------
// Social media
// ---------------------------------------------------------------------------

/// A social-media mention relevant to a disaster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct SocialMediaPost {
    /// Disaster the post was matched to.
    pub disaster_id: DisasterId,
    /// Post text.
    pub post: String,
    /// Author handle.
    pub user: String,
    /// Posting time.
    pub timestamp: DateTime<Utc>,
}
