//! Enumeration types shared by records, audit trails, and change events.

use serde::{Deserialize, Serialize};
use ts_rs::TS;

/// The kind of mutation applied to a record.
///
/// Used both as the action of an audit trail entry and as the `type` of a
/// change event, so the two vocabularies can never drift apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum ChangeAction {
    /// The record was created.
    Create,
    /// One or more attributes of the record changed.
    Update,
    /// The record was removed from the active set.
    Delete,
}

impl ChangeAction {
    /// Wire name of the action.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Delete => "delete",
        }
    }
}

/// Named broadcast channel a change event is published on.
///
/// Observers of the original dashboard subscribe by these names, so the
/// serialized form is the snake-case channel name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "snake_case")]
#[ts(export, export_to = "bindings/")]
pub enum EventChannel {
    /// A disaster record was created, updated, or deleted.
    DisasterUpdated,
    /// The social-media feed for a disaster was refreshed.
    SocialMediaUpdated,
    /// The resource set for a disaster changed.
    ResourcesUpdated,
}

impl EventChannel {
    /// Wire name of the channel.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::DisasterUpdated => "disaster_updated",
            Self::SocialMediaUpdated => "social_media_updated",
            Self::ResourcesUpdated => "resources_updated",
        }
    }
}

/// Role attached to a resolved identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum Role {
    /// Coordinators with full access.
    Admin,
    /// Citizens and field volunteers submitting data.
    Contributor,
}

/// Outcome of verifying a report's image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, TS)]
#[serde(rename_all = "lowercase")]
#[ts(export, export_to = "bindings/")]
pub enum VerificationStatus {
    /// Not yet verified.
    Pending,
    /// The image appears authentic and relevant.
    Verified,
    /// The image shows signs of manipulation or is off-context.
    Suspicious,
    /// The image could not be verified or was rejected outright.
    Rejected,
}
