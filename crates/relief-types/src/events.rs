//! Change events pushed to connected observers.
//!
//! Events are ephemeral: they are never persisted and a late observer
//! never receives one retroactively. The `sequence` number is stamped by
//! the broadcast bus at publish time and increases strictly per bus, so
//! an observer can drop duplicates under at-least-once delivery.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::enums::{ChangeAction, EventChannel};
use crate::ids::DisasterId;
use crate::structs::{AuditEntry, Disaster, Resource, SocialMediaPost};

/// Payload carried by a [`ChangeEvent`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[serde(untagged)]
#[ts(export, export_to = "bindings/")]
pub enum ChangePayload {
    /// Full record after a create or update.
    Disaster {
        /// The record as committed.
        disaster: Disaster,
    },
    /// A record that was deleted, with the final trail entry.
    Deleted {
        /// Identifier of the removed record.
        id: DisasterId,
        /// The `delete` entry appended at removal time.
        audit: AuditEntry,
    },
    /// Resources of a disaster that changed.
    Resources {
        /// Owning disaster.
        disaster_id: DisasterId,
        /// Affected resource rows.
        resources: Vec<Resource>,
    },
    /// Refreshed social-media feed of a disaster.
    SocialMedia {
        /// Disaster the feed belongs to.
        disaster_id: DisasterId,
        /// Current posts.
        posts: Vec<SocialMediaPost>,
    },
}

impl ChangePayload {
    /// Disaster every payload variant is about.
    pub const fn disaster_id(&self) -> DisasterId {
        match self {
            Self::Disaster { disaster } => disaster.id,
            Self::Deleted { id, .. } => *id,
            Self::Resources { disaster_id, .. } | Self::SocialMedia { disaster_id, .. } => {
                *disaster_id
            }
        }
    }
}

/// Notification that committed state changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export, export_to = "bindings/")]
pub struct ChangeEvent {
    /// Bus-assigned publish order. Zero until published.
    pub sequence: u64,
    /// Channel the event is published on.
    pub channel: EventChannel,
    /// Mutation kind.
    #[serde(rename = "type")]
    pub kind: ChangeAction,
    /// Event body.
    pub payload: ChangePayload,
    /// When the producer emitted the event.
    pub emitted_at: DateTime<Utc>,
}

impl ChangeEvent {
    /// Build an unpublished event.
    pub const fn new(
        channel: EventChannel,
        kind: ChangeAction,
        payload: ChangePayload,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self {
            sequence: 0,
            channel,
            kind,
            payload,
            emitted_at,
        }
    }

    /// `disaster_updated` event for a created or updated record.
    pub const fn disaster(kind: ChangeAction, disaster: Disaster, emitted_at: DateTime<Utc>) -> Self {
        Self::new(
            EventChannel::DisasterUpdated,
            kind,
            ChangePayload::Disaster { disaster },
            emitted_at,
        )
    }

    /// `disaster_updated` event for a deleted record.
    pub const fn disaster_deleted(id: DisasterId, audit: AuditEntry, emitted_at: DateTime<Utc>) -> Self {
        Self::new(
            EventChannel::DisasterUpdated,
            ChangeAction::Delete,
            ChangePayload::Deleted { id, audit },
            emitted_at,
        )
    }

    /// `resources_updated` event.
    pub const fn resources(
        kind: ChangeAction,
        disaster_id: DisasterId,
        resources: Vec<Resource>,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            EventChannel::ResourcesUpdated,
            kind,
            ChangePayload::Resources {
                disaster_id,
                resources,
            },
            emitted_at,
        )
    }

    /// `social_media_updated` event.
    pub const fn social_media(
        disaster_id: DisasterId,
        posts: Vec<SocialMediaPost>,
        emitted_at: DateTime<Utc>,
    ) -> Self {
        Self::new(
            EventChannel::SocialMediaUpdated,
            ChangeAction::Update,
            ChangePayload::SocialMedia { disaster_id, posts },
            emitted_at,
        )
    }

    /// Disaster the event concerns.
    pub const fn disaster_id(&self) -> DisasterId {
        self.payload.disaster_id()
    }
}
