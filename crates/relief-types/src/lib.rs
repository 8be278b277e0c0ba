//! Shared type definitions for the disaster relief coordination core.
//!
//! This crate is the single source of truth for the types exchanged
//! between the store, the broadcast bus, and connected dashboards. Types
//! flow to `TypeScript` via `ts-rs` for the dashboard.
//!
//! # Modules
//!
//! - [`ids`] -- Type-safe UUID wrappers for records, resources, reports
//! - [`enums`] -- Change actions, broadcast channels, roles, verification
//! - [`structs`] -- Disaster records, audit entries, resources, reports
//! - [`events`] -- Change events pushed to observers

pub mod enums;
pub mod events;
pub mod ids;
pub mod structs;

// Re-export all public types at crate root for convenience.
pub use enums::{ChangeAction, EventChannel, Role, VerificationStatus};
pub use events::{ChangeEvent, ChangePayload};
pub use ids::{DisasterId, ReportId, ResourceId};
pub use structs::{
    AuditEntry, Disaster, DisasterPatch, Identity, ImageVerification, NearbyResource, NewDisaster,
    NewReport, NewResource, Report, Resource, SocialMediaPost,
};
