//! Coordination logic for disaster records that does not touch I/O.
//!
//! # Modules
//!
//! - [`config`] -- Typed `relief-config.yaml` loading with env overrides
//! - [`clock`] -- Injected time source (system or manual)
//! - [`audit`] -- Pure, append-only audit trail construction
//! - [`geo`] -- Coordinate validation and great-circle ranking
//! - [`identity`] -- Request identity resolution

pub mod audit;
pub mod clock;
pub mod config;
pub mod geo;
pub mod identity;

pub use audit::{append_entry, new_trail, validate_trail, TrailError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ConfigError, ReliefConfig};
pub use geo::{great_circle_distance, rank_nearby, GeoPoint, NearbyQuery, QueryError};
pub use identity::{IdentityResolver, StaticDirectory};
