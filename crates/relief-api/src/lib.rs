//! Coordination core and HTTP + `WebSocket` API for disaster relief records.
//!
//! - **REST endpoints** for disaster records and their dependent data
//!   (resources, reports, social-media feed, image verification)
//! - **`WebSocket` endpoint** (`/ws`) streaming a snapshot followed by
//!   every committed change
//!
//! # Architecture
//!
//! ```text
//! handler --> Coordinator --commit--> RecordStore
//!                 |       --derive--> ResponseCache
//!                 +--publish--> BroadcastBus --queue--> ws task per client
//! ```
//!
//! A mutation publishes exactly one event, after its commit succeeded.
//! Publishing never blocks and never fails the mutation.

pub mod bus;
pub mod coordinator;
pub mod error;
pub mod extract;
pub mod handlers;
pub mod router;
pub mod server;
pub mod state;
pub mod verifier;
pub mod ws;

// Re-export primary types for convenience.
pub use bus::{BroadcastBus, BusError, EventScope, ObserverState, Subscription};
pub use coordinator::{Coordinator, CoordinatorSettings};
pub use error::ApiError;
pub use router::build_router;
pub use server::{spawn_server, start_server, ServerConfig, ServerError};
pub use state::AppState;
pub use verifier::ImageVerifier;
