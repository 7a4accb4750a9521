//! hubsync - entity synchronization core for the host agent.
//!
//! Workers (in the `worker-manager` crate) produce [`Entity`] values. This
//! crate decides what happens to each of them on the way to the hub.
//!
//! ```text
//!   merged entity stream
//!          ↓
//! ┌─────────────────────────────────────────┐
//! │       SyncEngine                         │
//! │  - register vs update per entity         │
//! │  - disablement reconciliation            │
//! └─────────────────────────────────────────┘
//!     ↓            ↓              ↓
//!  Registry     HubApi        Tracker / StateSink
//!  (SQLite)   (HTTP webhook)  (read-back, NATS mirror)
//! ```

// Entity model
pub mod entity;

// Durable per-entity registration state
pub mod registry;

// Hub transport and remote config snapshot
pub mod hub;

// Tracked-state cache for read-back queries
pub mod tracker;

// Synchronization engine
pub mod sync;

// NATS bus integration
pub mod bus;

// Hub push notifications
pub mod push;

// Agent configuration
pub mod config;

pub use entity::{Entity, EntityCategory, EntityKind, SensorMetadata, SensorType};
pub use registry::{Registry, RegistryError, RegistryRecord};
pub use sync::{StateSink, SyncEngine, SyncOutcome};
pub use tracker::Tracker;
