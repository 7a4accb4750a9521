//! Synchronization engine.
//!
//! Decides register-vs-update per entity, reconciles disablement with the
//! hub and writes the outcome back to the registry.
//!
//! ```text
//!   entity ─┬─ event ─────────────────────────→ fire_event  → Fired | Failed
//!           ├─ not registered ────────────────→ register    → Registered | Failed
//!           └─ registered → reconcile(local, remote)
//!                            ├─ Send/ReEnable → bulk update → Updated | Disabled | Failed
//!                            └─ Disable/Suppress ───────────→ Disabled
//! ```

use async_trait::async_trait;
use serde::Serialize;

use crate::entity::Entity;

mod engine;
mod reconcile;


pub use engine::{split_rounds, SyncEngine};
pub use reconcile::{reconcile, Reconciliation};

/// Terminal classification of one delivery attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncOutcome {
    Registered,
    Updated,
    Disabled,
    Failed,
    /// Event delivered
    Fired,
}

/// Destination for entity states the hub accepted (e.g., the message bus).
#[async_trait]
pub trait StateSink: Send + Sync {
    async fn publish(&self, entity: &Entity) -> anyhow::Result<()>;
}
