use std::sync::{Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use hubsync::Entity;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Buffer size of every entity channel.
pub const STREAM_CAPACITY: usize = 32;

/// Stream of entities produced by one worker activation.
///
/// Closes when the worker's production loop ends.
pub type EntityStream = mpsc::Receiver<Entity>;

/// How a worker produces entities. Reported by the status API.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerKind {
    Polling,
    Event,
    OneShot,
    Dynamic,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WorkerDescriptor {
    pub id: String,
    pub description: String,
    pub kind: WorkerKind,
    pub enabled: bool,
}

/// Worker interface managed by a [`Controller`](crate::controller::Controller).
///
/// # Lifecycle
/// 1. Controller checks `is_disabled()`; disabled workers are never started
/// 2. Controller calls `start(cancel)` once per activation
/// 3. Worker spawns its production loop under a child of `cancel` and
///    returns the receiving end of its entity stream
/// 4. `stop()` (or cancelling `cancel`) ends the loop; the stream closes
///
/// Calling `start` twice without `stop` is prevented by the Controller.
#[async_trait]
pub trait Worker: Send + Sync {
    /// Unique identifier, also the key of the worker's preference block.
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    fn kind(&self) -> WorkerKind;

    /// Read from preferences at construction time.
    fn is_disabled(&self) -> bool;

    /// Starts producing entities.
    ///
    /// # Returns
    /// * `Ok(EntityStream)` - Stream closing when production ends
    /// * `Err(...)` - The worker could not start (e.g., subscription failed)
    async fn start(&self, cancel: CancellationToken) -> Result<EntityStream>;

    /// Stops the current activation. Stopping an inactive worker is a no-op.
    async fn stop(&self) -> Result<()>;

    fn descriptor(&self) -> WorkerDescriptor {
        WorkerDescriptor {
            id: self.id().to_string(),
            description: self.description().to_string(),
            kind: self.kind(),
            enabled: !self.is_disabled(),
        }
    }
}

/// Cancellation scope of the current activation of a worker.
#[derive(Default)]
pub struct Activation {
    token: Mutex<Option<CancellationToken>>,
}

impl Activation {
    /// Opens a new activation under `parent`, cancelling any previous one.
    pub fn begin(&self, parent: &CancellationToken) -> CancellationToken {
        let child = parent.child_token();
        let previous = self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(child.clone());
        if let Some(previous) = previous {
            previous.cancel();
        }
        child
    }

    /// Cancels the current activation. Returns false if there was none.
    pub fn end(&self) -> bool {
        let current = self
            .token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match current {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_active(&self) -> bool {
        self.token
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }
}

/// Sends `entity` unless `cancel` fires first.
///
/// Returns false when the entity was not delivered (cancelled, or the
/// receiver is gone); the caller should stop producing.
pub async fn send_entity(
    tx: &mpsc::Sender<Entity>,
    entity: Entity,
    cancel: &CancellationToken,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(entity) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_lifecycle() {
        let parent = CancellationToken::new();
        let activation = Activation::default();
        assert!(!activation.is_active());
        assert!(!activation.end());

        let first = activation.begin(&parent);
        assert!(activation.is_active());

        let second = activation.begin(&parent);
        assert!(first.is_cancelled());
        assert!(!second.is_cancelled());

        assert!(activation.end());
        assert!(second.is_cancelled());
        assert!(!activation.is_active());
    }

    #[test]
    fn test_parent_cancellation_ends_activation() {
        let parent = CancellationToken::new();
        let activation = Activation::default();
        activation.begin(&parent);

        parent.cancel();
        assert!(!activation.is_active());
    }

    #[tokio::test]
    async fn test_send_entity_respects_cancellation() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();

        assert!(send_entity(&tx, Entity::sensor("a", "A", 1), &cancel).await);

        // Channel is full now; cancellation unblocks the send.
        cancel.cancel();
        assert!(!send_entity(&tx, Entity::sensor("a", "A", 2), &cancel).await);
    }
}
