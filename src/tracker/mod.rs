use crate::entity::Entity;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;


/// Last state accepted by the hub for one sensor.
#[derive(Clone, Debug, Serialize)]
pub struct TrackedState {
    pub entity: Entity,
    pub updated_at: DateTime<Utc>,
}

/// Tracked-state cache for read-back queries
pub struct Tracker {
    /// Lock-free concurrent map for fast reads
    states: Arc<DashMap<String, TrackedState>>,

    /// Broadcast channel for accepted states
    accepted_tx: broadcast::Sender<TrackedState>,
}

impl Tracker {
    pub fn new() -> Self {
        let (accepted_tx, _) = broadcast::channel(256);
        Self {
            states: Arc::new(DashMap::new()),
            accepted_tx,
        }
    }

    /// Records an entity state the hub accepted.
    pub fn accept(&self, entity: &Entity) -> TrackedState {
        let state = TrackedState {
            entity: entity.clone(),
            updated_at: Utc::now(),
        };
        self.states.insert(entity.id.clone(), state.clone());

        // No subscribers is fine
        let _ = self.accepted_tx.send(state.clone());

        state
    }

    pub fn get(&self, entity_id: &str) -> Option<TrackedState> {
        self.states.get(entity_id).map(|s| s.clone())
    }

    /// Tracked entity ids, sorted.
    pub fn list(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.states.iter().map(|s| s.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TrackedState> {
        self.accepted_tx.subscribe()
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn is_empty(&self) -> bool {
        self.states.is_empty()
    }

    pub fn reset(&self) {
        self.states.clear();
    }
}

impl Default for Tracker {
    fn default() -> Self {
        Self::new()
    }
}
