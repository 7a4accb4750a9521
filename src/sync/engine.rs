use std::collections::HashMap;
use std::sync::Arc;

use futures::future::join_all;
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::reconcile::{reconcile, Reconciliation};
use super::{StateSink, SyncOutcome};
use crate::entity::Entity;
use crate::hub::{HubApi, RemoteConfigCache};
use crate::registry::Registry;
use crate::tracker::Tracker;

const DEFAULT_MAX_BATCH: usize = 64;

/// Consumes the merged entity stream and synchronizes it with the hub.
pub struct SyncEngine {
    hub: Arc<dyn HubApi>,
    registry: Arc<Registry>,
    remote: Arc<RemoteConfigCache>,
    tracker: Arc<Tracker>,
    sink: Option<Arc<dyn StateSink>>,
    max_batch: usize,
}

impl SyncEngine {
    pub fn new(
        hub: Arc<dyn HubApi>,
        registry: Arc<Registry>,
        remote: Arc<RemoteConfigCache>,
        tracker: Arc<Tracker>,
    ) -> Self {
        Self {
            hub,
            registry,
            remote,
            tracker,
            sink: None,
            max_batch: DEFAULT_MAX_BATCH,
        }
    }

    /// Mirrors accepted states to `sink`.
    pub fn with_sink(mut self, sink: Arc<dyn StateSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Upper bound on entities taken from the stream per batch.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    pub fn tracker(&self) -> &Arc<Tracker> {
        &self.tracker
    }

    /// Synchronizes a single entity.
    pub async fn process(&self, entity: Entity) -> SyncOutcome {
        self.process_batch(vec![entity])
            .await
            .pop()
            .map(|(_, outcome)| outcome)
            .unwrap_or(SyncOutcome::Failed)
    }

    /// Synchronizes a batch of entities with distinct ids.
    ///
    /// Events and registrations are sent concurrently, one request each;
    /// updates for already-registered sensors go out as one bulk request.
    /// Outcomes are returned in input order.
    pub async fn process_batch(&self, entities: Vec<Entity>) -> Vec<(String, SyncOutcome)> {
        let mut outcomes: Vec<Option<SyncOutcome>> = vec![None; entities.len()];
        let mut singles = Vec::new();
        let mut updates = Vec::new();

        for (index, entity) in entities.iter().enumerate() {
            if entity.is_event() || !self.registry.is_registered(&entity.id) {
                singles.push(index);
                continue;
            }

            match self.reconcile_update(entity).await {
                Some(outcome) => outcomes[index] = Some(outcome),
                None => updates.push(index),
            }
        }

        let single_results = join_all(singles.iter().map(|&i| {
            let entity = &entities[i];
            async move {
                if entity.is_event() {
                    self.fire(entity).await
                } else {
                    self.register(entity).await
                }
            }
        }));
        let update_results = self.update(&entities, &updates);

        let (single_results, update_results) = tokio::join!(single_results, update_results);

        for (index, outcome) in singles.into_iter().zip(single_results) {
            outcomes[index] = Some(outcome);
        }
        for (index, outcome) in updates.into_iter().zip(update_results) {
            outcomes[index] = Some(outcome);
        }

        entities
            .into_iter()
            .zip(outcomes)
            .map(|(entity, outcome)| (entity.id, outcome.unwrap_or(SyncOutcome::Failed)))
            .collect()
    }

    /// Consumes `rx` until it closes or `cancel` fires.
    ///
    /// Ready entities are taken in chunks of up to `max_batch` and split
    /// into rounds so an id is never in flight twice at once.
    pub async fn run(&self, rx: mpsc::Receiver<Entity>, cancel: CancellationToken) {
        let mut chunks = ReceiverStream::new(rx).ready_chunks(self.max_batch);

        info!(max_batch = self.max_batch, "Synchronization engine started");

        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                chunk = chunks.next() => match chunk {
                    Some(chunk) => chunk,
                    None => break,
                },
            };

            for round in split_rounds(chunk) {
                let size = round.len();
                let results = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        info!("Synchronization engine stopped");
                        return;
                    }
                    results = self.process_batch(round) => results,
                };

                let failed = results
                    .iter()
                    .filter(|(_, o)| *o == SyncOutcome::Failed)
                    .count();
                debug!(entities = size, failed = failed, "Processed round");
            }
        }

        info!("Synchronization engine stopped");
    }

    /// Clears registry and tracked state and forces a hub config refresh.
    pub async fn reset(&self) -> anyhow::Result<()> {
        self.registry.reset()?;
        self.tracker.reset();
        self.remote.invalidate().await;
        info!("Registry and tracked state reset");
        Ok(())
    }

    async fn fire(&self, event: &Entity) -> SyncOutcome {
        match self.hub.fire_event(event).await {
            Ok(()) => {
                debug!(event_type = %event.id, "Event fired");
                SyncOutcome::Fired
            }
            Err(e) => {
                warn!(event_type = %event.id, error = %e, "Failed to fire event");
                SyncOutcome::Failed
            }
        }
    }

    async fn register(&self, entity: &Entity) -> SyncOutcome {
        if let Err(e) = self.hub.register(entity).await {
            warn!(entity_id = %entity.id, error = %e, "Registration failed");
            return SyncOutcome::Failed;
        }

        if let Err(e) = self.registry.mark_registered(&entity.id) {
            warn!(entity_id = %entity.id, error = %e, "Failed to persist registration");
        }
        info!(entity_id = %entity.id, "Entity registered");

        self.accept(entity).await;
        SyncOutcome::Registered
    }

    /// Applies the disablement truth table. Returns the terminal outcome when
    /// the update must be suppressed, `None` when it should be sent.
    async fn reconcile_update(&self, entity: &Entity) -> Option<SyncOutcome> {
        let local = self.registry.is_disabled(&entity.id);
        let remote = self.remote.is_disabled(&entity.id).await;

        match reconcile(local, remote) {
            Reconciliation::Send => None,
            Reconciliation::ReEnable => {
                info!(entity_id = %entity.id, "Entity re-enabled on hub");
                self.persist_disabled(&entity.id, false);
                None
            }
            Reconciliation::Disable => {
                info!(entity_id = %entity.id, "Entity disabled on hub, suppressing updates");
                self.persist_disabled(&entity.id, true);
                Some(SyncOutcome::Disabled)
            }
            Reconciliation::Suppress => {
                debug!(entity_id = %entity.id, "Entity disabled, update suppressed");
                Some(SyncOutcome::Disabled)
            }
        }
    }

    /// Sends one bulk update for `entities[indices]`, returning an outcome
    /// per index. Each entity's status is handled independently.
    async fn update(&self, entities: &[Entity], indices: &[usize]) -> Vec<SyncOutcome> {
        if indices.is_empty() {
            return Vec::new();
        }

        let batch: Vec<Entity> = indices.iter().map(|&i| entities[i].clone()).collect();
        let statuses = match self.hub.update(&batch).await {
            Ok(statuses) => statuses,
            Err(e) => {
                warn!(entities = batch.len(), error = %e, "Bulk update failed");
                return vec![SyncOutcome::Failed; batch.len()];
            }
        };

        let mut outcomes = Vec::with_capacity(batch.len());
        for entity in &batch {
            let outcome = match statuses.get(&entity.id) {
                Some(status) if status.success && status.disabled => {
                    info!(entity_id = %entity.id, "Hub reports entity disabled");
                    self.persist_disabled(&entity.id, true);
                    SyncOutcome::Disabled
                }
                Some(status) if status.success => {
                    self.accept(entity).await;
                    SyncOutcome::Updated
                }
                Some(status) => {
                    let (code, message) = status
                        .error
                        .as_ref()
                        .map(|e| (e.code_str(), e.message.clone()))
                        .unwrap_or_else(|| ("unknown".to_string(), String::new()));
                    warn!(entity_id = %entity.id, code = %code, message = %message, "Update rejected");
                    SyncOutcome::Failed
                }
                None => {
                    warn!(entity_id = %entity.id, "No status for entity in update response");
                    SyncOutcome::Failed
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    async fn accept(&self, entity: &Entity) {
        self.tracker.accept(entity);

        if let Some(sink) = &self.sink {
            if let Err(e) = sink.publish(entity).await {
                warn!(entity_id = %entity.id, error = %e, "Failed to mirror entity state");
            }
        }
    }

    fn persist_disabled(&self, entity_id: &str, disabled: bool) {
        if let Err(e) = self.registry.set_disabled(entity_id, disabled) {
            warn!(entity_id = %entity_id, error = %e, "Failed to persist disabled flag");
        }
    }
}

/// Splits `entities` into rounds where each id appears at most once.
///
/// The n-th occurrence of an id goes to round n, so per-id order is kept
/// when rounds are processed in sequence.
pub fn split_rounds(entities: Vec<Entity>) -> Vec<Vec<Entity>> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut rounds: Vec<Vec<Entity>> = Vec::new();

    for entity in entities {
        let occurrence = seen.entry(entity.id.clone()).or_insert(0);
        let round = *occurrence;
        *occurrence += 1;

        if rounds.len() <= round {
            rounds.push(Vec::new());
        }
        rounds[round].push(entity);
    }

    rounds
}
