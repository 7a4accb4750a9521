//! Worker supervising a runtime-changing set of resources.
//!
//! ```text
//!   enumerate() ──┐
//!                 ├─→ supervisor ── Added(id)   → track(id) ─→ forward ─┐
//!   watch()  ─────┘               └ Removed(id) → cancel scope          ├─→ output
//!                                                 track(id) ─→ forward ─┘
//! ```
//!
//! Each tracked resource owns a child cancellation token stored in an
//! id-keyed map behind a mutex. Adding a tracked id and removing an
//! untracked one are both no-ops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;
use hubsync::config::WorkerPreferences;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::merge::forward;
use crate::worker::{Activation, EntityStream, Worker, WorkerKind, STREAM_CAPACITY};

/// Change in the set of resources.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ResourceEvent {
    Added(String),
    Removed(String),
}

/// Resource class supervised by a [`DynamicWorker`].
#[async_trait]
pub trait ResourceMonitor: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Resources present right now.
    async fn enumerate(&self) -> Result<Vec<String>>;

    /// Add/remove notifications until `cancel` fires.
    async fn watch(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ResourceEvent>>;

    /// Starts the per-resource producer. Its stream must close once
    /// `cancel` fires.
    async fn track(&self, resource: &str, cancel: CancellationToken) -> Result<EntityStream>;
}

struct Tracked {
    generation: u64,
    cancel: CancellationToken,
}

/// Id → cancellation scope of every tracked resource.
#[derive(Default)]
struct ResourceSet {
    entries: HashMap<String, Tracked>,
    next_generation: u64,
}

impl ResourceSet {
    /// Returns the generation of the new entry, `None` if already tracked.
    fn insert(&mut self, id: &str, cancel: CancellationToken) -> Option<u64> {
        if self.entries.contains_key(id) {
            return None;
        }
        let generation = self.next_generation;
        self.next_generation += 1;
        self.entries
            .insert(id.to_string(), Tracked { generation, cancel });
        Some(generation)
    }

    fn remove(&mut self, id: &str) -> Option<CancellationToken> {
        self.entries.remove(id).map(|t| t.cancel)
    }

    /// Drops the entry only if it still belongs to `generation`.
    fn release(&mut self, id: &str, generation: u64) {
        if self.entries.get(id).is_some_and(|t| t.generation == generation) {
            self.entries.remove(id);
        }
    }

    fn drain(&mut self) -> Vec<CancellationToken> {
        self.entries.drain().map(|(_, t)| t.cancel).collect()
    }
}

type SharedResources = Arc<Mutex<ResourceSet>>;

fn lock(resources: &SharedResources) -> std::sync::MutexGuard<'_, ResourceSet> {
    resources.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct DynamicWorker<M> {
    monitor: Arc<M>,
    enabled: bool,
    activation: Activation,
    /// Resource set of the current activation. Each activation gets its own
    /// set, so a supervisor still shutting down never touches its successor's
    /// producers.
    resources: Mutex<SharedResources>,
}

impl<M: ResourceMonitor> DynamicWorker<M> {
    pub fn new(monitor: M, prefs: &WorkerPreferences) -> Self {
        Self {
            monitor: Arc::new(monitor),
            enabled: prefs.enabled,
            activation: Activation::default(),
            resources: Mutex::new(Arc::new(Mutex::new(ResourceSet::default()))),
        }
    }

    fn current(&self) -> SharedResources {
        Arc::clone(&self.resources.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Installs a fresh resource set for a new activation.
    fn renew(&self) -> SharedResources {
        let fresh: SharedResources = Arc::new(Mutex::new(ResourceSet::default()));
        *self.resources.lock().unwrap_or_else(PoisonError::into_inner) = Arc::clone(&fresh);
        fresh
    }

    /// Ids of currently tracked resources, sorted.
    pub fn tracked(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.current()).entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    fn cancel_tracked(resources: &SharedResources) -> usize {
        let tokens = lock(resources).drain();
        let count = tokens.len();
        for token in tokens {
            token.cancel();
        }
        count
    }
}

/// Starts a producer for `resource` unless it is already tracked.
async fn add_resource<M: ResourceMonitor>(
    monitor: &Arc<M>,
    resources: &SharedResources,
    resource: String,
    out: &mpsc::Sender<hubsync::Entity>,
    parent: &CancellationToken,
) {
    let scope = parent.child_token();
    let Some(generation) = lock(resources).insert(&resource, scope.clone()) else {
        debug!(worker = %monitor.id(), resource = %resource, "Resource already tracked");
        return;
    };

    let stream = match monitor.track(&resource, scope.clone()).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(worker = %monitor.id(), resource = %resource, error = %e, "Failed to track resource");
            lock(resources).release(&resource, generation);
            scope.cancel();
            return;
        }
    };

    info!(worker = %monitor.id(), resource = %resource, "Tracking resource");

    let resources = Arc::clone(resources);
    let out = out.clone();
    tokio::spawn(async move {
        forward(stream, out, scope).await;
        lock(&resources).release(&resource, generation);
    });
}

fn remove_resource<M: ResourceMonitor>(monitor: &M, resources: &SharedResources, resource: &str) {
    match lock(resources).remove(resource) {
        Some(scope) => {
            scope.cancel();
            info!(worker = %monitor.id(), resource = %resource, "Stopped tracking resource");
        }
        None => debug!(worker = %monitor.id(), resource = %resource, "Removed resource was not tracked"),
    }
}

#[async_trait]
impl<M: ResourceMonitor> Worker for DynamicWorker<M> {
    fn id(&self) -> &str {
        self.monitor.id()
    }

    fn description(&self) -> &str {
        self.monitor.description()
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Dynamic
    }

    fn is_disabled(&self) -> bool {
        !self.enabled
    }

    async fn start(&self, cancel: CancellationToken) -> Result<EntityStream> {
        let cancel = self.activation.begin(&cancel);
        let watch_cancel = cancel.child_token();

        let setup = async {
            let initial = self.monitor.enumerate().await?;
            let events = self.monitor.watch(watch_cancel.clone()).await?;
            Ok::<_, anyhow::Error>((initial, events))
        };
        let (initial, mut events) = match setup.await {
            Ok(setup) => setup,
            Err(e) => {
                self.activation.end();
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let monitor = Arc::clone(&self.monitor);
        let resources = self.renew();

        tokio::spawn(async move {
            info!(worker = %monitor.id(), resources = initial.len(), "Starting dynamic worker");

            for resource in initial {
                add_resource(&monitor, &resources, resource, &tx, &cancel).await;
            }

            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    event = events.recv() => event,
                };

                match event {
                    Some(ResourceEvent::Added(resource)) => {
                        add_resource(&monitor, &resources, resource, &tx, &cancel).await;
                    }
                    Some(ResourceEvent::Removed(resource)) => {
                        remove_resource(monitor.as_ref(), &resources, &resource);
                    }
                    None => {
                        // Feed ended; keep current producers until cancelled.
                        debug!(worker = %monitor.id(), "Resource feed closed");
                        cancel.cancelled().await;
                        break;
                    }
                }
            }

            let stopped = Self::cancel_tracked(&resources);
            watch_cancel.cancel();
            debug!(worker = %monitor.id(), resources = stopped, "Dynamic worker stopped");
        });

        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        Self::cancel_tracked(&self.current());
        self.activation.end();
        Ok(())
    }
}
