//! Controller - owns a named collection of workers.
//!
//! The rest of the agent starts and stops workers through a Controller,
//! never directly. Each entry keeps its own cancellation token so stopping
//! one worker never affects another.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::merge::merge;
use crate::worker::{EntityStream, Worker, WorkerDescriptor};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("unknown worker: {0}")]
    UnknownWorker(String),

    #[error("worker already started: {0}")]
    WorkerAlreadyStarted(String),

    #[error("worker is disabled: {0}")]
    WorkerDisabled(String),

    #[error("failed to start worker {id}: {source}")]
    WorkerStartFailure {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to stop worker {id}: {source}")]
    WorkerStopFailure {
        id: String,
        #[source]
        source: BoxError,
    },

    #[error("{} worker errors: {}", .0.len(), join_errors(.0))]
    Multiple(Vec<ControllerError>),
}

fn join_errors(errors: &[ControllerError]) -> String {
    errors
        .iter()
        .map(|e| e.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

impl ControllerError {
    /// `None` for no errors, the error itself for one, `Multiple` otherwise.
    pub fn collect(mut errors: Vec<ControllerError>) -> Option<ControllerError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(ControllerError::Multiple(errors)),
        }
    }
}

struct ControllerEntry {
    worker: Arc<dyn Worker>,
    started: bool,
    cancel: Option<CancellationToken>,
}

impl ControllerEntry {
    /// Started and not stopped or cancelled from above since. A finished
    /// stream does not end activity: a one-shot worker that has sent its
    /// entities stays active until it is stopped.
    fn is_active(&self) -> bool {
        self.started && self.cancel.as_ref().is_some_and(|c| !c.is_cancelled())
    }
}

/// Descriptor plus current activity, as reported by the status API.
#[derive(Clone, Debug, Serialize)]
pub struct WorkerStatus {
    #[serde(flatten)]
    pub descriptor: WorkerDescriptor,
    /// The worker holds a live activation: it was started and has not been
    /// stopped or cancelled. This says nothing about whether its stream is
    /// still producing; one-shot workers report `true` after their single
    /// emission, and a second start is rejected until they are stopped.
    pub active: bool,
}

/// Result of [`Controller::start_all`].
pub struct StartAll {
    /// Merged stream of every worker started
    pub stream: EntityStream,
    pub started: Vec<String>,
    pub errors: Vec<ControllerError>,
}

pub struct Controller {
    id: String,
    entries: Mutex<BTreeMap<String, ControllerEntry>>,
}

impl Controller {
    /// Creates a controller over `workers`. Later duplicates of an id are ignored.
    pub fn new(id: impl Into<String>, workers: Vec<Arc<dyn Worker>>) -> Self {
        let id = id.into();
        let mut entries = BTreeMap::new();
        for worker in workers {
            let worker_id = worker.id().to_string();
            if entries.contains_key(&worker_id) {
                warn!(controller = %id, worker = %worker_id, "Duplicate worker id ignored");
                continue;
            }
            entries.insert(
                worker_id,
                ControllerEntry {
                    worker,
                    started: false,
                    cancel: None,
                },
            );
        }

        Self {
            id,
            entries: Mutex::new(entries),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub async fn contains(&self, worker_id: &str) -> bool {
        self.entries.lock().await.contains_key(worker_id)
    }

    pub async fn active_workers(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|(_, e)| e.is_active())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn inactive_workers(&self) -> Vec<String> {
        let entries = self.entries.lock().await;
        entries
            .iter()
            .filter(|(_, e)| !e.is_active())
            .map(|(id, _)| id.clone())
            .collect()
    }

    pub async fn descriptors(&self) -> Vec<WorkerStatus> {
        let entries = self.entries.lock().await;
        entries
            .values()
            .map(|e| WorkerStatus {
                descriptor: e.worker.descriptor(),
                active: e.is_active(),
            })
            .collect()
    }

    /// Starts one worker under a child of `parent`.
    ///
    /// The entry lock is held while the worker starts, so a concurrent start
    /// of the same id sees either the inactive or the active state.
    pub async fn start(
        &self,
        parent: &CancellationToken,
        worker_id: &str,
    ) -> Result<EntityStream, ControllerError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(worker_id)
            .ok_or_else(|| ControllerError::UnknownWorker(worker_id.to_string()))?;

        self.start_entry(parent, worker_id, entry).await
    }

    async fn start_entry(
        &self,
        parent: &CancellationToken,
        worker_id: &str,
        entry: &mut ControllerEntry,
    ) -> Result<EntityStream, ControllerError> {
        if entry.is_active() {
            return Err(ControllerError::WorkerAlreadyStarted(worker_id.to_string()));
        }
        if entry.worker.is_disabled() {
            return Err(ControllerError::WorkerDisabled(worker_id.to_string()));
        }

        let token = parent.child_token();
        match entry.worker.start(token.clone()).await {
            Ok(stream) => {
                entry.started = true;
                entry.cancel = Some(token);
                info!(controller = %self.id, worker = %worker_id, "Worker started");
                Ok(stream)
            }
            Err(e) => {
                token.cancel();
                Err(ControllerError::WorkerStartFailure {
                    id: worker_id.to_string(),
                    source: e.into(),
                })
            }
        }
    }

    /// Stops one worker.
    ///
    /// The entry is marked inactive and its token cancelled even when the
    /// worker reports an error.
    pub async fn stop(&self, worker_id: &str) -> Result<(), ControllerError> {
        let mut entries = self.entries.lock().await;
        let entry = entries
            .get_mut(worker_id)
            .ok_or_else(|| ControllerError::UnknownWorker(worker_id.to_string()))?;

        self.stop_entry(worker_id, entry).await
    }

    async fn stop_entry(
        &self,
        worker_id: &str,
        entry: &mut ControllerEntry,
    ) -> Result<(), ControllerError> {
        let result = entry.worker.stop().await;

        entry.started = false;
        if let Some(token) = entry.cancel.take() {
            token.cancel();
        }

        match result {
            Ok(()) => {
                info!(controller = %self.id, worker = %worker_id, "Worker stopped");
                Ok(())
            }
            Err(e) => Err(ControllerError::WorkerStopFailure {
                id: worker_id.to_string(),
                source: e.into(),
            }),
        }
    }

    /// Starts every enabled, inactive worker and merges their streams.
    ///
    /// Disabled workers are skipped silently; start failures are collected
    /// and do not prevent other workers from starting.
    pub async fn start_all(&self, parent: &CancellationToken) -> StartAll {
        let mut entries = self.entries.lock().await;
        let mut streams = Vec::new();
        let mut started = Vec::new();
        let mut errors = Vec::new();

        for (worker_id, entry) in entries.iter_mut() {
            if entry.worker.is_disabled() {
                debug!(controller = %self.id, worker = %worker_id, "Worker disabled, not starting");
                continue;
            }
            if entry.is_active() {
                continue;
            }

            match self.start_entry(parent, worker_id, entry).await {
                Ok(stream) => {
                    streams.push(stream);
                    started.push(worker_id.clone());
                }
                Err(e) => {
                    warn!(controller = %self.id, error = %e, "Worker failed to start");
                    errors.push(e);
                }
            }
        }

        StartAll {
            stream: merge(streams, parent.clone()),
            started,
            errors,
        }
    }

    /// Stops every active worker.
    pub async fn stop_all(&self) -> Result<(), ControllerError> {
        let mut entries = self.entries.lock().await;
        let mut errors = Vec::new();

        for (worker_id, entry) in entries.iter_mut() {
            if !entry.started {
                continue;
            }
            if let Err(e) = self.stop_entry(worker_id, entry).await {
                errors.push(e);
            }
        }

        match ControllerError::collect(errors) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests;
