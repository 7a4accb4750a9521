//! Worker manager - owns every controller and the agent's entity intake.
//!
//! ```text
//!   Controller "agent"  ── start_all ──┐
//!   Controller "system" ── start_all ──┼─→ intake ─→ SyncEngine::run
//!   Controller "commands" ─ start_all ─┘     ↑
//!   start_worker(id) ────────────────────────┘
//! ```

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::controller::{Controller, ControllerError, WorkerStatus};
use crate::merge::forward;
use crate::worker::{EntityStream, STREAM_CAPACITY};

#[derive(Clone, Debug, Serialize)]
pub struct ControllerStatus {
    pub id: String,
    pub workers: Vec<WorkerStatus>,
}

pub struct WorkerManager {
    controllers: Vec<Arc<Controller>>,
    cancel: CancellationToken,
    intake: mpsc::Sender<hubsync::Entity>,
}

impl WorkerManager {
    /// Creates the manager and the stream every worker feeds into.
    ///
    /// Workers run under children of `cancel`.
    pub fn new(controllers: Vec<Arc<Controller>>, cancel: CancellationToken) -> (Self, EntityStream) {
        let (intake, rx) = mpsc::channel(STREAM_CAPACITY);
        (
            Self {
                controllers,
                cancel,
                intake,
            },
            rx,
        )
    }

    pub fn controllers(&self) -> &[Arc<Controller>] {
        &self.controllers
    }

    /// Starts every enabled worker of every controller.
    ///
    /// Start failures are logged; returns the number of workers started.
    pub async fn start(&self) -> usize {
        let mut total = 0;
        for controller in &self.controllers {
            let all = controller.start_all(&self.cancel).await;
            for e in &all.errors {
                warn!(controller = %controller.id(), error = %e, "Worker failed to start");
            }
            info!(
                controller = %controller.id(),
                started = all.started.len(),
                "Controller started"
            );
            total += all.started.len();
            self.feed(all.stream);
        }
        total
    }

    fn feed(&self, stream: EntityStream) {
        tokio::spawn(forward(stream, self.intake.clone(), self.cancel.clone()));
    }

    async fn find(&self, worker_id: &str) -> Result<&Arc<Controller>, ControllerError> {
        for controller in &self.controllers {
            if controller.contains(worker_id).await {
                return Ok(controller);
            }
        }
        Err(ControllerError::UnknownWorker(worker_id.to_string()))
    }

    /// Starts one worker and feeds its stream into the intake.
    pub async fn start_worker(&self, worker_id: &str) -> Result<(), ControllerError> {
        let controller = self.find(worker_id).await?;
        let stream = controller.start(&self.cancel, worker_id).await?;
        self.feed(stream);
        Ok(())
    }

    pub async fn stop_worker(&self, worker_id: &str) -> Result<(), ControllerError> {
        self.find(worker_id).await?.stop(worker_id).await
    }

    pub async fn status(&self) -> Vec<ControllerStatus> {
        let mut out = Vec::with_capacity(self.controllers.len());
        for controller in &self.controllers {
            out.push(ControllerStatus {
                id: controller.id().to_string(),
                workers: controller.descriptors().await,
            });
        }
        out
    }

    /// Stops every worker, then cancels the root token.
    pub async fn shutdown(&self) {
        for controller in &self.controllers {
            if let Err(e) = controller.stop_all().await {
                error!(controller = %controller.id(), error = %e, "Failed to stop workers cleanly");
            }
        }
        self.cancel.cancel();
        info!("Worker manager stopped");
    }
}
