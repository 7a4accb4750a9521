use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hubsync::config::WorkerPreferences;
use hubsync::Entity;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::worker::{send_entity, Activation, EntityStream, Worker, WorkerKind, STREAM_CAPACITY};

/// Preference key overriding a poller's default interval.
pub const INTERVAL_KEY: &str = "update_interval_secs";

/// Source of entities sampled on a fixed interval.
#[async_trait]
pub trait Poller: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Used when the preference block has no `update_interval_secs`.
    fn default_interval(&self) -> Duration;

    async fn poll(&self) -> Result<Vec<Entity>>;
}

/// Runs a [`Poller`] immediately and then on every interval tick.
///
/// Poll errors are logged and the loop carries on with the next tick.
pub struct PollingWorker<P> {
    poller: Arc<P>,
    interval: Duration,
    enabled: bool,
    activation: Activation,
}

impl<P: Poller> PollingWorker<P> {
    pub fn new(poller: P, prefs: &WorkerPreferences) -> Self {
        let interval = prefs
            .get_u64(INTERVAL_KEY)
            .map(Duration::from_secs)
            .unwrap_or_else(|| poller.default_interval())
            .max(Duration::from_secs(1));

        Self {
            poller: Arc::new(poller),
            interval,
            enabled: prefs.enabled,
            activation: Activation::default(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[async_trait]
impl<P: Poller> Worker for PollingWorker<P> {
    fn id(&self) -> &str {
        self.poller.id()
    }

    fn description(&self) -> &str {
        self.poller.description()
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Polling
    }

    fn is_disabled(&self) -> bool {
        !self.enabled
    }

    async fn start(&self, cancel: CancellationToken) -> Result<EntityStream> {
        let cancel = self.activation.begin(&cancel);
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let poller = Arc::clone(&self.poller);
        let period = self.interval;

        tokio::spawn(async move {
            info!(worker = %poller.id(), interval_secs = period.as_secs(), "Starting polling worker");

            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

            'outer: loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let polled = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    polled = poller.poll() => polled,
                };

                match polled {
                    Ok(entities) => {
                        debug!(worker = %poller.id(), count = entities.len(), "Polled");
                        for entity in entities {
                            if !send_entity(&tx, entity, &cancel).await {
                                break 'outer;
                            }
                        }
                    }
                    Err(e) => {
                        warn!(worker = %poller.id(), error = %e, "Poll failed");
                    }
                }
            }

            debug!(worker = %poller.id(), "Polling worker stopped");
        });

        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.activation.end();
        Ok(())
    }
}
