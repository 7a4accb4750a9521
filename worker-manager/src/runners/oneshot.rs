use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use hubsync::config::WorkerPreferences;
use hubsync::Entity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::worker::{send_entity, Activation, EntityStream, Worker, WorkerKind, STREAM_CAPACITY};

/// Source of entities that only need to be reported once per activation.
#[async_trait]
pub trait Collector: Send + Sync + 'static {
    fn id(&self) -> &str;

    fn description(&self) -> &str;

    async fn collect(&self) -> Result<Vec<Entity>>;
}

/// Emits the collected entities, then closes its stream.
pub struct OneShotWorker<C> {
    collector: Arc<C>,
    enabled: bool,
    activation: Activation,
}

impl<C: Collector> OneShotWorker<C> {
    pub fn new(collector: C, prefs: &WorkerPreferences) -> Self {
        Self {
            collector: Arc::new(collector),
            enabled: prefs.enabled,
            activation: Activation::default(),
        }
    }
}

#[async_trait]
impl<C: Collector> Worker for OneShotWorker<C> {
    fn id(&self) -> &str {
        self.collector.id()
    }

    fn description(&self) -> &str {
        self.collector.description()
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::OneShot
    }

    fn is_disabled(&self) -> bool {
        !self.enabled
    }

    async fn start(&self, cancel: CancellationToken) -> Result<EntityStream> {
        let cancel = self.activation.begin(&cancel);
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let collector = Arc::clone(&self.collector);

        tokio::spawn(async move {
            let collected = tokio::select! {
                biased;
                _ = cancel.cancelled() => return,
                collected = collector.collect() => collected,
            };

            match collected {
                Ok(entities) => {
                    for entity in entities {
                        if !send_entity(&tx, entity, &cancel).await {
                            break;
                        }
                    }
                    debug!(worker = %collector.id(), "One-shot collection sent");
                }
                Err(e) => warn!(worker = %collector.id(), error = %e, "Collection failed"),
            }
        });

        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.activation.end();
        Ok(())
    }
}
