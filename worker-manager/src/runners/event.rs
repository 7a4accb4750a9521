use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use hubsync::config::WorkerPreferences;
use hubsync::Entity;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::worker::{Activation, EntityStream, Worker, WorkerKind, STREAM_CAPACITY};

/// Source that pushes entities as events occur.
#[async_trait]
pub trait EventSource: Send + Sync + 'static {
    /// Live subscription handed from `subscribe` to `forward`.
    type Feed: Send + 'static;

    fn id(&self) -> &str;

    fn description(&self) -> &str;

    /// Sets up the subscription. An error here fails the worker start.
    async fn subscribe(&self) -> Result<Self::Feed>;

    /// Turns feed items into entities until the feed ends or `cancel` fires.
    async fn forward(&self, feed: Self::Feed, tx: mpsc::Sender<Entity>, cancel: CancellationToken);

    /// Extra enablement condition on top of the preference flag.
    fn available(&self) -> bool {
        true
    }
}

pub struct EventWorker<S> {
    source: Arc<S>,
    enabled: bool,
    activation: Activation,
}

impl<S: EventSource> EventWorker<S> {
    pub fn new(source: S, prefs: &WorkerPreferences) -> Self {
        Self {
            source: Arc::new(source),
            enabled: prefs.enabled,
            activation: Activation::default(),
        }
    }
}

#[async_trait]
impl<S: EventSource> Worker for EventWorker<S> {
    fn id(&self) -> &str {
        self.source.id()
    }

    fn description(&self) -> &str {
        self.source.description()
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::Event
    }

    fn is_disabled(&self) -> bool {
        !self.enabled || !self.source.available()
    }

    async fn start(&self, cancel: CancellationToken) -> Result<EntityStream> {
        let cancel = self.activation.begin(&cancel);

        let feed = match self.source.subscribe().await {
            Ok(feed) => feed,
            Err(e) => {
                self.activation.end();
                return Err(e);
            }
        };

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let source = Arc::clone(&self.source);

        tokio::spawn(async move {
            info!(worker = %source.id(), "Starting event worker");
            source.forward(feed, tx, cancel).await;
            debug!(worker = %source.id(), "Event worker stopped");
        });

        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.activation.end();
        Ok(())
    }
}
