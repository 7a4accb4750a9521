use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use hubsync::Entity;
use tokio::sync::mpsc;

use super::*;
use crate::runners::oneshot::OneShotWorker;
use crate::worker::{Activation, WorkerKind};
use crate::workers::version::VersionCollector;
use hubsync::config::WorkerPreferences;

struct FakeWorker {
    id: String,
    disabled: bool,
    fail_start: bool,
    fail_stop: bool,
    starts: AtomicUsize,
    activation: Activation,
}

impl FakeWorker {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            disabled: false,
            fail_start: false,
            fail_stop: false,
            starts: AtomicUsize::new(0),
            activation: Activation::default(),
        }
    }

    fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    fn failing_start(mut self) -> Self {
        self.fail_start = true;
        self
    }

    fn failing_stop(mut self) -> Self {
        self.fail_stop = true;
        self
    }
}

#[async_trait]
impl Worker for FakeWorker {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        "fake"
    }

    fn kind(&self) -> WorkerKind {
        WorkerKind::OneShot
    }

    fn is_disabled(&self) -> bool {
        self.disabled
    }

    async fn start(&self, cancel: CancellationToken) -> Result<EntityStream> {
        if self.fail_start {
            return Err(anyhow!("no such device"));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let cancel = self.activation.begin(&cancel);
        let (tx, rx) = mpsc::channel(4);
        let id = self.id.clone();
        tokio::spawn(async move {
            let _ = tx.send(Entity::sensor(format!("{id}_value"), "Value", 1)).await;
            cancel.cancelled().await;
        });
        Ok(rx)
    }

    async fn stop(&self) -> Result<()> {
        self.activation.end();
        if self.fail_stop {
            return Err(anyhow!("stuck"));
        }
        Ok(())
    }
}

fn controller(workers: Vec<FakeWorker>) -> Controller {
    Controller::new(
        "test",
        workers
            .into_iter()
            .map(|w| Arc::new(w) as Arc<dyn Worker>)
            .collect(),
    )
}

#[tokio::test]
async fn test_start_and_stop_single_worker() {
    let c = controller(vec![FakeWorker::new("a"), FakeWorker::new("b")]);
    let root = CancellationToken::new();

    let mut stream = c.start(&root, "a").await.unwrap();
    assert_eq!(stream.recv().await.unwrap().id, "a_value");
    assert_eq!(c.active_workers().await, vec!["a"]);
    assert_eq!(c.inactive_workers().await, vec!["b"]);

    c.stop("a").await.unwrap();
    assert!(c.active_workers().await.is_empty());
    assert!(stream.recv().await.is_none());
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let c = controller(vec![FakeWorker::new("a")]);
    let root = CancellationToken::new();

    let _stream = c.start(&root, "a").await.unwrap();
    let err = c.start(&root, "a").await.unwrap_err();
    assert!(matches!(err, ControllerError::WorkerAlreadyStarted(id) if id == "a"));
}

#[tokio::test]
async fn test_restart_after_stop() {
    let c = controller(vec![FakeWorker::new("a")]);
    let root = CancellationToken::new();

    let _first = c.start(&root, "a").await.unwrap();
    c.stop("a").await.unwrap();
    let mut second = c.start(&root, "a").await.unwrap();
    assert_eq!(second.recv().await.unwrap().id, "a_value");
}

#[tokio::test]
async fn test_unknown_and_disabled_workers() {
    let c = controller(vec![FakeWorker::new("off").disabled()]);
    let root = CancellationToken::new();

    assert!(matches!(
        c.start(&root, "missing").await.unwrap_err(),
        ControllerError::UnknownWorker(_)
    ));
    assert!(matches!(
        c.start(&root, "off").await.unwrap_err(),
        ControllerError::WorkerDisabled(_)
    ));
    assert!(matches!(
        c.stop("missing").await.unwrap_err(),
        ControllerError::UnknownWorker(_)
    ));
}

#[tokio::test]
async fn test_start_all_merges_and_skips_disabled() {
    let c = controller(vec![
        FakeWorker::new("a"),
        FakeWorker::new("b"),
        FakeWorker::new("off").disabled(),
        FakeWorker::new("broken").failing_start(),
    ]);
    let root = CancellationToken::new();

    let mut all = c.start_all(&root).await;
    assert_eq!(all.started, vec!["a", "b"]);
    assert_eq!(all.errors.len(), 1);
    assert!(matches!(
        &all.errors[0],
        ControllerError::WorkerStartFailure { id, .. } if id == "broken"
    ));

    let mut ids = vec![
        all.stream.recv().await.unwrap().id,
        all.stream.recv().await.unwrap().id,
    ];
    ids.sort();
    assert_eq!(ids, vec!["a_value", "b_value"]);

    // Second call starts nothing new.
    let again = c.start_all(&root).await;
    assert!(again.started.is_empty());

    c.stop_all().await.unwrap();
    assert!(all.stream.recv().await.is_none());
}

#[tokio::test]
async fn test_stop_all_collects_errors() {
    let c = controller(vec![
        FakeWorker::new("a").failing_stop(),
        FakeWorker::new("b").failing_stop(),
        FakeWorker::new("c"),
    ]);
    let root = CancellationToken::new();
    let _all = c.start_all(&root).await;

    let err = c.stop_all().await.unwrap_err();
    match err {
        ControllerError::Multiple(errors) => assert_eq!(errors.len(), 2),
        other => panic!("expected Multiple, got {other}"),
    }
    // Failed stops still leave the workers inactive.
    assert!(c.active_workers().await.is_empty());
}

#[tokio::test]
async fn test_stop_all_single_error_is_unwrapped() {
    let c = controller(vec![FakeWorker::new("a").failing_stop()]);
    let root = CancellationToken::new();
    let _all = c.start_all(&root).await;

    assert!(matches!(
        c.stop_all().await.unwrap_err(),
        ControllerError::WorkerStopFailure { .. }
    ));
}

#[tokio::test]
async fn test_parent_cancellation_marks_inactive() {
    let c = controller(vec![FakeWorker::new("a")]);
    let root = CancellationToken::new();
    let _stream = c.start(&root, "a").await.unwrap();

    root.cancel();
    assert_eq!(c.inactive_workers().await, vec!["a"]);
}

#[tokio::test]
async fn test_descriptors_report_activity() {
    let c = controller(vec![FakeWorker::new("a"), FakeWorker::new("off").disabled()]);
    let root = CancellationToken::new();
    let _stream = c.start(&root, "a").await.unwrap();

    let statuses = c.descriptors().await;
    assert_eq!(statuses.len(), 2);
    assert!(statuses[0].active && statuses[0].descriptor.enabled);
    assert!(!statuses[1].active && !statuses[1].descriptor.enabled);

    let json = serde_json::to_value(&statuses[0]).unwrap();
    assert_eq!(json["id"], "a");
    assert_eq!(json["kind"], "one_shot");
    assert_eq!(json["active"], true);
}

#[tokio::test]
async fn test_duplicate_ids_keep_first() {
    let c = controller(vec![FakeWorker::new("a"), FakeWorker::new("a").disabled()]);
    let statuses = c.descriptors().await;
    assert_eq!(statuses.len(), 1);
    assert!(statuses[0].descriptor.enabled);
}

#[tokio::test]
async fn test_one_shot_stays_active_after_stream_closes() {
    let worker = OneShotWorker::new(
        VersionCollector::with_version("1.2.3"),
        &WorkerPreferences::default(),
    );
    let c = Controller::new("test", vec![Arc::new(worker) as Arc<dyn Worker>]);
    let root = CancellationToken::new();

    let mut stream = c.start(&root, "agent_version").await.unwrap();
    assert!(stream.recv().await.is_some());
    assert!(stream.recv().await.is_none());

    let statuses = c.descriptors().await;
    assert!(statuses[0].active);
    assert!(matches!(
        c.start(&root, "agent_version").await,
        Err(ControllerError::WorkerAlreadyStarted(_))
    ));

    c.stop("agent_version").await.unwrap();
    assert!(!c.descriptors().await[0].active);
    assert!(c.start(&root, "agent_version").await.is_ok());
}
