//! Workers → controllers → manager → sync engine, end to end with an
//! in-memory hub.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use hubsync::config::WorkerPreferences;
use hubsync::hub::{EntityStatus, HubApi, HubError, RemoteConfig, RemoteConfigCache};
use hubsync::{Entity, Registry, SyncEngine, Tracker};
use tokio_util::sync::CancellationToken;
use worker_manager::runners::{Collector, OneShotWorker};
use worker_manager::{Controller, ControllerError, Worker, WorkerManager};

#[derive(Default)]
struct RecordingHub {
    registrations: Mutex<Vec<String>>,
    updates: Mutex<Vec<String>>,
}

#[async_trait]
impl HubApi for RecordingHub {
    async fn register(&self, entity: &Entity) -> Result<(), HubError> {
        self.registrations.lock().unwrap().push(entity.id.clone());
        Ok(())
    }

    async fn update(&self, entities: &[Entity]) -> Result<HashMap<String, EntityStatus>, HubError> {
        let mut updates = self.updates.lock().unwrap();
        Ok(entities
            .iter()
            .map(|e| {
                updates.push(e.id.clone());
                (
                    e.id.clone(),
                    EntityStatus {
                        success: true,
                        ..EntityStatus::default()
                    },
                )
            })
            .collect())
    }

    async fn fire_event(&self, _event: &Entity) -> Result<(), HubError> {
        Ok(())
    }

    async fn fetch_config(&self) -> Result<RemoteConfig, HubError> {
        Ok(RemoteConfig::default())
    }
}

struct Fixed {
    id: &'static str,
    entity: Entity,
}

#[async_trait]
impl Collector for Fixed {
    fn id(&self) -> &str {
        self.id
    }

    fn description(&self) -> &str {
        "fixed"
    }

    async fn collect(&self) -> Result<Vec<Entity>> {
        Ok(vec![self.entity.clone()])
    }
}

fn fixed(id: &'static str, entity: Entity, enabled: bool) -> Arc<dyn Worker> {
    let prefs = WorkerPreferences {
        enabled,
        ..WorkerPreferences::default()
    };
    Arc::new(OneShotWorker::new(Fixed { id, entity }, &prefs))
}

struct Agent {
    hub: Arc<RecordingHub>,
    registry: Arc<Registry>,
    tracker: Arc<Tracker>,
    manager: Arc<WorkerManager>,
    cancel: CancellationToken,
}

fn agent(controllers: Vec<Arc<Controller>>) -> Agent {
    let hub = Arc::new(RecordingHub::default());
    let registry = Arc::new(Registry::in_memory().unwrap());
    let tracker = Arc::new(Tracker::new());
    let remote = Arc::new(RemoteConfigCache::new(hub.clone(), Duration::from_secs(30)));
    let engine = Arc::new(SyncEngine::new(
        hub.clone(),
        registry.clone(),
        remote,
        tracker.clone(),
    ));

    let cancel = CancellationToken::new();
    let (manager, intake) = WorkerManager::new(controllers, cancel.clone());
    let engine_cancel = cancel.clone();
    tokio::spawn(async move { engine.run(intake, engine_cancel).await });

    Agent {
        hub,
        registry,
        tracker,
        manager: Arc::new(manager),
        cancel,
    }
}

async fn wait_for(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

#[tokio::test]
async fn test_entities_flow_from_workers_to_hub() {
    let controller = Arc::new(Controller::new(
        "system",
        vec![
            fixed("battery", Entity::sensor("batt_level", "Battery", 50), true),
            fixed("memory", Entity::sensor("mem_used", "Memory", 40), true),
        ],
    ));
    let agent = agent(vec![controller]);

    assert_eq!(agent.manager.start().await, 2);
    wait_for(|| agent.registry.is_registered("batt_level") && agent.registry.is_registered("mem_used")).await;

    let mut registrations = agent.hub.registrations.lock().unwrap().clone();
    registrations.sort();
    assert_eq!(registrations, vec!["batt_level", "mem_used"]);
    assert_eq!(agent.tracker.list(), vec!["batt_level", "mem_used"]);

    // A second activation of an already registered sensor is an update.
    agent.manager.stop_worker("battery").await.unwrap();
    agent.manager.start_worker("battery").await.unwrap();
    wait_for(|| agent.hub.updates.lock().unwrap().contains(&"batt_level".to_string())).await;
    assert_eq!(agent.hub.registrations.lock().unwrap().len(), 2);

    agent.manager.shutdown().await;
    assert!(agent.cancel.is_cancelled());
}

#[tokio::test]
async fn test_disabled_worker_is_never_started() {
    let controller = Arc::new(Controller::new(
        "system",
        vec![
            fixed("battery", Entity::sensor("batt_level", "Battery", 50), true),
            fixed("memory", Entity::sensor("mem_used", "Memory", 40), false),
        ],
    ));
    let agent = agent(vec![controller.clone()]);

    assert_eq!(agent.manager.start().await, 1);
    assert!(matches!(
        agent.manager.start_worker("memory").await,
        Err(ControllerError::WorkerDisabled(_))
    ));

    wait_for(|| agent.registry.is_registered("batt_level")).await;
    assert!(!agent.registry.is_registered("mem_used"));
    assert_eq!(controller.inactive_workers().await, vec!["memory"]);
}

#[tokio::test]
async fn test_manager_start_stop_contract() {
    let agent = agent(vec![
        Arc::new(Controller::new(
            "agent",
            vec![fixed("version", Entity::sensor("agent_version", "Version", "1.0"), true)],
        )),
        Arc::new(Controller::new(
            "system",
            vec![fixed("battery", Entity::sensor("batt_level", "Battery", 50), true)],
        )),
    ]);

    agent.manager.start_worker("battery").await.unwrap();
    assert!(matches!(
        agent.manager.start_worker("battery").await,
        Err(ControllerError::WorkerAlreadyStarted(_))
    ));
    assert!(matches!(
        agent.manager.start_worker("nope").await,
        Err(ControllerError::UnknownWorker(_))
    ));

    agent.manager.stop_worker("battery").await.unwrap();
    agent.manager.stop_worker("battery").await.unwrap();
    agent.manager.stop_worker("version").await.unwrap();

    let status = agent.manager.status().await;
    assert_eq!(status.len(), 2);
    assert_eq!(status[0].id, "agent");
    assert!(status.iter().flat_map(|c| &c.workers).all(|w| !w.active));
}
