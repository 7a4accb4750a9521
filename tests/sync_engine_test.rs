// Integration tests for the sync engine over the HTTP webhook transport

use std::sync::Arc;
use std::time::Duration;

use hubsync::hub::{HttpHub, RemoteConfigCache, RetryPolicy};
use hubsync::{Entity, Registry, SyncEngine, SyncOutcome, Tracker};
use mockito::Matcher;
use serde_json::{json, Map};
use tempfile::TempDir;

fn engine(url: &str, registry: Arc<Registry>) -> (SyncEngine, Arc<Tracker>) {
    let hub = Arc::new(
        HttpHub::new(
            url,
            Some("secret".to_string()),
            Duration::from_secs(5),
            RetryPolicy::none(),
        )
        .unwrap(),
    );
    let remote = Arc::new(RemoteConfigCache::new(hub.clone(), Duration::from_secs(30)));
    let tracker = Arc::new(Tracker::new());
    (SyncEngine::new(hub, registry, remote, tracker.clone()), tracker)
}

fn battery(level: i64) -> Entity {
    Entity::sensor("batt_level", "Battery Level", level)
        .with_unit("%")
        .with_device_class("battery")
}

/// First value registers, later values update; registration survives a restart.
#[tokio::test]
async fn test_register_then_update() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("registry.db");
    let mut server = mockito::Server::new_async().await;

    let register = server
        .mock("POST", "/")
        .match_header("authorization", "Bearer secret")
        .match_body(Matcher::PartialJson(json!({
            "type": "register_sensor",
            "data": {"unique_id": "batt_level", "unit_of_measurement": "%"}
        })))
        .with_body(r#"{"success": true}"#)
        .expect(1)
        .create_async()
        .await;
    let config = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "get_config"})))
        .with_body(r#"{"entities": {"batt_level": {"disabled": false}}, "version": "2024.1"}"#)
        .expect(1)
        .create_async()
        .await;
    let update = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "update_sensor_states"})))
        .with_body(r#"{"batt_level": {"success": true}}"#)
        .expect(2)
        .create_async()
        .await;

    let registry = Arc::new(Registry::open(&db).unwrap());
    let (engine, tracker) = engine(&server.url(), registry.clone());

    assert_eq!(engine.process(battery(50)).await, SyncOutcome::Registered);
    assert_eq!(engine.process(battery(45)).await, SyncOutcome::Updated);
    assert_eq!(engine.process(battery(40)).await, SyncOutcome::Updated);

    register.assert_async().await;
    config.assert_async().await;
    update.assert_async().await;

    assert_eq!(tracker.get("batt_level").unwrap().entity.value, 40);

    drop(engine);
    drop(registry);
    let reopened = Registry::open(&db).unwrap();
    assert!(reopened.is_registered("batt_level"));
    assert!(!reopened.is_disabled("batt_level"));
}

/// A sensor disabled on the hub is not updated and the flag is persisted.
#[tokio::test]
async fn test_hub_side_disable_suppresses_updates() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "get_config"})))
        .with_body(r#"{"entities": {"batt_level": {"disabled": true}}}"#)
        .create_async()
        .await;
    let update = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "update_sensor_states"})))
        .with_body(r#"{"batt_level": {"success": true}}"#)
        .expect(0)
        .create_async()
        .await;

    let registry = Arc::new(Registry::in_memory().unwrap());
    registry.mark_registered("batt_level").unwrap();
    let (engine, tracker) = engine(&server.url(), registry.clone());

    assert_eq!(engine.process(battery(45)).await, SyncOutcome::Disabled);
    assert_eq!(engine.process(battery(44)).await, SyncOutcome::Disabled);

    update.assert_async().await;
    assert!(registry.is_disabled("batt_level"));
    assert!(tracker.get("batt_level").is_none());
}

/// The update response itself can report the entity as disabled.
#[tokio::test]
async fn test_update_response_disable_flag() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "get_config"})))
        .with_body(r#"{"entities": {}}"#)
        .create_async()
        .await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "update_sensor_states"})))
        .with_body(r#"{"batt_level": {"success": true, "is_disabled": true}}"#)
        .create_async()
        .await;

    let registry = Arc::new(Registry::in_memory().unwrap());
    registry.mark_registered("batt_level").unwrap();
    let (engine, _) = engine(&server.url(), registry.clone());

    assert_eq!(engine.process(battery(45)).await, SyncOutcome::Disabled);
    assert!(registry.is_disabled("batt_level"));
}

/// A rejected registration leaves the entity unregistered so it is retried.
#[tokio::test]
async fn test_rejected_registration() {
    let mut server = mockito::Server::new_async().await;
    let register = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "register_sensor"})))
        .with_body(r#"{"success": false}"#)
        .expect(2)
        .create_async()
        .await;

    let registry = Arc::new(Registry::in_memory().unwrap());
    let (engine, tracker) = engine(&server.url(), registry.clone());

    assert_eq!(engine.process(battery(50)).await, SyncOutcome::Failed);
    assert!(!registry.is_registered("batt_level"));
    assert_eq!(engine.process(battery(49)).await, SyncOutcome::Failed);

    register.assert_async().await;
    assert!(tracker.is_empty());
}

/// Events are fired and never touch the registry.
#[tokio::test]
async fn test_event_fired() {
    let mut server = mockito::Server::new_async().await;
    let fire = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({
            "type": "fire_event",
            "data": {"event_type": "hubsync_command", "event_data": {"command": "lock"}}
        })))
        .with_status(201)
        .create_async()
        .await;

    let registry = Arc::new(Registry::in_memory().unwrap());
    let (engine, _) = engine(&server.url(), registry.clone());

    let mut data = Map::new();
    data.insert("command".to_string(), json!("lock"));
    let outcome = engine.process(Entity::event("hubsync_command", data)).await;

    assert_eq!(outcome, SyncOutcome::Fired);
    assert!(registry.is_empty());
    fire.assert_async().await;
}

/// Server errors on non-retryable entities fail without retrying.
#[tokio::test]
async fn test_server_error_fails_update() {
    let mut server = mockito::Server::new_async().await;
    server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "get_config"})))
        .with_status(500)
        .create_async()
        .await;
    let update = server
        .mock("POST", "/")
        .match_body(Matcher::PartialJson(json!({"type": "update_sensor_states"})))
        .with_status(503)
        .expect(1)
        .create_async()
        .await;

    let registry = Arc::new(Registry::in_memory().unwrap());
    registry.mark_registered("batt_level").unwrap();
    let (engine, _) = engine(&server.url(), registry.clone());

    // Unknown remote state falls back to the local flag: send.
    assert_eq!(engine.process(battery(45)).await, SyncOutcome::Failed);
    update.assert_async().await;
    assert!(registry.is_registered("batt_level"));
}
