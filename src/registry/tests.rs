use super::*;
use tempfile::TempDir;

#[test]
fn test_unknown_entity_has_no_record() {
    let registry = Registry::in_memory().unwrap();
    assert!(registry.get("batt_level").is_none());
    assert!(!registry.is_registered("batt_level"));
    assert!(registry.is_empty());
}

#[test]
fn test_registered_is_monotonic() {
    let registry = Registry::in_memory().unwrap();

    registry.mark_registered("batt_level").unwrap();
    registry
        .set(
            "batt_level",
            RegistryRecord {
                entity_id: "batt_level".to_string(),
                registered: false,
                disabled: true,
            },
        )
        .unwrap();

    let record = registry.get("batt_level").unwrap();
    assert!(record.registered);
    assert!(record.disabled);
}

#[test]
fn test_update_cannot_unregister() {
    let registry = Registry::in_memory().unwrap();
    registry.mark_registered("load_1").unwrap();

    let record = registry.update("load_1", |r| r.registered = false).unwrap();
    assert!(record.registered);
}

#[test]
fn test_disabled_is_bidirectional() {
    let registry = Registry::in_memory().unwrap();

    registry.set_disabled("mem_used", true).unwrap();
    assert!(registry.is_disabled("mem_used"));

    registry.set_disabled("mem_used", false).unwrap();
    assert!(!registry.is_disabled("mem_used"));
    assert!(!registry.is_registered("mem_used"));
}

#[test]
fn test_records_survive_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("registry.db");

    {
        let registry = Registry::open(&path).unwrap();
        registry.mark_registered("external_ipv4_address").unwrap();
        registry.set_disabled("external_ipv6_address", true).unwrap();
    }

    let registry = Registry::open(&path).unwrap();
    assert_eq!(registry.len(), 2);
    assert!(registry.is_registered("external_ipv4_address"));
    assert!(registry.is_disabled("external_ipv6_address"));
    assert!(!registry.is_registered("external_ipv6_address"));
}

#[test]
fn test_reset_clears_memory_and_disk() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("registry.db");

    {
        let registry = Registry::open(&path).unwrap();
        registry.mark_registered("batt_level").unwrap();
        registry.reset().unwrap();
        assert!(registry.is_empty());
    }

    let registry = Registry::open(&path).unwrap();
    assert!(registry.is_empty());
}

#[test]
fn test_concurrent_updates_are_serialized() {
    use std::sync::Arc;

    let registry = Arc::new(Registry::in_memory().unwrap());
    let handles: Vec<_> = (0..8)
        .map(|i| {
            let registry = Arc::clone(&registry);
            std::thread::spawn(move || {
                registry.mark_registered("shared").unwrap();
                registry.set_disabled("shared", i % 2 == 0).unwrap();
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(registry.len(), 1);
    assert!(registry.is_registered("shared"));
}
