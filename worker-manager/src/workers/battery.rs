//! Battery sensors from the power-supply class in sysfs.
//!
//! Batteries come and go (laptops docking, peripherals pairing), so the
//! worker is dynamic: every directory under the power-supply root whose
//! `type` reads `Battery` is tracked with its own producer.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hubsync::config::WorkerPreferences;
use hubsync::entity::sanitize_id;
use hubsync::Entity;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::runners::polling::INTERVAL_KEY;
use crate::runners::{ResourceEvent, ResourceMonitor};
use crate::worker::{send_entity, EntityStream, STREAM_CAPACITY};

pub const WORKER_ID: &str = "battery_sensors";

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";
const RESCAN_KEY: &str = "rescan_interval_secs";
const ROOT_KEY: &str = "sysfs_root";

const DEFAULT_RESCAN: Duration = Duration::from_secs(10);
const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

pub struct BatteryMonitor {
    root: PathBuf,
    rescan: Duration,
    interval: Duration,
}

impl BatteryMonitor {
    pub fn new(root: impl Into<PathBuf>, rescan: Duration, interval: Duration) -> Self {
        Self {
            root: root.into(),
            rescan,
            interval,
        }
    }

    /// Reads `sysfs_root`, `rescan_interval_secs` and `update_interval_secs`.
    pub fn from_prefs(prefs: &WorkerPreferences) -> Self {
        let secs = |key: &str, default: Duration| {
            prefs
                .get_u64(key)
                .map(Duration::from_secs)
                .unwrap_or(default)
                .max(Duration::from_secs(1))
        };

        Self::new(
            prefs.get_str(ROOT_KEY).unwrap_or(POWER_SUPPLY_ROOT),
            secs(RESCAN_KEY, DEFAULT_RESCAN),
            secs(INTERVAL_KEY, DEFAULT_INTERVAL),
        )
    }
}

/// Names of battery devices under `root`.
async fn scan(root: &Path) -> Result<BTreeSet<String>> {
    let mut found = BTreeSet::new();
    let mut dir = tokio::fs::read_dir(root)
        .await
        .with_context(|| format!("failed to list {}", root.display()))?;

    while let Some(entry) = dir.next_entry().await? {
        let kind = tokio::fs::read_to_string(entry.path().join("type"))
            .await
            .unwrap_or_default();
        if kind.trim() == "Battery" {
            found.insert(entry.file_name().to_string_lossy().into_owned());
        }
    }
    Ok(found)
}

/// Added/removed events turning `before` into `after`.
fn diff(before: &BTreeSet<String>, after: &BTreeSet<String>) -> Vec<ResourceEvent> {
    let added = after
        .difference(before)
        .map(|name| ResourceEvent::Added(name.clone()));
    let removed = before
        .difference(after)
        .map(|name| ResourceEvent::Removed(name.clone()));
    removed.chain(added).collect()
}

async fn read_attr(device: &Path, attr: &str) -> Result<String> {
    let raw = tokio::fs::read_to_string(device.join(attr))
        .await
        .with_context(|| format!("failed to read {}", device.join(attr).display()))?;
    Ok(raw.trim().to_string())
}

/// Level and charging-state sensors for one battery.
async fn read_battery(device: &Path, name: &str) -> Result<Vec<Entity>> {
    let prefix = format!("battery_{}", sanitize_id(name));
    let mut entities = Vec::with_capacity(2);

    let capacity: u8 = read_attr(device, "capacity")
        .await?
        .parse()
        .context("bad capacity")?;
    entities.push(
        Entity::sensor(format!("{}_level", prefix), format!("{} Level", name), capacity)
            .with_icon(level_icon(capacity))
            .with_unit("%")
            .with_device_class("battery")
            .with_state_class("measurement"),
    );

    if let Ok(status) = read_attr(device, "status").await {
        entities.push(
            Entity::sensor(format!("{}_state", prefix), format!("{} State", name), status.to_lowercase())
                .with_icon("mdi:battery-charging"),
        );
    }

    Ok(entities)
}

fn level_icon(level: u8) -> String {
    match level {
        0..=4 => "mdi:battery-outline".to_string(),
        95.. => "mdi:battery".to_string(),
        _ => format!("mdi:battery-{}", (level + 5) / 10 * 10),
    }
}

#[async_trait]
impl ResourceMonitor for BatteryMonitor {
    fn id(&self) -> &str {
        WORKER_ID
    }

    fn description(&self) -> &str {
        "Battery level and state"
    }

    async fn enumerate(&self) -> Result<Vec<String>> {
        Ok(scan(&self.root).await?.into_iter().collect())
    }

    async fn watch(&self, cancel: CancellationToken) -> Result<mpsc::Receiver<ResourceEvent>> {
        let mut known = scan(&self.root).await?;
        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let root = self.root.clone();
        let period = self.rescan;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                }

                let current = match scan(&root).await {
                    Ok(current) => current,
                    Err(e) => {
                        warn!(worker = WORKER_ID, error = %e, "Battery rescan failed");
                        continue;
                    }
                };

                for event in diff(&known, &current) {
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
                known = current;
            }
        });

        Ok(rx)
    }

    async fn track(&self, resource: &str, cancel: CancellationToken) -> Result<EntityStream> {
        let device = self.root.join(resource);
        let name = resource.to_string();

        // Fail the add if the device is already unreadable.
        let first = read_battery(&device, &name).await?;

        let (tx, rx) = mpsc::channel(STREAM_CAPACITY);
        let period = self.interval;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            let mut batch = first;
            loop {
                for entity in batch {
                    if !send_entity(&tx, entity, &cancel).await {
                        return;
                    }
                }

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => return,
                    _ = ticker.tick() => {}
                }

                batch = match read_battery(&device, &name).await {
                    Ok(entities) => entities,
                    Err(e) => {
                        debug!(worker = WORKER_ID, battery = %name, error = %e, "Battery read failed");
                        Vec::new()
                    }
                };
            }
        });

        Ok(rx)
    }
}
