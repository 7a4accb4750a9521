//! Memory and load sensors read from procfs.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use hubsync::Entity;

use crate::runners::Poller;

pub const MEMORY_WORKER_ID: &str = "memory_usage";
pub const LOAD_WORKER_ID: &str = "load_average";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);

/// Values from /proc/meminfo, in KiB.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemInfo {
    pub total_kib: u64,
    pub available_kib: u64,
}

impl MemInfo {
    pub fn used_percent(&self) -> f64 {
        if self.total_kib == 0 {
            return 0.0;
        }
        let used = self.total_kib.saturating_sub(self.available_kib) as f64;
        (used / self.total_kib as f64 * 1000.0).round() / 10.0
    }
}

pub fn parse_meminfo(text: &str) -> Result<MemInfo> {
    let mut total = None;
    let mut available = None;

    for line in text.lines() {
        let mut parts = line.split_whitespace();
        let (Some(key), Some(value)) = (parts.next(), parts.next()) else {
            continue;
        };
        let slot = match key {
            "MemTotal:" => &mut total,
            "MemAvailable:" => &mut available,
            _ => continue,
        };
        *slot = Some(
            value
                .parse::<u64>()
                .with_context(|| format!("bad meminfo value for {}", key))?,
        );
    }

    Ok(MemInfo {
        total_kib: total.ok_or_else(|| anyhow!("MemTotal missing"))?,
        available_kib: available.ok_or_else(|| anyhow!("MemAvailable missing"))?,
    })
}

/// 1, 5 and 15 minute load averages.
pub fn parse_loadavg(text: &str) -> Result<[f64; 3]> {
    let mut fields = text.split_whitespace();
    let mut out = [0.0; 3];
    for slot in out.iter_mut() {
        let field = fields.next().ok_or_else(|| anyhow!("truncated loadavg"))?;
        *slot = field
            .parse()
            .with_context(|| format!("bad loadavg field: {}", field))?;
    }
    Ok(out)
}

fn mib(kib: u64) -> u64 {
    kib / 1024
}

pub struct MemoryPoller {
    path: PathBuf,
}

impl MemoryPoller {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for MemoryPoller {
    fn default() -> Self {
        Self::new("/proc/meminfo")
    }
}

#[async_trait]
impl Poller for MemoryPoller {
    fn id(&self) -> &str {
        MEMORY_WORKER_ID
    }

    fn description(&self) -> &str {
        "Memory usage"
    }

    fn default_interval(&self) -> Duration {
        DEFAULT_INTERVAL
    }

    async fn poll(&self) -> Result<Vec<Entity>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let info = parse_meminfo(&text)?;

        Ok(vec![
            Entity::sensor("memory_total", "Memory Total", mib(info.total_kib))
                .with_icon("mdi:memory")
                .with_unit("MiB")
                .with_device_class("data_size"),
            Entity::sensor("memory_available", "Memory Available", mib(info.available_kib))
                .with_icon("mdi:memory")
                .with_unit("MiB")
                .with_device_class("data_size")
                .with_state_class("measurement"),
            Entity::sensor("memory_used_percent", "Memory Usage", info.used_percent())
                .with_icon("mdi:memory")
                .with_unit("%")
                .with_state_class("measurement"),
        ])
    }
}

pub struct LoadPoller {
    path: PathBuf,
}

impl LoadPoller {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for LoadPoller {
    fn default() -> Self {
        Self::new("/proc/loadavg")
    }
}

#[async_trait]
impl Poller for LoadPoller {
    fn id(&self) -> &str {
        LOAD_WORKER_ID
    }

    fn description(&self) -> &str {
        "Load averages"
    }

    fn default_interval(&self) -> Duration {
        DEFAULT_INTERVAL
    }

    async fn poll(&self) -> Result<Vec<Entity>> {
        let text = tokio::fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("failed to read {}", self.path.display()))?;
        let loads = parse_loadavg(&text)?;

        Ok([("load_1", "Load Average (1m)"), ("load_5", "Load Average (5m)"), ("load_15", "Load Average (15m)")]
            .into_iter()
            .zip(loads)
            .map(|((id, name), load)| {
                Entity::sensor(id, name, load)
                    .with_icon("mdi:chip")
                    .with_state_class("measurement")
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const MEMINFO: &str = "\
MemTotal:       16384000 kB
MemFree:         1024000 kB
MemAvailable:    4096000 kB
Buffers:          512000 kB
";

    #[test]
    fn test_parse_meminfo() {
        let info = parse_meminfo(MEMINFO).unwrap();
        assert_eq!(info.total_kib, 16_384_000);
        assert_eq!(info.available_kib, 4_096_000);
        assert_eq!(info.used_percent(), 75.0);
    }

    #[test]
    fn test_parse_meminfo_missing_field() {
        assert!(parse_meminfo("MemTotal: 100 kB\n").is_err());
        assert!(parse_meminfo("MemTotal: abc kB\nMemAvailable: 1 kB\n").is_err());
    }

    #[test]
    fn test_parse_loadavg() {
        let loads = parse_loadavg("0.52 0.58 0.59 1/467 12345\n").unwrap();
        assert_eq!(loads, [0.52, 0.58, 0.59]);
        assert!(parse_loadavg("0.52 0.58").is_err());
    }

    #[tokio::test]
    async fn test_memory_poller_reads_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("meminfo");
        std::fs::write(&path, MEMINFO).unwrap();

        let entities = MemoryPoller::new(&path).poll().await.unwrap();
        let ids: Vec<_> = entities.iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["memory_total", "memory_available", "memory_used_percent"]);
        assert_eq!(entities[0].value, 16_000);
    }

    #[tokio::test]
    async fn test_load_poller_missing_file() {
        let dir = TempDir::new().unwrap();
        let poller = LoadPoller::new(dir.path().join("absent"));
        assert!(poller.poll().await.is_err());
    }
}
