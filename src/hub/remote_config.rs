use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, warn};

use super::{HubApi, RemoteConfig};

/// Longest a reader waits on a config fetch.
const DEFAULT_REFRESH_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Default)]
struct Snapshot {
    config: Option<Arc<RemoteConfig>>,
    checked_at: Option<Instant>,
}

/// TTL cache of the hub's configuration.
///
/// Refreshes lazily on read once the TTL has elapsed. Only one refresh runs
/// at a time: while it is in flight, readers get the previous snapshot
/// without waiting. Readers that have no snapshot at all wait for the
/// refresh, bounded by the refresh timeout. A failed or timed out refresh
/// keeps the previous snapshot and waits a full TTL before trying again.
pub struct RemoteConfigCache {
    hub: Arc<dyn HubApi>,
    ttl: Duration,
    refresh_timeout: Duration,
    snapshot: Mutex<Snapshot>,
    refreshing: tokio::sync::Mutex<()>,
}

impl RemoteConfigCache {
    pub fn new(hub: Arc<dyn HubApi>, ttl: Duration) -> Self {
        Self {
            hub,
            ttl,
            refresh_timeout: DEFAULT_REFRESH_TIMEOUT,
            snapshot: Mutex::new(Snapshot::default()),
            refreshing: tokio::sync::Mutex::new(()),
        }
    }

    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    fn snapshot(&self) -> std::sync::MutexGuard<'_, Snapshot> {
        self.snapshot.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Cached config if it is still within the TTL, otherwise `Err` with the
    /// stale one.
    fn cached(&self) -> Result<Option<Arc<RemoteConfig>>, Option<Arc<RemoteConfig>>> {
        let snapshot = self.snapshot();
        let fresh = snapshot
            .checked_at
            .is_some_and(|at| at.elapsed() < self.ttl);
        if fresh {
            Ok(snapshot.config.clone())
        } else {
            Err(snapshot.config.clone())
        }
    }

    /// Current snapshot, refreshing it first if stale. `None` if the hub
    /// config has never been fetched successfully.
    pub async fn current(&self) -> Option<Arc<RemoteConfig>> {
        let stale = match self.cached() {
            Ok(config) => return config,
            Err(stale) => stale,
        };

        let _guard = match stale {
            Some(config) => match self.refreshing.try_lock() {
                Ok(guard) => guard,
                Err(_) => return Some(config),
            },
            None => self.refreshing.lock().await,
        };

        // Another reader may have refreshed while this one waited.
        if let Ok(config) = self.cached() {
            return config;
        }

        let fetched = tokio::time::timeout(self.refresh_timeout, self.hub.fetch_config()).await;
        let mut snapshot = self.snapshot();
        match fetched {
            Ok(Ok(config)) => {
                debug!(entities = config.entities.len(), "Refreshed hub config");
                snapshot.config = Some(Arc::new(config));
            }
            Ok(Err(e)) => {
                warn!(error = %e, "Failed to refresh hub config, keeping previous snapshot");
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.refresh_timeout.as_millis() as u64,
                    "Hub config refresh timed out, keeping previous snapshot"
                );
            }
        }
        snapshot.checked_at = Some(Instant::now());
        snapshot.config.clone()
    }

    /// Hub-side disabled flag for `entity_id`, `None` when unknown.
    pub async fn is_disabled(&self, entity_id: &str) -> Option<bool> {
        self.current()
            .await
            .and_then(|config| config.is_entity_disabled(entity_id))
    }

    /// Forces a refresh on the next read.
    pub async fn invalidate(&self) {
        self.snapshot().checked_at = None;
    }
}
