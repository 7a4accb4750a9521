pub mod env;
pub use env::{config_path, reset_requested};

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

// Re-export existing config types
pub use crate::bus::BusConfig;
use crate::hub::RetryPolicy;

/// Complete agent configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgentConfig {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub remote_config: RemoteConfigSettings,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub bus: BusConfig,
    #[serde(default)]
    pub push: PushConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub device: DeviceConfig,
    /// Per-worker preference blocks, keyed by worker id
    #[serde(default)]
    pub workers: HashMap<String, WorkerPreferences>,
    /// Commands the bus may trigger remotely
    #[serde(default)]
    pub commands: Vec<CommandConfig>,
}

impl AgentConfig {
    /// Preference block for `worker_id`; defaults (enabled, no options) if absent.
    pub fn worker_prefs(&self, worker_id: &str) -> WorkerPreferences {
        self.workers.get(worker_id).cloned().unwrap_or_default()
    }

    /// Webhook id used by the push channel.
    ///
    /// Falls back to the last path segment of the webhook URL.
    pub fn webhook_id(&self) -> String {
        if !self.push.webhook_id.is_empty() {
            return self.push.webhook_id.clone();
        }
        self.hub
            .webhook_url
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .to_string()
    }
}

/// Hub webhook transport configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HubConfig {
    #[serde(default = "default_webhook_url")]
    pub webhook_url: String,
    /// Long-lived access token, sent as Bearer token
    #[serde(default)]
    pub token: Option<String>,
    /// Per-call timeout
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_webhook_url() -> String {
    "http://localhost:8123/api/webhook/hubsync".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            webhook_url: default_webhook_url(),
            token: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Local registry storage
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_registry_path")]
    pub path: String,
}

fn default_registry_path() -> String {
    "hubsync-registry.db".to_string()
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            path: default_registry_path(),
        }
    }
}

/// Hub request retry policy
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_wait_secs")]
    pub initial_wait_secs: u64,
    #[serde(default = "default_max_wait_secs")]
    pub max_wait_secs: u64,
}

fn default_max_attempts() -> u32 {
    5
}

fn default_initial_wait_secs() -> u64 {
    5
}

fn default_max_wait_secs() -> u64 {
    20
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_wait_secs: default_initial_wait_secs(),
            max_wait_secs: default_max_wait_secs(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_wait: Duration::from_secs(self.initial_wait_secs),
            max_wait: Duration::from_secs(self.max_wait_secs),
        }
    }
}

/// Hub config snapshot caching
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteConfigSettings {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
}

fn default_ttl_secs() -> u64 {
    30
}

impl Default for RemoteConfigSettings {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
        }
    }
}

/// Synchronization engine tuning
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Maximum entities processed per batch
    #[serde(default = "default_max_batch")]
    pub max_batch: usize,
}

fn default_max_batch() -> usize {
    64
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_batch: default_max_batch(),
        }
    }
}

/// Push notification channel
#[derive(Debug, Clone, Deserialize)]
pub struct PushConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_push_url")]
    pub url: String,
    /// Empty means derive from the webhook URL
    #[serde(default)]
    pub webhook_id: String,
}

fn default_push_url() -> String {
    "ws://localhost:8123/api/websocket".to_string()
}

impl Default for PushConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_push_url(),
            webhook_id: String::new(),
        }
    }
}

/// Local status API
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

fn default_true() -> bool {
    true
}

fn default_bind() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3030
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_bind(),
            port: default_port(),
        }
    }
}

/// Identity of this machine on the bus
#[derive(Debug, Clone, Deserialize)]
pub struct DeviceConfig {
    #[serde(default = "default_device_id")]
    pub id: String,
}

fn default_device_id() -> String {
    std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "hubsync".to_string())
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            id: default_device_id(),
        }
    }
}

/// Namespaced preference block of one worker.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerPreferences {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Worker-specific options
    #[serde(flatten)]
    pub options: toml::Table,
}

impl Default for WorkerPreferences {
    fn default() -> Self {
        Self {
            enabled: true,
            options: toml::Table::new(),
        }
    }
}

impl WorkerPreferences {
    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.options
            .get(key)
            .and_then(|v| v.as_integer())
            .and_then(|i| u64::try_from(i).ok())
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.options.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.options.get(key).and_then(|v| v.as_bool())
    }
}

/// Shell command runnable through the bus
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CommandConfig {
    pub name: String,
    pub exec: String,
}

/// Load configuration from TOML file
pub fn load_config(path: &Path) -> Result<AgentConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: AgentConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}

/// Like `load_config`, but a missing file yields the defaults.
pub fn load_or_default(path: &Path) -> Result<AgentConfig> {
    if !path.exists() {
        return Ok(AgentConfig::default());
    }
    load_config(path)
}
