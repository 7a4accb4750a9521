//! Hub transport.
//!
//! ```text
//!   SyncEngine
//!       ↓ HubApi
//! ┌──────────────────────────────┐
//! │ HttpHub                       │  POST {"type", "data"} to webhook
//! │  - per-call timeout           │
//! │  - RetryPolicy (429, retryable)│
//! └──────────────────────────────┘
//!       ↑ fetch_config (TTL, single-flight)
//!   RemoteConfigCache
//! ```

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::entity::Entity;

mod client;
mod remote_config;
mod request;
mod retry;

pub use client::HttpHub;
pub use remote_config::RemoteConfigCache;
pub use retry::RetryPolicy;

/// Error object returned by the hub for a rejected entity.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ApiError {
    #[serde(default)]
    pub code: Value,
    #[serde(default)]
    pub message: String,
}

impl ApiError {
    pub fn code_str(&self) -> String {
        match &self.code {
            Value::String(s) => s.clone(),
            Value::Null => "unknown".to_string(),
            other => other.to_string(),
        }
    }
}

/// Per-entity result of a bulk update.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct EntityStatus {
    #[serde(default)]
    pub success: bool,
    /// Hub reports the entity as disabled
    #[serde(default, rename = "is_disabled")]
    pub disabled: bool,
    #[serde(default)]
    pub error: Option<ApiError>,
}

/// Hub-side flags for one entity.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RemoteEntity {
    #[serde(default)]
    pub disabled: bool,
}

/// Snapshot of the hub's configuration as returned by `get_config`.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub entities: HashMap<String, RemoteEntity>,
    #[serde(default)]
    pub version: Option<String>,
}

impl RemoteConfig {
    /// Hub-side disabled flag, `None` if the hub does not know the entity.
    pub fn is_entity_disabled(&self, entity_id: &str) -> Option<bool> {
        self.entities.get(entity_id).map(|e| e.disabled)
    }
}

#[derive(Debug, Error)]
pub enum HubError {
    #[error("hub request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("hub returned status {code}")]
    Status { code: StatusCode },

    #[error("hub rate limited the request")]
    RateLimited,

    #[error("invalid hub response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("hub rejected request: {code}: {message}")]
    Api { code: String, message: String },

    #[error("hub status missing for {0}")]
    MissingStatus(String),
}

impl HubError {
    /// Failures that may succeed when the same request is sent again.
    pub fn is_transient(&self) -> bool {
        match self {
            HubError::Transport(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            HubError::Status { code } => code.is_server_error(),
            HubError::RateLimited => true,
            _ => false,
        }
    }
}

impl From<ApiError> for HubError {
    fn from(e: ApiError) -> Self {
        HubError::Api {
            code: e.code_str(),
            message: e.message,
        }
    }
}

/// Operations the synchronization engine needs from the hub.
#[async_trait]
pub trait HubApi: Send + Sync {
    /// Registers a sensor, including its display metadata.
    async fn register(&self, entity: &Entity) -> Result<(), HubError>;

    /// Sends state updates for already-registered sensors in one request.
    ///
    /// The returned map is keyed by entity id. Entities missing from the map
    /// were not acknowledged.
    async fn update(&self, entities: &[Entity]) -> Result<HashMap<String, EntityStatus>, HubError>;

    async fn fire_event(&self, event: &Entity) -> Result<(), HubError>;

    async fn fetch_config(&self) -> Result<RemoteConfig, HubError>;
}
