use anyhow::Result;
use async_trait::async_trait;
use hubsync::{Entity, EntityCategory};

use crate::runners::Collector;

pub const WORKER_ID: &str = "agent_version";

/// Reports the running agent version once per activation.
pub struct VersionCollector {
    version: String,
}

impl VersionCollector {
    pub fn new() -> Self {
        Self::with_version(env!("CARGO_PKG_VERSION"))
    }

    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl Default for VersionCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Collector for VersionCollector {
    fn id(&self) -> &str {
        WORKER_ID
    }

    fn description(&self) -> &str {
        "Agent version"
    }

    async fn collect(&self) -> Result<Vec<Entity>> {
        Ok(vec![Entity::sensor("agent_version", "Agent Version", self.version.as_str())
            .with_icon("mdi:face-agent")
            .with_category(EntityCategory::Diagnostic)])
    }
}
