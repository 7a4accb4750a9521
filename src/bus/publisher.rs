use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use tracing::debug;

use super::BusClient;
use crate::entity::Entity;
use crate::sync::StateSink;

/// Payload published for each accepted state
#[derive(Debug, Serialize)]
pub struct StateMessage<'a> {
    pub entity_id: &'a str,
    pub value: &'a Value,
    pub attributes: &'a Map<String, Value>,
    pub updated_at: DateTime<Utc>,
}

/// Mirrors accepted entity states onto the bus.
#[derive(Clone)]
pub struct StatePublisher {
    bus: BusClient,
}

impl StatePublisher {
    pub fn new(bus: BusClient) -> Self {
        Self { bus }
    }
}

#[async_trait]
impl StateSink for StatePublisher {
    /// Subject format: `<prefix>.<device>.<entity_id>.state`
    async fn publish(&self, entity: &Entity) -> Result<()> {
        let subject = self.bus.state_subject(&entity.id);
        let payload = serde_json::to_vec(&StateMessage {
            entity_id: &entity.id,
            value: &entity.value,
            attributes: &entity.attributes,
            updated_at: Utc::now(),
        })
        .context("Failed to serialize state to JSON")?;

        debug!(entity_id = %entity.id, subject = %subject, "Publishing state to NATS");

        self.bus
            .client()
            .publish(subject.clone(), payload.into())
            .await
            .with_context(|| format!("Failed to publish state to subject '{}'", subject))?;

        Ok(())
    }
}
