use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use hubsync::{Entity, EntityCategory};

use crate::runners::Poller;

pub const WORKER_ID: &str = "connection_latency";

const DEFAULT_INTERVAL: Duration = Duration::from_secs(60);
const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Measures the round-trip time of a GET against the hub's root URL.
pub struct LatencyPoller {
    http_client: reqwest::Client,
    target: reqwest::Url,
}

impl LatencyPoller {
    /// `webhook_url` is reduced to its origin; the webhook itself only
    /// accepts POSTs.
    pub fn new(http_client: reqwest::Client, webhook_url: &str) -> Result<Self> {
        let target = reqwest::Url::parse(webhook_url)
            .and_then(|url| url.join("/"))
            .with_context(|| format!("invalid hub URL: {}", webhook_url))?;

        Ok(Self {
            http_client,
            target,
        })
    }

    pub fn target(&self) -> &str {
        self.target.as_str()
    }
}

#[async_trait]
impl Poller for LatencyPoller {
    fn id(&self) -> &str {
        WORKER_ID
    }

    fn description(&self) -> &str {
        "Hub connection latency"
    }

    fn default_interval(&self) -> Duration {
        DEFAULT_INTERVAL
    }

    async fn poll(&self) -> Result<Vec<Entity>> {
        let started = Instant::now();
        let response = self
            .http_client
            .get(self.target.clone())
            .timeout(PROBE_TIMEOUT)
            .send()
            .await
            .context("hub unreachable")?;
        let elapsed = started.elapsed();

        Ok(vec![Entity::sensor(
            "connection_latency",
            "Connection Latency",
            elapsed.as_millis() as u64,
        )
        .with_icon("mdi:connection")
        .with_unit("ms")
        .with_device_class("duration")
        .with_state_class("measurement")
        .with_category(EntityCategory::Diagnostic)
        .with_attribute("http_status", response.status().as_u16())])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_is_origin() {
        let poller = LatencyPoller::new(
            reqwest::Client::new(),
            "http://hub.local:8123/api/webhook/abc",
        )
        .unwrap();
        assert_eq!(poller.target(), "http://hub.local:8123/");
    }

    #[test]
    fn test_invalid_url_rejected() {
        assert!(LatencyPoller::new(reqwest::Client::new(), "not a url").is_err());
    }

    #[tokio::test]
    async fn test_latency_measured() {
        let mut server = mockito::Server::new_async().await;
        let root = server
            .mock("GET", "/")
            .with_status(200)
            .create_async()
            .await;

        let poller = LatencyPoller::new(
            reqwest::Client::new(),
            &format!("{}/api/webhook/abc", server.url()),
        )
        .unwrap();

        let entities = poller.poll().await.unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].id, "connection_latency");
        assert!(entities[0].value.is_u64());
        assert_eq!(entities[0].attributes["http_status"], 200);
        root.assert_async().await;
    }
}
