use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use super::request::{self, Event, Registration, Request, StateUpdate};
use super::{EntityStatus, HubApi, HubError, RemoteConfig, RetryPolicy};
use crate::config::HubConfig;
use crate::entity::Entity;

#[derive(Debug, Deserialize)]
struct RegistrationResponse {
    #[serde(default)]
    success: bool,
}

/// HTTP client for the hub's mobile-app webhook.
///
/// Every request is a JSON POST to a single webhook URL; the request type
/// travels in the body. Authenticates with an optional Bearer token.
pub struct HttpHub {
    http_client: Client,
    webhook_url: String,
    token: Option<String>,
    retry: RetryPolicy,
}

impl HttpHub {
    /// Creates a client for `webhook_url` with the given per-call timeout.
    pub fn new(
        webhook_url: impl Into<String>,
        token: Option<String>,
        timeout: Duration,
        retry: RetryPolicy,
    ) -> Result<Self, HubError> {
        let http_client = Client::builder()
            .user_agent(concat!("hubsync/", env!("CARGO_PKG_VERSION")))
            .timeout(timeout)
            .build()?;

        Ok(Self {
            http_client,
            webhook_url: webhook_url.into(),
            token,
            retry,
        })
    }

    pub fn from_config(config: &HubConfig, retry: RetryPolicy) -> Result<Self, HubError> {
        Self::new(
            config.webhook_url.clone(),
            config.token.clone(),
            Duration::from_secs(config.timeout_secs),
            retry,
        )
    }

    pub fn webhook_url(&self) -> &str {
        &self.webhook_url
    }

    /// Sends `request`, retrying per the retry policy.
    ///
    /// Rate-limited requests are always retried; other transient failures
    /// only when `retryable` is set.
    async fn post<T: Serialize + Sync>(
        &self,
        request: &Request<T>,
        retryable: bool,
    ) -> Result<Vec<u8>, HubError> {
        let mut attempt = 1;
        loop {
            match self.post_once(request).await {
                Ok(body) => return Ok(body),
                Err(e)
                    if attempt < self.retry.max_attempts
                        && self.retry.should_retry(&e, retryable) =>
                {
                    let delay = self.retry.delay_for(attempt);
                    warn!(
                        request = request.kind,
                        attempt = attempt,
                        max_attempts = self.retry.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Hub request failed, will retry"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn post_once<T: Serialize + Sync>(&self, request: &Request<T>) -> Result<Vec<u8>, HubError> {
        let mut builder = self.http_client.post(&self.webhook_url).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder.send().await?;
        match response.status() {
            StatusCode::TOO_MANY_REQUESTS => Err(HubError::RateLimited),
            code if !code.is_success() => Err(HubError::Status { code }),
            _ => Ok(response.bytes().await?.to_vec()),
        }
    }

    async fn post_json<T, R>(&self, request: &Request<T>, retryable: bool) -> Result<R, HubError>
    where
        T: Serialize + Sync,
        R: DeserializeOwned,
    {
        let body = self.post(request, retryable).await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl HubApi for HttpHub {
    async fn register(&self, entity: &Entity) -> Result<(), HubError> {
        let Some(registration) = Registration::from_entity(entity) else {
            return Err(HubError::Api {
                code: "invalid_format".to_string(),
                message: format!("{} is an event and cannot be registered", entity.id),
            });
        };

        let request = Request::new(request::REGISTER_SENSOR, registration);
        let response: RegistrationResponse = self.post_json(&request, entity.retryable).await?;

        if !response.success {
            return Err(HubError::Api {
                code: "registration_failed".to_string(),
                message: format!("hub did not accept registration of {}", entity.id),
            });
        }

        debug!(entity_id = %entity.id, "Sensor registered");
        Ok(())
    }

    async fn update(&self, entities: &[Entity]) -> Result<HashMap<String, EntityStatus>, HubError> {
        let updates: Vec<StateUpdate<'_>> =
            entities.iter().filter_map(StateUpdate::from_entity).collect();
        if updates.is_empty() {
            return Ok(HashMap::new());
        }

        let retryable = entities.iter().all(|e| e.retryable);
        let request = Request::new(request::UPDATE_SENSOR_STATES, updates);
        self.post_json(&request, retryable).await
    }

    async fn fire_event(&self, event: &Entity) -> Result<(), HubError> {
        let request = Request::new(request::FIRE_EVENT, Event::from_entity(event));
        // Any 2xx counts as delivered; the body is not inspected.
        self.post(&request, event.retryable).await?;
        Ok(())
    }

    async fn fetch_config(&self) -> Result<RemoteConfig, HubError> {
        // Single attempt; the cache keeps serving its last snapshot and asks
        // again after the TTL.
        self.post_json(&Request::get_config(), false).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::{Matcher, Server};
    use serde_json::json;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            initial_wait: Duration::from_millis(10),
            max_wait: Duration::from_millis(20),
        }
    }

    fn hub_for(server: &Server, retry: RetryPolicy) -> HttpHub {
        HttpHub::new(
            format!("{}/api/webhook/abc", server.url()),
            Some("secret".to_string()),
            Duration::from_secs(5),
            retry,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_register_sends_metadata() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("POST", "/api/webhook/abc")
            .match_header("authorization", "Bearer secret")
            .match_body(Matcher::PartialJson(json!({
                "type": "register_sensor",
                "data": {"unique_id": "batt_level", "name": "Battery Level", "state": 80}
            })))
            .with_status(200)
            .with_body(r#"{"success": true}"#)
            .create_async()
            .await;

        let hub = hub_for(&server, RetryPolicy::none());
        hub.register(&Entity::sensor("batt_level", "Battery Level", 80))
            .await
            .unwrap();

        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_register_unsuccessful_is_error() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/webhook/abc")
            .with_status(200)
            .with_body(r#"{"success": false}"#)
            .create_async()
            .await;

        let hub = hub_for(&server, RetryPolicy::none());
        let result = hub.register(&Entity::sensor("batt_level", "Battery Level", 80)).await;

        assert!(matches!(result, Err(HubError::Api { .. })));
    }

    #[tokio::test]
    async fn test_update_parses_per_entity_status() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/webhook/abc")
            .match_body(Matcher::PartialJson(json!({"type": "update_sensor_states"})))
            .with_status(200)
            .with_body(
                r#"{
                    "load_1": {"success": true},
                    "load_5": {"success": true, "is_disabled": true},
                    "load_15": {"success": false, "error": {"code": "not_registered", "message": "Entity is not registered"}}
                }"#,
            )
            .create_async()
            .await;

        let hub = hub_for(&server, RetryPolicy::none());
        let entities = vec![
            Entity::sensor("load_1", "Load (1m)", 0.1),
            Entity::sensor("load_5", "Load (5m)", 0.2),
            Entity::sensor("load_15", "Load (15m)", 0.3),
        ];
        let statuses = hub.update(&entities).await.unwrap();

        assert!(statuses["load_1"].success);
        assert!(statuses["load_5"].disabled);
        let error = statuses["load_15"].error.as_ref().unwrap();
        assert_eq!(error.code_str(), "not_registered");
    }

    #[tokio::test]
    async fn test_rate_limited_request_is_retried() {
        let mut server = Server::new_async().await;
        let limited = server
            .mock("POST", "/api/webhook/abc")
            .with_status(429)
            .expect(3)
            .create_async()
            .await;

        let hub = hub_for(&server, fast_retry());
        let result = hub.fire_event(&Entity::event("test_event", Default::default())).await;

        assert!(matches!(result, Err(HubError::RateLimited)));
        limited.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_retryable_server_error_is_not_retried() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("POST", "/api/webhook/abc")
            .with_status(500)
            .expect(1)
            .create_async()
            .await;

        let hub = hub_for(&server, fast_retry());
        let result = hub.register(&Entity::sensor("mem_used", "Memory Used", 10)).await;

        assert!(matches!(result, Err(HubError::Status { .. })));
        failing.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_config() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("POST", "/api/webhook/abc")
            .match_body(Matcher::Json(json!({"type": "get_config"})))
            .with_status(200)
            .with_body(
                r#"{"entities": {"load_1": {"disabled": true}}, "version": "2026.10.0", "unit_system": {}}"#,
            )
            .create_async()
            .await;

        let hub = hub_for(&server, RetryPolicy::none());
        let config = hub.fetch_config().await.unwrap();

        assert_eq!(config.is_entity_disabled("load_1"), Some(true));
        assert_eq!(config.is_entity_disabled("load_5"), None);
        assert_eq!(config.version.as_deref(), Some("2026.10.0"));
    }

    #[tokio::test]
    async fn test_fetch_config_is_not_retried() {
        let mut server = Server::new_async().await;
        let failing = server
            .mock("POST", "/api/webhook/abc")
            .match_body(Matcher::Json(json!({"type": "get_config"})))
            .with_status(503)
            .expect(1)
            .create_async()
            .await;

        let hub = hub_for(&server, fast_retry());
        let result = hub.fetch_config().await;

        assert!(matches!(result, Err(HubError::Status { .. })));
        failing.assert_async().await;
    }
}
