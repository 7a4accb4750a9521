use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

/// NATS bus configuration
#[derive(Clone, Debug, Deserialize)]
pub struct BusConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_url")]
    pub url: String,
    #[serde(default = "default_subject_prefix")]
    pub subject_prefix: String,
}

fn default_url() -> String {
    "nats://localhost:4222".to_string()
}

fn default_subject_prefix() -> String {
    "hubsync".to_string()
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            url: default_url(),
            subject_prefix: default_subject_prefix(),
        }
    }
}

/// Connection to the NATS bus, scoped to one device.
#[derive(Clone)]
pub struct BusClient {
    client: async_nats::Client,
    prefix: String,
    device: String,
}

impl BusClient {
    /// Connect to NATS
    pub async fn connect(config: &BusConfig, device_id: &str) -> Result<Self> {
        info!(url = %config.url, device = %device_id, "Connecting to NATS");

        let client = async_nats::connect(&config.url)
            .await
            .context("Failed to connect to NATS")?;

        Ok(Self {
            client,
            prefix: subject_token(&config.subject_prefix),
            device: subject_token(device_id),
        })
    }

    /// Subject carrying the state of `entity_id`: `<prefix>.<device>.<entity>.state`
    pub fn state_subject(&self, entity_id: &str) -> String {
        state_subject(&self.prefix, &self.device, entity_id)
    }

    /// Wildcard subject for remote commands: `<prefix>.<device>.command.*`
    pub fn command_subject(&self) -> String {
        format!("{}.{}.command.*", self.prefix, self.device)
    }

    /// Extracts the command name from a subject matched by `command_subject`.
    pub fn command_name<'a>(&self, subject: &'a str) -> Option<&'a str> {
        command_name(&self.prefix, &self.device, subject)
    }

    pub async fn subscribe_commands(&self) -> Result<async_nats::Subscriber> {
        let subject = self.command_subject();
        let subscriber = self
            .client
            .subscribe(subject.clone())
            .await
            .with_context(|| format!("Failed to subscribe to '{}'", subject))?;

        info!(subject = %subject, "Subscribed to remote commands");
        Ok(subscriber)
    }

    /// Get underlying NATS client
    pub fn client(&self) -> &async_nats::Client {
        &self.client
    }
}

/// Makes `raw` usable as a single subject token.
///
/// Separators, whitespace and wildcards become underscores.
pub fn subject_token(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

pub(crate) fn state_subject(prefix: &str, device: &str, entity_id: &str) -> String {
    format!("{}.{}.{}.state", prefix, device, subject_token(entity_id))
}

pub(crate) fn command_name<'a>(prefix: &str, device: &str, subject: &'a str) -> Option<&'a str> {
    let name = subject
        .strip_prefix(prefix)?
        .strip_prefix('.')?
        .strip_prefix(device)?
        .strip_prefix(".command.")?;

    if name.is_empty() || name.contains('.') {
        None
    } else {
        Some(name)
    }
}
