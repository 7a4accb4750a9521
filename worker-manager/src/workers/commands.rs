//! Remote commands delivered over the bus.
//!
//! A message on `<prefix>.<device>.command.<name>` runs the configured
//! shell command `<name>` and reports the result as a `hubsync_command`
//! event. Requests with a reply subject also get the result as JSON.

use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::StreamExt;
use hubsync::bus::BusClient;
use hubsync::config::CommandConfig;
use hubsync::Entity;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::runners::EventSource;
use crate::worker::send_entity;

pub const WORKER_ID: &str = "commands";
pub const EVENT_TYPE: &str = "hubsync_command";

const COMMAND_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CommandResult {
    pub command: String,
    /// `None` if the process was killed by a signal or never ran
    pub exit_code: Option<i32>,
    pub stdout: String,
}

impl CommandResult {
    pub fn to_entity(&self) -> Entity {
        let mut data = Map::new();
        data.insert("command".to_string(), Value::from(self.command.clone()));
        data.insert("exit_code".to_string(), Value::from(self.exit_code));
        data.insert("stdout".to_string(), Value::from(self.stdout.clone()));
        Entity::event(EVENT_TYPE, data)
    }
}

/// Runs `config.exec` through `sh -c`.
pub async fn run_command(config: &CommandConfig) -> CommandResult {
    let output = tokio::time::timeout(
        COMMAND_TIMEOUT,
        tokio::process::Command::new("sh")
            .arg("-c")
            .arg(&config.exec)
            .kill_on_drop(true)
            .output(),
    )
    .await;

    match output {
        Ok(Ok(output)) => CommandResult {
            command: config.name.clone(),
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
        },
        Ok(Err(e)) => {
            warn!(command = %config.name, error = %e, "Failed to spawn command");
            CommandResult {
                command: config.name.clone(),
                exit_code: None,
                stdout: String::new(),
            }
        }
        Err(_) => {
            warn!(command = %config.name, "Command timed out");
            CommandResult {
                command: config.name.clone(),
                exit_code: None,
                stdout: String::new(),
            }
        }
    }
}

pub struct CommandSource {
    bus: Option<BusClient>,
    commands: Vec<CommandConfig>,
}

impl CommandSource {
    pub fn new(bus: Option<BusClient>, commands: Vec<CommandConfig>) -> Self {
        Self { bus, commands }
    }

    pub fn lookup(&self, name: &str) -> Option<&CommandConfig> {
        self.commands.iter().find(|c| c.name == name)
    }
}

#[async_trait]
impl EventSource for CommandSource {
    type Feed = async_nats::Subscriber;

    fn id(&self) -> &str {
        WORKER_ID
    }

    fn description(&self) -> &str {
        "Remote commands from the bus"
    }

    fn available(&self) -> bool {
        self.bus.is_some() && !self.commands.is_empty()
    }

    async fn subscribe(&self) -> Result<Self::Feed> {
        let bus = self
            .bus
            .as_ref()
            .ok_or_else(|| anyhow!("bus is not connected"))?;
        bus.subscribe_commands().await
    }

    async fn forward(
        &self,
        mut feed: Self::Feed,
        tx: mpsc::Sender<Entity>,
        cancel: CancellationToken,
    ) {
        let Some(bus) = self.bus.as_ref() else {
            return;
        };

        loop {
            let msg = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                msg = feed.next() => match msg {
                    Some(msg) => msg,
                    None => break,
                },
            };

            let Some(name) = bus.command_name(msg.subject.as_str()) else {
                continue;
            };
            let Some(config) = self.lookup(name) else {
                warn!(command = %name, "Unknown remote command");
                continue;
            };

            info!(command = %config.name, "Running remote command");
            let result = run_command(config).await;

            if let Some(reply) = msg.reply {
                match serde_json::to_vec(&result) {
                    Ok(body) => {
                        if let Err(e) = bus.client().publish(reply, body.into()).await {
                            warn!(command = %config.name, error = %e, "Failed to reply");
                        }
                    }
                    Err(e) => warn!(command = %config.name, error = %e, "Failed to encode reply"),
                }
            }

            if !send_entity(&tx, result.to_entity(), &cancel).await {
                break;
            }
        }

        let _ = feed.unsubscribe().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn command(name: &str, exec: &str) -> CommandConfig {
        CommandConfig {
            name: name.to_string(),
            exec: exec.to_string(),
        }
    }

    #[test]
    fn test_unavailable_without_bus() {
        let source = CommandSource::new(None, vec![command("lock", "true")]);
        assert!(!source.available());
        assert_eq!(source.lookup("lock").unwrap().exec, "true");
        assert!(source.lookup("reboot").is_none());
    }

    #[tokio::test]
    async fn test_run_command_captures_output() {
        let result = run_command(&command("greet", "echo hello; exit 3")).await;
        assert_eq!(result.command, "greet");
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.stdout, "hello");
    }

    #[test]
    fn test_result_entity() {
        let result = CommandResult {
            command: "lock".to_string(),
            exit_code: Some(0),
            stdout: String::new(),
        };
        let entity = result.to_entity();
        assert!(entity.is_event());
        assert_eq!(entity.id, EVENT_TYPE);
        assert_eq!(entity.attributes["command"], "lock");
        assert_eq!(entity.attributes["exit_code"], 0);
    }
}
