//! Hub push notification channel.
//!
//! Keeps a websocket open to the hub and subscribes to the push
//! notification channel of this device's webhook:
//!
//! ```text
//!   hub → {"type":"auth_required"}
//!   us  → {"type":"auth","access_token":...}
//!   hub → {"type":"auth_ok"}
//!   us  → {"id":1,"type":"mobile_app/push_notification_channel","webhook_id":...}
//!   hub → {"type":"result","success":true}
//!   hub → {"type":"event","event":{"message":...,"title":...,"data":{...}}}  (repeated)
//! ```
//!
//! Disconnects are followed by a reconnect with capped exponential backoff.

use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};


const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const MAX_BACKOFF: Duration = Duration::from_secs(60);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Notification pushed by the hub.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub data: Map<String, Value>,
}

/// Decoded websocket message.
#[derive(Debug, PartialEq)]
pub enum PushMessage {
    AuthRequired,
    AuthOk,
    AuthInvalid(String),
    Result { success: bool },
    Notification(Notification),
    Other(String),
}

#[derive(Deserialize)]
struct RawMessage {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    success: Option<bool>,
    #[serde(default)]
    event: Option<Value>,
}

/// Parses one text frame from the hub.
pub fn parse_message(text: &str) -> Result<PushMessage, serde_json::Error> {
    let raw: RawMessage = serde_json::from_str(text)?;

    Ok(match raw.kind.as_str() {
        "auth_required" => PushMessage::AuthRequired,
        "auth_ok" => PushMessage::AuthOk,
        "auth_invalid" => PushMessage::AuthInvalid(raw.message.unwrap_or_default()),
        "result" => PushMessage::Result {
            success: raw.success.unwrap_or(false),
        },
        "event" => match raw.event {
            Some(event) => PushMessage::Notification(serde_json::from_value(event)?),
            None => PushMessage::Other(raw.kind),
        },
        _ => PushMessage::Other(raw.kind),
    })
}

enum SessionEnd {
    /// Cancelled or the receiver went away
    Stopped,
    Disconnected,
}

/// Persistent websocket subscription to hub push notifications.
pub struct PushChannel {
    url: String,
    access_token: String,
    webhook_id: String,
}

impl PushChannel {
    pub fn new(
        url: impl Into<String>,
        access_token: impl Into<String>,
        webhook_id: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            access_token: access_token.into(),
            webhook_id: webhook_id.into(),
        }
    }

    /// Delivers notifications to `tx` until `cancel` fires or `tx` closes.
    pub async fn run(self, tx: mpsc::Sender<Notification>, cancel: CancellationToken) {
        let mut backoff = INITIAL_BACKOFF;

        loop {
            match self.session(&tx, &cancel).await {
                Ok(SessionEnd::Stopped) => break,
                Ok(SessionEnd::Disconnected) => {
                    info!(url = %self.url, "Push channel disconnected, reconnecting");
                    backoff = INITIAL_BACKOFF;
                }
                Err(e) => {
                    warn!(
                        url = %self.url,
                        error = %e,
                        retry_in_secs = backoff.as_secs(),
                        "Push channel error"
                    );
                }
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(backoff) => {}
            }
            backoff = next_backoff(backoff);
        }

        info!("Push channel stopped");
    }

    async fn session(
        &self,
        tx: &mpsc::Sender<Notification>,
        cancel: &CancellationToken,
    ) -> Result<SessionEnd> {
        let mut ws = tokio::select! {
            _ = cancel.cancelled() => return Ok(SessionEnd::Stopped),
            connected = connect_async(self.url.as_str()) => {
                connected.context("Failed to connect to push channel")?.0
            }
        };

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, self.handshake(&mut ws))
            .await
            .map_err(|_| anyhow!("Push channel handshake timed out"))
        {
            Ok(Ok(())) => {}
            Ok(Err(e)) | Err(e) => {
                let _ = ws.close(None).await;
                return Err(e);
            }
        }

        info!(url = %self.url, "Subscribed to push notifications");

        loop {
            let frame = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    let _ = ws.close(None).await;
                    return Ok(SessionEnd::Stopped);
                }
                frame = ws.next() => frame,
            };

            match frame {
                Some(Ok(Message::Text(text))) => match parse_message(&text) {
                    Ok(PushMessage::Notification(notification)) => {
                        debug!(title = ?notification.title, "Push notification received");
                        if tx.send(notification).await.is_err() {
                            let _ = ws.close(None).await;
                            return Ok(SessionEnd::Stopped);
                        }
                    }
                    Ok(PushMessage::Result { success: false }) => {
                        bail!("Hub rejected push notification subscription");
                    }
                    Ok(_) => {}
                    Err(e) => debug!(error = %e, "Ignoring unparseable push message"),
                },
                Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Disconnected),
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e).context("Push channel read failed"),
            }
        }
    }

    async fn handshake(&self, ws: &mut Socket) -> Result<()> {
        match next_message(ws).await? {
            PushMessage::AuthRequired => {}
            other => bail!("Expected auth_required, got {:?}", other),
        }

        let auth = json!({"type": "auth", "access_token": self.access_token});
        ws.send(Message::Text(auth.to_string()))
            .await
            .context("Failed to send auth")?;

        match next_message(ws).await? {
            PushMessage::AuthOk => {}
            PushMessage::AuthInvalid(reason) => bail!("Push channel authentication failed: {}", reason),
            other => bail!("Expected auth_ok, got {:?}", other),
        }

        let subscribe = json!({
            "id": 1,
            "type": "mobile_app/push_notification_channel",
            "webhook_id": self.webhook_id,
        });
        ws.send(Message::Text(subscribe.to_string()))
            .await
            .context("Failed to send subscription")?;

        Ok(())
    }
}

/// Reads frames until the next text frame and parses it.
async fn next_message(ws: &mut Socket) -> Result<PushMessage> {
    while let Some(frame) = ws.next().await {
        if let Message::Text(text) = frame.context("Push channel read failed")? {
            return parse_message(&text).context("Invalid push channel message");
        }
    }
    bail!("Push channel closed during handshake")
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}
