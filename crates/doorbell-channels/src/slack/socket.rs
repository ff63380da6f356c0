//! Socket Mode event loop and Channel trait implementation.

use super::send::resolve_name;
use super::types::{parse_ts, ConnectionsOpen, Envelope, Mention};
use super::{strip_leading_mention, SlackChannel};
use async_trait::async_trait;
use doorbell_core::{
    error::DoorbellError,
    message::{IncomingMessage, OutgoingMessage},
    traits::Channel,
};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// How a Socket Mode session ended.
enum SessionEnd {
    /// Slack closed or asked us to reconnect. `greeted` is set once the
    /// session saw a `hello`.
    Reconnect { greeted: bool },
    Shutdown,
}

/// Delay between reconnect attempts. Doubles after every session that fails
/// or ends before `hello`, up to a minute.
#[derive(Debug)]
pub(super) struct Backoff {
    secs: u64,
}

impl Backoff {
    const MAX_SECS: u64 = 60;

    pub(super) fn next_delay(&mut self) -> Duration {
        let delay = Duration::from_secs(self.secs);
        self.secs = (self.secs * 2).min(Self::MAX_SECS);
        delay
    }

    pub(super) fn reset(&mut self) {
        self.secs = 1;
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self { secs: 1 }
    }
}

/// State moved into the background socket task.
#[derive(Clone)]
struct Listener {
    client: reqwest::Client,
    api_base: String,
    app_token: String,
    bot_token: String,
    allowed_users: Vec<String>,
    names: Arc<Mutex<HashMap<String, String>>>,
    tx: mpsc::Sender<IncomingMessage>,
}

#[async_trait]
impl Channel for SlackChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn start(&self) -> Result<mpsc::Receiver<IncomingMessage>, DoorbellError> {
        if self.config.app_token.is_empty() || self.config.bot_token.is_empty() {
            return Err(DoorbellError::Config(
                "slack app_token and bot_token are required".into(),
            ));
        }

        let (tx, rx) = mpsc::channel(64);
        let listener = Listener {
            client: self.client.clone(),
            api_base: self.api_base.clone(),
            app_token: self.config.app_token.clone(),
            bot_token: self.config.bot_token.clone(),
            allowed_users: self.config.allowed_users.clone(),
            names: self.names.clone(),
            tx,
        };
        let mut shutdown = self.shutdown.subscribe();

        info!("Slack channel starting Socket Mode...");

        tokio::spawn(async move {
            let mut backoff = Backoff::default();

            loop {
                if *shutdown.borrow() {
                    break;
                }
                let delay = match listener.run_session(&mut shutdown).await {
                    Ok(SessionEnd::Shutdown) => break,
                    Ok(SessionEnd::Reconnect { greeted: true }) => {
                        backoff.reset();
                        info!("slack: reconnecting");
                        continue;
                    }
                    Ok(SessionEnd::Reconnect { greeted: false }) => {
                        let delay = backoff.next_delay();
                        warn!(
                            "slack session ended before hello (retry in {}s)",
                            delay.as_secs()
                        );
                        delay
                    }
                    Err(e) => {
                        let delay = backoff.next_delay();
                        error!("slack socket error (retry in {}s): {e}", delay.as_secs());
                        delay
                    }
                };
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = shutdown.changed() => break,
                }
            }
            info!("Slack socket loop stopped");
        });

        Ok(rx)
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), DoorbellError> {
        let channel = message
            .reply_target
            .as_deref()
            .ok_or_else(|| DoorbellError::Channel("no reply_target on outgoing message".into()))?;
        self.post_message(channel, &message.text).await
    }

    async fn stop(&self) -> Result<(), DoorbellError> {
        self.shutdown.send_replace(true);
        info!("Slack channel stopped");
        Ok(())
    }
}

impl Listener {
    /// Call `apps.connections.open` to get a WebSocket URL.
    async fn open_connection(&self) -> Result<String, DoorbellError> {
        let resp: ConnectionsOpen = self
            .client
            .post(format!("{}/apps.connections.open", self.api_base))
            .bearer_auth(&self.app_token)
            .send()
            .await
            .map_err(|e| DoorbellError::Channel(format!("apps.connections.open failed: {e}")))?
            .json()
            .await
            .map_err(|e| DoorbellError::Channel(format!("apps.connections.open parse failed: {e}")))?;

        if !resp.ok {
            return Err(DoorbellError::Channel(format!(
                "apps.connections.open rejected: {}",
                resp.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        resp.url
            .ok_or_else(|| DoorbellError::Channel("no url in apps.connections.open".into()))
    }

    /// One WebSocket connection, from open to close.
    async fn run_session(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<SessionEnd, DoorbellError> {
        let url = self.open_connection().await?;
        let (ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| DoorbellError::Channel(format!("slack websocket connect failed: {e}")))?;
        info!("Slack WebSocket connected");

        let (mut ws_tx, mut ws_rx) = ws.split();
        let mut greeted = false;

        loop {
            let frame = tokio::select! {
                frame = ws_rx.next() => frame,
                _ = shutdown.changed() => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    return Ok(SessionEnd::Shutdown);
                }
            };

            let msg = match frame {
                Some(Ok(m)) => m,
                Some(Err(e)) => {
                    return Err(DoorbellError::Channel(format!("slack websocket read failed: {e}")))
                }
                None => return Ok(SessionEnd::Reconnect { greeted }),
            };

            match msg {
                Message::Text(text) => {
                    let envelope: Envelope = match serde_json::from_str(&text) {
                        Ok(e) => e,
                        Err(e) => {
                            warn!("failed to parse slack envelope: {e}");
                            continue;
                        }
                    };

                    if let Some(id) = &envelope.envelope_id {
                        let ack = serde_json::json!({ "envelope_id": id });
                        if let Err(e) = ws_tx.send(Message::Text(ack.to_string())).await {
                            warn!("failed to ack slack envelope: {e}");
                        }
                    }

                    let kind = envelope.envelope_type.clone();
                    match kind.as_str() {
                        "hello" => {
                            greeted = true;
                            info!("Slack Socket Mode hello received");
                        }
                        "disconnect" => {
                            info!(
                                "Slack requested disconnect: {}",
                                envelope.reason.as_deref().unwrap_or("unknown")
                            );
                            return Ok(SessionEnd::Reconnect { greeted });
                        }
                        "events_api" if envelope.is_timeout_retry() => {
                            debug!("slack: ignoring timeout retry");
                        }
                        "events_api" => {
                            if let Some(mention) = envelope.into_mention() {
                                let listener = self.clone();
                                tokio::spawn(async move { listener.dispatch(mention).await });
                            }
                        }
                        other => debug!("slack: unhandled envelope type {other}"),
                    }
                }
                Message::Ping(data) => {
                    let _ = ws_tx.send(Message::Pong(data)).await;
                }
                Message::Close(_) => {
                    info!("Slack WebSocket closed by server");
                    return Ok(SessionEnd::Reconnect { greeted });
                }
                _ => {}
            }
        }
    }

    /// Forward a mention to the gateway.
    async fn dispatch(&self, mention: Mention) {
        if !self.allowed_users.is_empty() && !self.allowed_users.contains(&mention.user) {
            warn!("ignoring mention from unauthorized user {}", mention.user);
            return;
        }

        let sender_name = resolve_name(
            &self.client,
            &self.api_base,
            &self.bot_token,
            &self.names,
            &mention.user,
        )
        .await;

        let incoming = IncomingMessage {
            id: Uuid::new_v4(),
            channel: "slack".to_string(),
            sender_id: mention.user,
            sender_name,
            text: strip_leading_mention(&mention.text).to_string(),
            timestamp: mention
                .ts
                .as_deref()
                .and_then(parse_ts)
                .unwrap_or_else(chrono::Utc::now),
            reply_target: Some(mention.channel),
        };

        if self.tx.send(incoming).await.is_err() {
            debug!("slack channel receiver dropped");
        }
    }
}
