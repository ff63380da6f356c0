//! Gateway: the main event loop connecting channels, commands, and the poller.

mod poller;

use crate::commands::{self, CommandContext, Control};
use doorbell_core::{
    config::PollerConfig,
    message::{IncomingMessage, OutgoingMessage},
    traits::{Calendar, Channel, Chime, Clock, Player},
};
use doorbell_store::Store;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Channel that carries calendar reminders.
const REMINDER_CHANNEL: &str = "slack";

/// How long shutdown waits for an in-flight poll pass.
const POLLER_STOP_TIMEOUT: Duration = Duration::from_secs(10);

/// Why [`Gateway::run`] returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Rebuild every collaborator from a fresh config and run again.
    Restart,
    Stop,
}

/// Routes mentions to command handlers and owns the subscription poller.
pub struct Gateway {
    channels: HashMap<String, Arc<dyn Channel>>,
    store: Store,
    calendar: Arc<dyn Calendar>,
    chime: Arc<dyn Chime>,
    player: Arc<dyn Player>,
    clock: Arc<dyn Clock>,
    poller_config: PollerConfig,
}

impl Gateway {
    pub fn new(
        channels: HashMap<String, Arc<dyn Channel>>,
        store: Store,
        calendar: Arc<dyn Calendar>,
        chime: Arc<dyn Chime>,
        player: Arc<dyn Player>,
        clock: Arc<dyn Clock>,
        poller_config: PollerConfig,
    ) -> Self {
        Self {
            channels,
            store,
            calendar,
            chime,
            player,
            clock,
            poller_config,
        }
    }

    /// Run until a command asks to restart or stop, or Ctrl-C arrives.
    pub async fn run(self: Arc<Self>) -> anyhow::Result<RunOutcome> {
        info!(
            "Doorbell gateway running | channels: {} | store: {}",
            self.channels.keys().cloned().collect::<Vec<_>>().join(", "),
            self.store.path().display(),
        );

        let (tx, mut rx) = mpsc::channel::<IncomingMessage>(256);

        for (name, channel) in &self.channels {
            let mut channel_rx = channel
                .start()
                .await
                .map_err(|e| anyhow::anyhow!("failed to start channel {name}: {e}"))?;
            let tx = tx.clone();
            let channel_name = name.clone();

            tokio::spawn(async move {
                while let Some(msg) = channel_rx.recv().await {
                    if tx.send(msg).await.is_err() {
                        info!("gateway receiver dropped, stopping {channel_name} forwarder");
                        break;
                    }
                }
            });

            info!("Channel started: {name}");
        }

        drop(tx);

        let (stop_tx, stop_rx) = watch::channel(false);
        let poller_handle = self.spawn_poller(stop_rx);

        let (control_tx, mut control_rx) = mpsc::unbounded_channel::<Control>();

        let outcome = loop {
            tokio::select! {
                Some(incoming) = rx.recv() => {
                    let gw = self.clone();
                    let control_tx = control_tx.clone();
                    tokio::spawn(async move {
                        gw.handle_message(incoming, &control_tx).await;
                    });
                }
                Some(control) = control_rx.recv() => {
                    info!("Received {control:?} request");
                    break match control {
                        Control::Restart => RunOutcome::Restart,
                        Control::Stop => RunOutcome::Stop,
                    };
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received shutdown signal");
                    break RunOutcome::Stop;
                }
            }
        };

        self.shutdown(stop_tx, poller_handle).await;
        Ok(outcome)
    }

    fn spawn_poller(&self, stop_rx: watch::Receiver<bool>) -> Option<JoinHandle<()>> {
        if !self.poller_config.enabled {
            info!("Subscription poller disabled");
            return None;
        }
        let Some(notifier) = self.channels.get(REMINDER_CHANNEL).cloned() else {
            warn!("no {REMINDER_CHANNEL} channel; subscription reminders are disabled");
            return None;
        };
        Some(tokio::spawn(poller::poller_loop(
            self.store.clone(),
            self.calendar.clone(),
            notifier,
            self.clock.clone(),
            self.poller_config.clone(),
            stop_rx,
        )))
    }

    /// Run one mention through the command handlers. The reply is posted
    /// before any lifecycle request is forwarded.
    async fn handle_message(
        &self,
        incoming: IncomingMessage,
        controls: &mpsc::UnboundedSender<Control>,
    ) {
        let Some(channel_id) = incoming.reply_target.as_deref() else {
            warn!("dropping message from {} without a reply target", incoming.sender_id);
            return;
        };
        info!(
            "[{}] {} in {channel_id}: {}",
            incoming.channel,
            incoming.display_name(),
            incoming.text
        );

        let ctx = CommandContext {
            store: &self.store,
            calendar: self.calendar.as_ref(),
            chime: self.chime.as_ref(),
            player: self.player.as_ref(),
            clock: self.clock.as_ref(),
            channel_id,
            sender_id: &incoming.sender_id,
            sender_name: incoming.display_name(),
        };
        let reply = commands::handle(&incoming.text, &ctx).await;

        self.send_text(&incoming, &reply.text).await;

        if let Some(control) = reply.control {
            if controls.send(control).is_err() {
                warn!("gateway loop gone, dropping {control:?} request");
            }
        }
    }

    async fn shutdown(&self, stop_tx: watch::Sender<bool>, poller: Option<JoinHandle<()>>) {
        info!("Shutting down...");

        stop_tx.send_replace(true);
        if let Some(handle) = poller {
            match tokio::time::timeout(POLLER_STOP_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => warn!("poller task failed: {e}"),
                Err(_) => warn!("poller did not stop within {POLLER_STOP_TIMEOUT:?}"),
            }
        }

        for (name, channel) in &self.channels {
            if let Err(e) = channel.stop().await {
                warn!("failed to stop channel {name}: {e}");
            }
        }

        info!("Shutdown complete.");
    }

    /// Post a plain text reply to wherever the message came from.
    async fn send_text(&self, incoming: &IncomingMessage, text: &str) {
        let msg = OutgoingMessage {
            text: text.to_string(),
            reply_target: incoming.reply_target.clone(),
        };

        if let Some(channel) = self.channels.get(&incoming.channel) {
            if let Err(e) = channel.send(msg).await {
                error!("failed to send message: {e}");
            }
        }
    }
}
