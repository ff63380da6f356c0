//! Music player relay.
//!
//! A WebSocket server on a local address. A player extension connects as a
//! client; `play` URLs are forwarded to the most recently connected one as
//! single text frames.

use async_trait::async_trait;
use doorbell_core::{
    config::PlayerConfig,
    error::DoorbellError,
    traits::{Delivery, Player},
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::{tungstenite::Message, WebSocketStream};
use tracing::{debug, info, warn};

type ClientSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Connection state of the player client.
enum Slot {
    Empty,
    Connected { id: u64, sink: ClientSink },
    /// The client went away; the next `enqueue` reports it once.
    Lost,
}

/// WebSocket relay to the music player client.
pub struct PlayerRelay {
    bind: String,
    slot: Arc<Mutex<Slot>>,
    next_id: Arc<AtomicU64>,
    shutdown: watch::Sender<bool>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl PlayerRelay {
    pub fn new(config: &PlayerConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            bind: config.bind.clone(),
            slot: Arc::new(Mutex::new(Slot::Empty)),
            next_id: Arc::new(AtomicU64::new(0)),
            shutdown,
            accept_task: Mutex::new(None),
        }
    }

    /// Bind the listener and accept clients in the background.
    /// Returns the bound address.
    pub async fn start(&self) -> Result<SocketAddr, DoorbellError> {
        let listener = TcpListener::bind(&self.bind)
            .await
            .map_err(|e| DoorbellError::Player(format!("failed to bind {}: {e}", self.bind)))?;
        let addr = listener.local_addr()?;
        info!("Player relay listening on ws://{addr}");

        let slot = self.slot.clone();
        let next_id = self.next_id.clone();
        let mut shutdown = self.shutdown.subscribe();

        let task = tokio::spawn(async move {
            loop {
                let (stream, peer) = tokio::select! {
                    accepted = listener.accept() => match accepted {
                        Ok(pair) => pair,
                        Err(e) => {
                            warn!("player relay accept failed: {e}");
                            continue;
                        }
                    },
                    _ = shutdown.changed() => break,
                };
                let id = next_id.fetch_add(1, Ordering::Relaxed);
                tokio::spawn(serve_client(stream, peer, id, slot.clone()));
            }
            *slot.lock().await = Slot::Empty;
            info!("Player relay stopped");
        });
        *self.accept_task.lock().await = Some(task);

        Ok(addr)
    }

    /// Stop accepting clients and forget the current one. Returns once the
    /// listener is closed, so the address can be bound again.
    pub async fn stop(&self) {
        self.shutdown.send_replace(true);
        let task = self.accept_task.lock().await.take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!("player relay task failed: {e}");
            }
        }
    }

    pub async fn is_connected(&self) -> bool {
        matches!(*self.slot.lock().await, Slot::Connected { .. })
    }
}

/// Handshake, install as the current client, then drain inbound frames
/// until the client leaves.
async fn serve_client(stream: TcpStream, peer: SocketAddr, id: u64, slot: Arc<Mutex<Slot>>) {
    let ws = match tokio_tungstenite::accept_async(stream).await {
        Ok(ws) => ws,
        Err(e) => {
            warn!("player handshake from {peer} failed: {e}");
            return;
        }
    };
    info!("Player client connected from {peer}");

    let (sink, mut inbound) = ws.split();
    *slot.lock().await = Slot::Connected { id, sink };

    while let Some(frame) = inbound.next().await {
        match frame {
            Ok(Message::Close(_)) | Err(_) => break,
            Ok(other) => debug!("player client sent {} bytes", other.len()),
        }
    }

    info!("Player client {peer} disconnected");
    let mut current = slot.lock().await;
    if matches!(*current, Slot::Connected { id: cur, .. } if cur == id) {
        *current = Slot::Lost;
    }
}

#[async_trait]
impl Player for PlayerRelay {
    async fn enqueue(&self, url: &str) -> Delivery {
        let mut slot = self.slot.lock().await;
        match &mut *slot {
            Slot::Empty => Delivery::NotConnected,
            Slot::Lost => {
                *slot = Slot::Empty;
                Delivery::ConnectionLost
            }
            Slot::Connected { sink, .. } => match sink.send(Message::Text(url.to_string())).await {
                Ok(()) => {
                    info!("Queued {url} on player");
                    Delivery::Sent
                }
                Err(e) => {
                    warn!("player send failed: {e}");
                    *slot = Slot::Empty;
                    Delivery::ConnectionLost
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn relay() -> (PlayerRelay, SocketAddr) {
        let relay = PlayerRelay::new(&PlayerConfig {
            enabled: true,
            bind: "127.0.0.1:0".into(),
        });
        let addr = relay.start().await.unwrap();
        (relay, addr)
    }

    async fn wait_until<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("condition not reached");
    }

    async fn current_id(relay: &PlayerRelay) -> Option<u64> {
        match &*relay.slot.lock().await {
            Slot::Connected { id, .. } => Some(*id),
            _ => None,
        }
    }

    #[tokio::test]
    async fn test_enqueue_without_client() {
        let (relay, _) = relay().await;
        assert_eq!(
            relay.enqueue("https://open.spotify.com/track/1").await,
            Delivery::NotConnected
        );
    }

    #[tokio::test]
    async fn test_enqueue_sends_text_frame() {
        let (relay, addr) = relay().await;
        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let r = &relay;
        wait_until(|| r.is_connected()).await;

        let url = "https://open.spotify.com/track/abc";
        assert_eq!(relay.enqueue(url).await, Delivery::Sent);
        let frame = tokio::time::timeout(Duration::from_secs(2), client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text(url.to_string()));
    }

    #[tokio::test]
    async fn test_lost_client_reported_once() {
        let (relay, addr) = relay().await;
        let (mut client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let r = &relay;
        wait_until(|| r.is_connected()).await;

        client.close(None).await.unwrap();
        wait_until(|| async move { !r.is_connected().await }).await;

        let url = "https://open.spotify.com/track/abc";
        assert_eq!(relay.enqueue(url).await, Delivery::ConnectionLost);
        assert_eq!(relay.enqueue(url).await, Delivery::NotConnected);
    }

    #[tokio::test]
    async fn test_newest_client_wins() {
        let (relay, addr) = relay().await;
        let (mut first, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let r = &relay;
        wait_until(|| async move { current_id(r).await == Some(0) }).await;
        let (mut second, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        wait_until(|| async move { current_id(r).await == Some(1) }).await;

        let url = "https://open.spotify.com/track/xyz";
        assert_eq!(relay.enqueue(url).await, Delivery::Sent);
        let frame = tokio::time::timeout(Duration::from_secs(2), second.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(frame, Message::Text(url.to_string()));

        // The replaced client leaving does not disturb the current one.
        first.close(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(current_id(&relay).await, Some(1));
    }

    #[tokio::test]
    async fn test_stop_releases_address() {
        let (relay, addr) = relay().await;
        let (_client, _) = tokio_tungstenite::connect_async(format!("ws://{addr}"))
            .await
            .unwrap();
        let r = &relay;
        wait_until(|| r.is_connected()).await;

        relay.stop().await;
        assert!(!relay.is_connected().await);
        assert_eq!(
            relay.enqueue("https://open.spotify.com/track/1").await,
            Delivery::NotConnected
        );

        let again = PlayerRelay::new(&PlayerConfig {
            enabled: true,
            bind: addr.to_string(),
        });
        assert_eq!(again.start().await.unwrap(), addr);
        again.stop().await;
    }
}
