use crate::{
    calendar::CalendarEvent,
    error::DoorbellError,
    message::{IncomingMessage, OutgoingMessage},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// Messaging Channel trait.
///
/// Every messaging platform implements this trait to receive mentions
/// and post messages.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Human-readable channel name.
    fn name(&self) -> &str;

    /// Start listening for incoming mentions.
    /// Returns a receiver that yields incoming messages.
    async fn start(&self) -> Result<tokio::sync::mpsc::Receiver<IncomingMessage>, DoorbellError>;

    /// Post a message through this channel.
    async fn send(&self, message: OutgoingMessage) -> Result<(), DoorbellError>;

    /// Graceful shutdown.
    async fn stop(&self) -> Result<(), DoorbellError>;
}

/// Calendar service trait.
///
/// Implementations handle authentication and token refresh internally;
/// callers only see transport failures.
#[async_trait]
pub trait Calendar: Send + Sync {
    /// Names of every calendar visible to the bot.
    async fn calendar_names(&self) -> Result<Vec<String>, DoorbellError>;

    /// Events on `calendar_name` starting at or after `min_start` (default: now),
    /// ascending by start, recurring events expanded. Unknown calendars yield
    /// an empty list.
    async fn get_events(
        &self,
        calendar_name: &str,
        min_start: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, DoorbellError>;

    /// First event returned by [`Calendar::get_events`], if any.
    async fn get_next_event(
        &self,
        calendar_name: &str,
        min_start: Option<DateTime<Utc>>,
    ) -> Result<Option<CalendarEvent>, DoorbellError> {
        Ok(self
            .get_events(calendar_name, min_start)
            .await?
            .into_iter()
            .next())
    }
}

/// The physical/audio doorbell.
#[async_trait]
pub trait Chime: Send + Sync {
    /// Play the ring sound, then speak `announcement`.
    async fn ring(&self, announcement: &str) -> Result<(), DoorbellError>;
}

/// Outcome of relaying a URL to the music player client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// No player client has connected.
    NotConnected,
    /// The client was connected but the send failed; the connection is dropped.
    ConnectionLost,
}

/// Remote music player reachable over a local socket.
#[async_trait]
pub trait Player: Send + Sync {
    /// Queue a track URL on the connected client.
    async fn enqueue(&self, url: &str) -> Delivery;
}

/// Source of the current time. Injected so the poller and schedule checks
/// can run against a fixed clock.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}
