//! Slack Web API and Socket Mode deserialization types.

use chrono::{DateTime, Utc};
use serde::Deserialize;

/// Socket Mode envelope. Every frame from Slack has this shape.
#[derive(Debug, Deserialize)]
pub(crate) struct Envelope {
    #[serde(rename = "type")]
    pub envelope_type: String,
    pub envelope_id: Option<String>,
    pub retry_reason: Option<String>,
    /// Set on `disconnect` envelopes.
    pub reason: Option<String>,
    pub payload: Option<EventsPayload>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct EventsPayload {
    pub event: Option<SlackEvent>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SlackEvent {
    #[serde(default, rename = "type")]
    pub event_type: String,
    pub user: Option<String>,
    pub channel: Option<String>,
    pub text: Option<String>,
    pub ts: Option<String>,
}

/// An `app_mention` event reduced to what the bot needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Mention {
    pub user: String,
    pub channel: String,
    pub text: String,
    pub ts: Option<String>,
}

impl Envelope {
    /// Slack redelivers events it thinks timed out; the first delivery
    /// was already handled.
    pub fn is_timeout_retry(&self) -> bool {
        self.retry_reason.as_deref() == Some("timeout")
    }

    /// The mention carried by an `events_api` envelope, if any.
    pub fn into_mention(self) -> Option<Mention> {
        if self.envelope_type != "events_api" {
            return None;
        }
        let event = self.payload?.event?;
        if event.event_type != "app_mention" {
            return None;
        }
        Some(Mention {
            user: event.user?,
            channel: event.channel?,
            text: event.text.unwrap_or_default(),
            ts: event.ts,
        })
    }
}

/// Parse a Slack `ts` such as `1700000000.000100`.
pub(crate) fn parse_ts(ts: &str) -> Option<DateTime<Utc>> {
    let (secs, frac) = ts.split_once('.').unwrap_or((ts, "0"));
    let secs: i64 = secs.parse().ok()?;
    let micros: u32 = format!("{frac:0<6}").get(..6)?.parse().ok()?;
    DateTime::from_timestamp(secs, micros * 1000)
}

#[derive(Debug, Deserialize)]
pub(crate) struct ConnectionsOpen {
    pub ok: bool,
    pub url: Option<String>,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct PostMessage {
    pub ok: bool,
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct UsersInfo {
    pub ok: bool,
    pub user: Option<SlackUser>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SlackUser {
    pub name: Option<String>,
    pub real_name: Option<String>,
    pub profile: Option<SlackProfile>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct SlackProfile {
    pub real_name: Option<String>,
    pub display_name: Option<String>,
}

impl SlackUser {
    /// Real name first, then profile names, then the handle.
    pub fn best_name(self) -> Option<String> {
        let profile = self.profile.unwrap_or(SlackProfile {
            real_name: None,
            display_name: None,
        });
        [
            self.real_name,
            profile.real_name,
            profile.display_name,
            self.name,
        ]
        .into_iter()
        .flatten()
        .find(|n| !n.trim().is_empty())
    }
}
