//! Slack channel using Socket Mode.
//!
//! Opens a WebSocket via `apps.connections.open`, turns `app_mention` events
//! into incoming messages, and posts replies with `chat.postMessage`.
//! Docs: <https://api.slack.com/apis/socket-mode>

mod send;
mod socket;
pub(crate) mod types;


use doorbell_core::config::SlackConfig;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};

const SLACK_API: &str = "https://slack.com/api";

/// Slack channel over Socket Mode.
pub struct SlackChannel {
    config: SlackConfig,
    client: reqwest::Client,
    api_base: String,
    /// User ID → display name, filled lazily from `users.info`.
    names: Arc<Mutex<HashMap<String, String>>>,
    shutdown: watch::Sender<bool>,
}

impl SlackChannel {
    /// Create a new Slack channel from config.
    pub fn new(config: SlackConfig) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            config,
            client: reqwest::Client::new(),
            api_base: SLACK_API.to_string(),
            names: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
        }
    }
}

/// Remove a leading `<@U123>` mention and surrounding whitespace.
pub(crate) fn strip_leading_mention(text: &str) -> &str {
    let text = text.trim();
    if text.starts_with("<@") {
        if let Some(end) = text.find('>') {
            return text[end + 1..].trim();
        }
    }
    text
}
