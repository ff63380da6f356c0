//! Web API calls: posting messages and resolving user names.

use super::types::{PostMessage, UsersInfo};
use super::SlackChannel;
use doorbell_core::error::DoorbellError;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, warn};

impl SlackChannel {
    /// Post `text` to `channel` with link unfurling disabled.
    pub(crate) async fn post_message(&self, channel: &str, text: &str) -> Result<(), DoorbellError> {
        let body = serde_json::json!({
            "channel": channel,
            "text": text,
            "unfurl_links": false,
            "unfurl_media": false,
        });

        let resp: PostMessage = self
            .client
            .post(format!("{}/chat.postMessage", self.api_base))
            .bearer_auth(&self.config.bot_token)
            .json(&body)
            .send()
            .await
            .map_err(|e| DoorbellError::Channel(format!("slack send failed: {e}")))?
            .json()
            .await
            .map_err(|e| DoorbellError::Channel(format!("slack send parse failed: {e}")))?;

        if !resp.ok {
            return Err(DoorbellError::Channel(format!(
                "chat.postMessage failed: {}",
                resp.error.unwrap_or_else(|| "unknown".to_string())
            )));
        }
        debug!("slack: posted {} chars to {channel}", text.len());
        Ok(())
    }
}

/// Display name for `user`, cached after the first `users.info` lookup.
pub(crate) async fn resolve_name(
    client: &reqwest::Client,
    api_base: &str,
    bot_token: &str,
    names: &Arc<Mutex<HashMap<String, String>>>,
    user: &str,
) -> Option<String> {
    if let Some(name) = names.lock().await.get(user) {
        return Some(name.clone());
    }

    let resp = client
        .get(format!("{api_base}/users.info"))
        .bearer_auth(bot_token)
        .query(&[("user", user)])
        .send()
        .await;
    let info: UsersInfo = match resp {
        Ok(r) => match r.json().await {
            Ok(info) => info,
            Err(e) => {
                warn!("slack users.info parse failed: {e}");
                return None;
            }
        },
        Err(e) => {
            warn!("slack users.info failed: {e}");
            return None;
        }
    };
    if !info.ok {
        return None;
    }

    let name = info.user?.best_name()?;
    names.lock().await.insert(user.to_string(), name.clone());
    Some(name)
}
