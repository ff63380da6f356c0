use super::{Control, Reply};
use doorbell_core::traits::{Delivery, Player};
use tracing::{info, warn};

const SPOTIFY_PREFIX: &str = "https://open.spotify.com/";

/// `play <url>`: relay a Spotify link to the player client.
pub(super) async fn play(player: &dyn Player, args: &[&str]) -> String {
    let Some(raw) = args.first() else {
        return "Must give a Spotify track URL.".to_string();
    };
    let url = slack_link(raw);
    if !url.starts_with(SPOTIFY_PREFIX) {
        return "Invalid Spotify URL.".to_string();
    }

    match player.enqueue(url).await {
        Delivery::Sent => format!("Added {url} to the queue."),
        Delivery::NotConnected => "Spotify has not connected to Doorbell.".to_string(),
        Delivery::ConnectionLost => "Doorbell has lost connection with Spotify.".to_string(),
    }
}

/// Slack wraps links as `<url>` or `<url|label>`.
pub(super) fn slack_link(raw: &str) -> &str {
    let trimmed = raw.trim_start_matches('<').trim_end_matches('>');
    trimmed.split('|').next().unwrap_or(trimmed)
}

/// `update`: `git pull` in the working directory, then restart.
pub(super) async fn update() -> Reply {
    info!("running git pull");
    let output = match tokio::process::Command::new("git").arg("pull").output().await {
        Ok(o) => o,
        Err(e) => {
            warn!("git pull failed to start: {e}");
            return format!("Error: failed to run git pull: {e}").into();
        }
    };

    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = format!("{} {}", stdout.trim(), stderr.trim());
    let text = match text.trim() {
        "" => "Updated.",
        t => t,
    };
    Reply::with_control(text, Control::Restart)
}
