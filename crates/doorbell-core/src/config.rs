use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::DoorbellError;

/// Top-level Doorbell configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub doorbell: DoorbellConfig,
    #[serde(default)]
    pub slack: SlackConfig,
    #[serde(default)]
    pub calendar: CalendarConfig,
    #[serde(default)]
    pub poller: PollerConfig,
    #[serde(default)]
    pub chime: ChimeConfig,
    #[serde(default)]
    pub player: PlayerConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// General bot settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DoorbellConfig {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Directory for daily-rolling log files. Empty = log to stdout.
    #[serde(default)]
    pub log_dir: String,
}

impl Default for DoorbellConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            log_level: default_log_level(),
            log_dir: String::new(),
        }
    }
}

/// Slack app config (Socket Mode).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SlackConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// App-level token (`xapp-...`) used to open the Socket Mode connection.
    #[serde(default)]
    pub app_token: String,
    /// Bot token (`xoxb-...`) used for Web API calls.
    #[serde(default)]
    pub bot_token: String,
    /// Allowed Slack user IDs. Empty = allow everyone.
    #[serde(default)]
    pub allowed_users: Vec<String>,
}

impl Default for SlackConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            app_token: String::new(),
            bot_token: String::new(),
            allowed_users: Vec::new(),
        }
    }
}

/// Google Calendar credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub refresh_token: String,
    /// Token refresh attempts per request before giving up.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for CalendarConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            refresh_token: String::new(),
            max_retries: default_max_retries(),
        }
    }
}

/// Subscription poller configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub interval_secs: u64,
    /// Delay before the first pass, giving channels time to connect.
    #[serde(default = "default_startup_delay")]
    pub startup_delay_secs: u64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_poll_interval(),
            startup_delay_secs: default_startup_delay(),
        }
    }
}

/// External commands used to ring the bell.
///
/// The announcement is appended as the last argument of `tts_command`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChimeConfig {
    /// e.g. `["aplay", "~/.doorbell/ding.wav"]`. Empty = no sound.
    #[serde(default)]
    pub sound_command: Vec<String>,
    /// e.g. `["espeak", "-s", "100"]`. Empty = no speech.
    #[serde(default)]
    pub tts_command: Vec<String>,
}

/// Music player relay (local WebSocket server).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_player_bind")]
    pub bind: String,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind: default_player_bind(),
        }
    }
}

/// Persistent store location.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

// --- Default value functions ---

fn default_name() -> String {
    "Doorbell".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_true() -> bool {
    true
}
fn default_max_retries() -> u32 {
    3
}
fn default_poll_interval() -> u64 {
    60
}
fn default_startup_delay() -> u64 {
    5
}
fn default_player_bind() -> String {
    "127.0.0.1:8765".to_string()
}
fn default_store_path() -> String {
    "~/.doorbell/data.json".to_string()
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Fill empty secrets from the environment.
fn apply_env_overrides(config: &mut Config) {
    let overrides: [(&mut String, &str); 5] = [
        (&mut config.slack.app_token, "SLACK_APP_TOKEN"),
        (&mut config.slack.bot_token, "SLACK_BOT_TOKEN"),
        (&mut config.calendar.client_id, "GOOGLE_CLIENT_ID"),
        (&mut config.calendar.client_secret, "GOOGLE_CLIENT_SECRET"),
        (&mut config.calendar.refresh_token, "GOOGLE_REFRESH_TOKEN"),
    ];
    for (field, var) in overrides {
        if field.is_empty() {
            if let Ok(value) = std::env::var(var) {
                *field = value;
            }
        }
    }
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, DoorbellError> {
    let path = Path::new(path);
    let mut config = if path.exists() {
        let content = std::fs::read_to_string(path).map_err(|e| {
            DoorbellError::Config(format!("failed to read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content)
            .map_err(|e| DoorbellError::Config(format!("failed to parse config: {}", e)))?
    } else {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        Config::default()
    };

    apply_env_overrides(&mut config);
    Ok(config)
}
