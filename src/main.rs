mod chime;
mod commands;
mod gateway;
#[cfg(test)]
mod test_support;

use chime::CommandChime;
use clap::{Parser, Subcommand};
use doorbell_calendar::GoogleCalendar;
use doorbell_channels::{player::PlayerRelay, slack::SlackChannel};
use doorbell_core::{
    config::{self, shellexpand, Config},
    traits::{Channel, Player, SystemClock},
};
use doorbell_store::Store;
use gateway::{Gateway, RunOutcome};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(
    name = "doorbell",
    version,
    about = "Doorbell: Slack doorbell, schedule and calendar reminder bot"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Path to config file.
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the bot. `restart` and `update` rebuild it in place.
    Start,
    /// Show configuration and stored data.
    Status,
    /// Write the raw data file to a path.
    Export {
        /// Destination file.
        path: String,
    },
    /// Delete the data file and start over with empty data.
    Reset,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let cfg = config::load(&cli.config)?;
    let _log_guard = init_logging(&cfg);

    match cli.command {
        Commands::Start => run(&cli.config, cfg).await?,
        Commands::Status => status(&cli.config, &cfg).await?,
        Commands::Export { path } => {
            let store = Store::new(&cfg.store).await?;
            let bytes = store.snapshot_bytes().await?;
            tokio::fs::write(&path, &bytes).await?;
            println!("Exported {} bytes to {path}", bytes.len());
        }
        Commands::Reset => {
            let store = Store::open(shellexpand(&cfg.store.path));
            store.delete().await?;
            store.create().await?;
            println!("Reset {}", store.path().display());
        }
    }

    Ok(())
}

/// Install the fmt subscriber. `RUST_LOG` wins over `doorbell.log_level`.
/// With `doorbell.log_dir` set, logs go to a daily-rolling file; the
/// returned guard must be held to flush it.
fn init_logging(cfg: &Config) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&cfg.doorbell.log_level));

    if cfg.doorbell.log_dir.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return None;
    }

    let appender =
        tracing_appender::rolling::daily(shellexpand(&cfg.doorbell.log_dir), "doorbell.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}

/// Supervisor: build everything, run the gateway, and rebuild on restart.
async fn run(config_path: &str, mut cfg: Config) -> anyhow::Result<()> {
    loop {
        println!("{} starting...", cfg.doorbell.name);
        let store = Store::new(&cfg.store).await?;

        let player = Arc::new(PlayerRelay::new(&cfg.player));
        if cfg.player.enabled {
            player.start().await?;
        }

        let mut channels: HashMap<String, Arc<dyn Channel>> = HashMap::new();
        if cfg.slack.enabled {
            if cfg.slack.app_token.is_empty() || cfg.slack.bot_token.is_empty() {
                anyhow::bail!(
                    "Slack is enabled but app_token or bot_token is empty. \
                     Set them in config.toml or SLACK_APP_TOKEN / SLACK_BOT_TOKEN."
                );
            }
            channels.insert(
                "slack".to_string(),
                Arc::new(SlackChannel::new(cfg.slack.clone())),
            );
        }
        if channels.is_empty() {
            anyhow::bail!("No channels enabled. Enable [slack] in config.toml.");
        }

        let gw = Arc::new(Gateway::new(
            channels,
            store,
            Arc::new(GoogleCalendar::from_config(&cfg.calendar)),
            Arc::new(CommandChime::new(&cfg.chime)),
            player.clone() as Arc<dyn Player>,
            Arc::new(SystemClock),
            cfg.poller.clone(),
        ));
        let outcome = gw.run().await;
        player.stop().await;

        match outcome? {
            RunOutcome::Stop => {
                info!("Doorbell stopped");
                return Ok(());
            }
            RunOutcome::Restart => {
                info!("Restarting with config from {config_path}");
                cfg = config::load(config_path)?;
            }
        }
    }
}

async fn status(config_path: &str, cfg: &Config) -> anyhow::Result<()> {
    println!("{} status\n", cfg.doorbell.name);
    println!("Config: {config_path}");
    println!(
        "  slack: {}",
        if !cfg.slack.enabled {
            "disabled"
        } else if cfg.slack.app_token.is_empty() || cfg.slack.bot_token.is_empty() {
            "enabled but missing tokens"
        } else {
            "configured"
        }
    );
    println!(
        "  calendar: {}",
        if cfg.calendar.refresh_token.is_empty() {
            "missing refresh_token"
        } else {
            "configured"
        }
    );
    println!(
        "  poller: {}",
        if cfg.poller.enabled {
            format!("every {}s", cfg.poller.interval_secs)
        } else {
            "disabled".to_string()
        }
    );
    println!(
        "  player: {}",
        if cfg.player.enabled {
            cfg.player.bind.as_str()
        } else {
            "disabled"
        }
    );
    println!();

    let store = Store::new(&cfg.store).await?;
    let data = store.read().await?;
    println!("Store: {}", store.path().display());
    match &data.schedule {
        Some(schedule) => println!("  schedule: {schedule}"),
        None => println!("  schedule: not set"),
    }
    println!("  subscriptions: {}", data.subscriptions.len());
    println!("  roles: {}", data.roles.len());
    Ok(())
}
