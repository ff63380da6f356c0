//! Mention commands: parse the first word and dispatch to a handler.

mod calendar;
mod door;
mod roles;
mod schedule;
mod system;


use doorbell_core::traits::{Calendar, Chime, Clock, Player};
use doorbell_store::Store;

/// Words that ring the bell.
pub const DOOR_WORDS: [&str; 6] = ["door", "noor", "abracadabra", "ding", "ring", "boop"];

const VALID_ARGUMENTS: &str = "Valid arguments are door, schedule, calendars, next, subscribe, \
     unsubscribe, subscriptions, roles, play, restart, update, and exit.";

/// Lifecycle request returned alongside a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    Restart,
    Stop,
}

/// Text to post back, plus an optional lifecycle request for the supervisor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub control: Option<Control>,
}

impl Reply {
    pub fn with_control(text: impl Into<String>, control: Control) -> Self {
        Self {
            text: text.into(),
            control: Some(control),
        }
    }
}

impl From<String> for Reply {
    fn from(text: String) -> Self {
        Self {
            text,
            control: None,
        }
    }
}

impl From<&str> for Reply {
    fn from(text: &str) -> Self {
        text.to_string().into()
    }
}

/// Everything a handler may touch.
pub struct CommandContext<'a> {
    pub store: &'a Store,
    pub calendar: &'a dyn Calendar,
    pub chime: &'a dyn Chime,
    pub player: &'a dyn Player,
    pub clock: &'a dyn Clock,
    /// Slack channel the mention came from.
    pub channel_id: &'a str,
    pub sender_id: &'a str,
    pub sender_name: &'a str,
}

/// Known commands.
#[derive(Debug, PartialEq, Eq)]
pub enum Command {
    Door,
    Schedule,
    Calendars,
    Next,
    Subscribe,
    Unsubscribe,
    Subscriptions,
    Roles,
    Play,
    Restart,
    Update,
    Stop,
    Help,
    Empty,
    Unknown(String),
}

impl Command {
    /// Parse the command word (case-insensitive) from mention text.
    pub fn parse(text: &str) -> Self {
        let Some(first) = text.split_whitespace().next() else {
            return Self::Empty;
        };
        let cmd = first.to_lowercase();
        match cmd.as_str() {
            w if DOOR_WORDS.contains(&w) => Self::Door,
            "schedule" => Self::Schedule,
            "calendars" => Self::Calendars,
            "next" => Self::Next,
            "subscribe" => Self::Subscribe,
            "unsubscribe" => Self::Unsubscribe,
            "subscriptions" => Self::Subscriptions,
            "roles" => Self::Roles,
            "play" => Self::Play,
            "restart" => Self::Restart,
            "update" => Self::Update,
            "exit" | "stop" => Self::Stop,
            "help" => Self::Help,
            _ => Self::Unknown(cmd),
        }
    }
}

/// Handle mention text and return the reply.
pub async fn handle(text: &str, ctx: &CommandContext<'_>) -> Reply {
    let tokens: Vec<&str> = text.split_whitespace().collect();
    let args = tokens.get(1..).unwrap_or_default();

    match Command::parse(text) {
        Command::Empty => "Hi! (Must provide a command).".into(),
        Command::Door => door::ring(ctx, args.first().copied()).await.into(),
        Command::Schedule if args.is_empty() => schedule::show(ctx.store).await.into(),
        Command::Schedule => schedule::set(ctx.store, args).await.into(),
        Command::Calendars => calendar::list(ctx).await.into(),
        Command::Next => calendar::next(ctx, args).await.into(),
        Command::Subscribe => calendar::subscribe(ctx, args).await.into(),
        Command::Unsubscribe => calendar::unsubscribe(ctx, args).await.into(),
        Command::Subscriptions => calendar::subscriptions(ctx, args).await.into(),
        Command::Roles => roles::handle(ctx, args).await.into(),
        Command::Play => system::play(ctx.player, args).await.into(),
        Command::Restart => Reply::with_control("Restarting.", Control::Restart),
        Command::Update => system::update().await,
        Command::Stop => Reply::with_control("Stopping.", Control::Stop),
        Command::Help => VALID_ARGUMENTS.into(),
        Command::Unknown(cmd) => format!("Invalid argument: {cmd}. {VALID_ARGUMENTS}").into(),
    }
}

/// Reply text for a storage failure during a command.
fn storage_error(e: impl std::fmt::Display) -> String {
    tracing::error!("command storage error: {e}");
    format!("Error: {e}")
}
