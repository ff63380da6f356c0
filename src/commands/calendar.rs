use super::{storage_error, CommandContext};
use chrono::Duration;
use doorbell_store::{data::format_hours, Subscription};
use tracing::{info, warn};

/// Longest accepted reminder lead time: one year.
const MAX_REMIND_HOURS: f64 = 24.0 * 365.0;

fn calendar_error(e: impl std::fmt::Display) -> String {
    warn!("calendar command failed: {e}");
    format!("Error: {e}")
}

pub(super) async fn list(ctx: &CommandContext<'_>) -> String {
    match ctx.calendar.calendar_names().await {
        Ok(names) => format!("Calendars: {}", names.join(", ")),
        Err(e) => calendar_error(e),
    }
}

pub(super) async fn next(ctx: &CommandContext<'_>, args: &[&str]) -> String {
    if args.is_empty() {
        return "Need to provide a calendar.".to_string();
    }
    let name = args.join(" ");
    match ctx
        .calendar
        .get_next_event(&name, Some(ctx.clock.now()))
        .await
    {
        Ok(Some(event)) => event.summary(),
        Ok(None) => format!("Invalid Calendar - {name} or no future events."),
        Err(e) => calendar_error(e),
    }
}

/// `subscribe <hours> <calendar...>`
pub(super) async fn subscribe(ctx: &CommandContext<'_>, args: &[&str]) -> String {
    let Some(hours_arg) = args.first() else {
        return "Must provide how many hours before to be reminded.".to_string();
    };
    if args.len() < 2 {
        return "Must provide a calendar to subscribe to.".to_string();
    }
    let parsed = hours_arg
        .parse::<f64>()
        .ok()
        .filter(|h| (0.0..=MAX_REMIND_HOURS).contains(h))
        .and_then(|h| Some((h, Duration::try_seconds((h * 3600.0).round() as i64)?)));
    let Some((hours, remind_time)) = parsed else {
        return format!("Invalid number of hours - {hours_arg}.");
    };
    let name = args[1..].join(" ");

    let names = match ctx.calendar.calendar_names().await {
        Ok(n) => n,
        Err(e) => return calendar_error(e),
    };
    if !names.contains(&name) {
        return format!("Invalid calendar - {name}.");
    }

    match ctx.store.read().await {
        Ok(data) if data.find_subscription(ctx.channel_id, &name).is_some() => {
            return already_subscribed(&name);
        }
        Ok(_) => {}
        Err(e) => return storage_error(e),
    }

    let now = ctx.clock.now();
    let next_event = match ctx.calendar.get_next_event(&name, Some(now)).await {
        Ok(e) => e,
        Err(e) => return calendar_error(e),
    };
    let sub = Subscription::new(ctx.channel_id, name.as_str(), remind_time, next_event, now);

    match ctx.store.update(move |data| data.add_subscription(sub)).await {
        Ok(true) => {
            info!("{} subscribed {} to {name}", ctx.sender_name, ctx.channel_id);
            format!(
                "Subscribed to {name} and reminds {} hours before.",
                format_hours(hours)
            )
        }
        Ok(false) => already_subscribed(&name),
        Err(e) => storage_error(e),
    }
}

fn already_subscribed(name: &str) -> String {
    format!("Already subscribed to {name} in this channel.")
}

/// `unsubscribe <calendar...>`
pub(super) async fn unsubscribe(ctx: &CommandContext<'_>, args: &[&str]) -> String {
    if args.is_empty() {
        return "Must provide a calendar to unsubscribe from.".to_string();
    }
    let name = args.join(" ");
    let channel = ctx.channel_id.to_string();
    let target = name.clone();
    match ctx
        .store
        .update(move |data| data.remove_subscription(&channel, &target))
        .await
    {
        Ok(true) => {
            info!("{} unsubscribed {} from {name}", ctx.sender_name, ctx.channel_id);
            format!("Unsubscribed from {name}.")
        }
        Ok(false) => format!("No subscription to {name} in this channel."),
        Err(e) => storage_error(e),
    }
}

/// `subscriptions [all]`
pub(super) async fn subscriptions(ctx: &CommandContext<'_>, args: &[&str]) -> String {
    let all = args
        .first()
        .is_some_and(|a| a.eq_ignore_ascii_case("all"));
    match ctx.store.read().await {
        Ok(data) if all => data.all_subscriptions_summary(),
        Ok(data) => data.subscriptions_summary(ctx.channel_id),
        Err(e) => storage_error(e),
    }
}
