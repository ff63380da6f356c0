//! Subscription poller: posts calendar reminders into subscribed channels.

use doorbell_core::{
    calendar::CalendarEvent,
    config::PollerConfig,
    error::DoorbellError,
    message::OutgoingMessage,
    traits::{Calendar, Channel, Clock},
};
use doorbell_store::{Store, Subscription};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Background task: run a poll pass every `interval_secs` until `stop` flips.
///
/// The next sleep starts only after the previous pass has written back.
pub(crate) async fn poller_loop(
    store: Store,
    calendar: Arc<dyn Calendar>,
    notifier: Arc<dyn Channel>,
    clock: Arc<dyn Clock>,
    config: PollerConfig,
    mut stop: watch::Receiver<bool>,
) {
    info!(
        "poller started (every {}s, first pass in {}s)",
        config.interval_secs, config.startup_delay_secs
    );
    if sleep_or_stop(config.startup_delay_secs, &mut stop).await {
        info!("poller stopped before first pass");
        return;
    }

    loop {
        if *stop.borrow() {
            break;
        }
        match poll_subscriptions(&store, calendar.as_ref(), notifier.as_ref(), clock.as_ref()).await
        {
            Ok(0) => debug!("poll pass: no reminders due"),
            Ok(n) => info!("poll pass: sent {n} reminder(s)"),
            Err(e) => error!("poll pass failed: {e}"),
        }
        if sleep_or_stop(config.interval_secs, &mut stop).await {
            break;
        }
    }
    info!("poller stopped");
}

/// Sleep for `secs`, returning early with `true` when a stop is requested.
async fn sleep_or_stop(secs: u64, stop: &mut watch::Receiver<bool>) -> bool {
    if *stop.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(secs)) => *stop.borrow(),
        changed = stop.changed() => changed.is_err() || *stop.borrow(),
    }
}

/// One pass over every subscription. Returns the number of reminders posted.
///
/// Changed subscriptions are merged back into a fresh read of the store.
/// An entry is only replaced while it still equals the copy the pass started
/// from, so subscriptions added, removed, or re-added while the pass ran
/// are respected.
pub(crate) async fn poll_subscriptions(
    store: &Store,
    calendar: &dyn Calendar,
    notifier: &dyn Channel,
    clock: &dyn Clock,
) -> Result<usize, DoorbellError> {
    let snapshot = store.read().await?;
    // (as read, as updated)
    let mut changed: Vec<(Subscription, Subscription)> = Vec::new();
    let mut reminders = 0;

    for sub in snapshot.subscriptions {
        let now = clock.now();
        let original = sub.clone();
        let outcome = match sub.next_event.clone() {
            None => fill_next_event(sub, calendar, now).await,
            Some(event) => remind_if_due(sub, event, calendar, notifier, now).await,
        };
        match outcome {
            Ok(Step::Unchanged) => {}
            Ok(Step::Updated(sub)) => changed.push((original, sub)),
            Ok(Step::Reminded(sub)) => {
                reminders += 1;
                changed.push((original, sub));
            }
            Err((sub, e)) => warn!(
                "poll {} for {}: {e}",
                sub.calendar_name, sub.channel_id
            ),
        }
    }

    if !changed.is_empty() {
        store
            .update(move |data| {
                for (original, updated) in changed {
                    match data.subscriptions.iter_mut().find(|s| **s == original) {
                        Some(slot) => *slot = updated,
                        None => debug!(
                            "{} for {} changed during the pass, keeping the stored copy",
                            original.calendar_name, original.channel_id
                        ),
                    }
                }
            })
            .await?;
    }
    Ok(reminders)
}

enum Step {
    Unchanged,
    Updated(Subscription),
    Reminded(Subscription),
}

type StepResult = Result<Step, (Subscription, DoorbellError)>;

/// No cached event: look one up past the watermark. Never notifies.
async fn fill_next_event(
    mut sub: Subscription,
    calendar: &dyn Calendar,
    now: chrono::DateTime<chrono::Utc>,
) -> StepResult {
    let min_start = now.max(sub.last_event);
    match calendar.get_next_event(&sub.calendar_name, Some(min_start)).await {
        Ok(Some(event)) => {
            debug!("{}: cached next event {}", sub.calendar_name, event.name);
            sub.next_event = Some(event);
            Ok(Step::Updated(sub))
        }
        Ok(None) => Ok(Step::Unchanged),
        Err(e) => Err((sub, e)),
    }
}

/// Cached event: once inside the reminder window, post and advance.
async fn remind_if_due(
    mut sub: Subscription,
    event: CalendarEvent,
    calendar: &dyn Calendar,
    notifier: &dyn Channel,
    now: chrono::DateTime<chrono::Utc>,
) -> StepResult {
    if sub.remind_window_start().is_some_and(|start| now < start) {
        return Ok(Step::Unchanged);
    }

    // Look up the following event first; a failure here leaves the
    // subscription as-is so the reminder is retried on the next pass.
    let min_start = now.max(event.end);
    let following = match calendar.get_events(&sub.calendar_name, Some(min_start)).await {
        Ok(events) => events.into_iter().find(|e| *e != event),
        Err(e) => return Err((sub, e)),
    };

    let text = format!("Reminder: {}", event.summary());
    info!("reminding {} about {}", sub.channel_id, event.name);
    if let Err(e) = notifier.send(OutgoingMessage::to(&sub.channel_id, text)).await {
        warn!("failed to post reminder to {}: {e}", sub.channel_id);
    }

    sub.last_event = event.end;
    sub.next_event = following;
    Ok(Step::Reminded(sub))
}
