use super::schedule::NO_SCHEDULE;
use super::{storage_error, CommandContext};
use chrono::Local;
use tracing::{info, warn};

const DECLINE: &str =
    "Sorry, currently Doorbell isn't supposed to run. Check the schedule? @Doorbell schedule";

/// Ring the bell if the current local time is inside today's hours.
pub(super) async fn ring(ctx: &CommandContext<'_>, code: Option<&str>) -> String {
    let data = match ctx.store.read().await {
        Ok(d) => d,
        Err(e) => return storage_error(e),
    };
    let Some(schedule) = data.schedule else {
        return NO_SCHEDULE.to_string();
    };

    let now = ctx.clock.now().with_timezone(&Local).naive_local();
    if !schedule.is_open_at(now) {
        return DECLINE.to_string();
    }

    let code = door_code(code);
    let announcement = format!("{} is at the door {code}", ctx.sender_name);
    info!("ringing for {} (code: {code:?})", ctx.sender_name);
    if let Err(e) = ctx.chime.ring(announcement.trim_end()).await {
        warn!("chime failed: {e}");
    }
    format!("Ding! ({})", ctx.sender_name)
}

/// Two digits and a lowercase letter, e.g. `12a`. Anything else is dropped.
pub(super) fn door_code(raw: Option<&str>) -> String {
    let Some(code) = raw.map(str::to_lowercase) else {
        return String::new();
    };
    let b = code.as_bytes();
    let valid = b.len() == 3
        && b[0].is_ascii_digit()
        && b[1].is_ascii_digit()
        && b[2].is_ascii_lowercase();
    if valid {
        code
    } else {
        String::new()
    }
}
