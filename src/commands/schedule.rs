use super::storage_error;
use doorbell_store::{Store, WeeklySchedule};
use tracing::info;

pub(super) const NO_SCHEDULE: &str = "Schedule not created yet!";

const USAGE: &str = "Need to specify the times of each day that doorbell can run or use a `-` \
     to not run that day. It starts with Monday all the way till Sunday, e.g. \
     14:10-16:30 - - - - 12:00-13:00 -";

const INVALID_TIME: &str = "Invalid time format. Should be XX:XX-XX:XX in 24 hour time.";

pub(super) async fn show(store: &Store) -> String {
    match store.read().await {
        Ok(data) => match data.schedule {
            Some(schedule) => schedule.to_string(),
            None => NO_SCHEDULE.to_string(),
        },
        Err(e) => storage_error(e),
    }
}

/// Replace the weekly schedule. Extra tokens past Sunday are ignored.
pub(super) async fn set(store: &Store, args: &[&str]) -> String {
    if args.len() < 7 {
        return USAGE.to_string();
    }
    let Ok(schedule) = WeeklySchedule::parse(&args[..7]) else {
        return INVALID_TIME.to_string();
    };

    let stored = schedule.clone();
    match store.update(move |data| data.schedule = Some(stored)).await {
        Ok(()) => {
            info!("schedule updated: {schedule}");
            format!("Wrote schedule.\n{schedule}")
        }
        Err(e) => storage_error(e),
    }
}
