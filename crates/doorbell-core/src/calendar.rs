//! Calendar event value type shared by the calendar client, store, and poller.

use chrono::{DateTime, Local, Utc};
use serde::{Deserialize, Serialize};

/// Display format for event start times, e.g. `3/07/2025 - 6:30 PM`.
pub const DATE_FORMAT: &str = "%-m/%d/%Y - %-I:%M %p";

/// A single (expanded) occurrence of a calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalendarEvent {
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl CalendarEvent {
    pub fn new(name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            start,
            end,
        }
    }

    /// `"{name} - {start}"` with the start rendered in local time.
    pub fn summary(&self) -> String {
        format!("{} - {}", self.name, format_local(&self.start))
    }
}

/// Render a timestamp in the host's local timezone using [`DATE_FORMAT`].
pub fn format_local(ts: &DateTime<Utc>) -> String {
    ts.with_timezone(&Local).format(DATE_FORMAT).to_string()
}
