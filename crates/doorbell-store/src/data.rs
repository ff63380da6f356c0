//! The persisted aggregate and its parts.

use chrono::{DateTime, Datelike, Duration, NaiveDateTime, NaiveTime, Utc};
use doorbell_core::calendar::CalendarEvent;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use thiserror::Error;

/// Schedule token meaning "do not operate this day".
pub const NOT_RUNNING: &str = "-";

/// Reasons a schedule update is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("expected 7 days, got {0}")]
    DayCount(usize),
    #[error("invalid time range '{0}'")]
    InvalidRange(String),
}

/// Operating hours for a single day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DaySchedule {
    pub start_time: NaiveTime,
    pub end_time: NaiveTime,
}

impl DaySchedule {
    pub fn new(start_time: NaiveTime, end_time: NaiveTime) -> Self {
        Self {
            start_time,
            end_time,
        }
    }

    /// Parse a 24-hour `HH:MM-HH:MM` range.
    pub fn parse(token: &str) -> Option<Self> {
        let (start, end) = token.split_once('-')?;
        Some(Self::new(parse_hhmm(start)?, parse_hhmm(end)?))
    }

    /// Inclusive on both ends.
    pub fn contains(&self, time: NaiveTime) -> bool {
        self.start_time <= time && time <= self.end_time
    }
}

impl fmt::Display for DaySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} - {}",
            self.start_time.format("%I:%M %p"),
            self.end_time.format("%I:%M %p")
        )
    }
}

/// Strict `HH:MM`, two digits each, 00:00 through 23:59.
fn parse_hhmm(s: &str) -> Option<NaiveTime> {
    let b = s.as_bytes();
    if b.len() != 5 || b[2] != b':' {
        return None;
    }
    if ![b[0], b[1], b[3], b[4]].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let hour = u32::from(b[0] - b'0') * 10 + u32::from(b[1] - b'0');
    let minute = u32::from(b[3] - b'0') * 10 + u32::from(b[4] - b'0');
    NaiveTime::from_hms_opt(hour, minute, 0)
}

/// Seven optional days, Monday first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WeeklySchedule([Option<DaySchedule>; 7]);

impl WeeklySchedule {
    pub fn new(days: [Option<DaySchedule>; 7]) -> Self {
        Self(days)
    }

    /// Parse seven tokens, each either [`NOT_RUNNING`] or `HH:MM-HH:MM`.
    /// Any malformed token rejects the whole schedule.
    pub fn parse<S: AsRef<str>>(tokens: &[S]) -> Result<Self, ScheduleError> {
        if tokens.len() != 7 {
            return Err(ScheduleError::DayCount(tokens.len()));
        }
        let mut days = [None; 7];
        for (slot, token) in days.iter_mut().zip(tokens) {
            let token = token.as_ref();
            if token == NOT_RUNNING {
                continue;
            }
            *slot = Some(
                DaySchedule::parse(token)
                    .ok_or_else(|| ScheduleError::InvalidRange(token.to_string()))?,
            );
        }
        Ok(Self(days))
    }

    pub fn days(&self) -> &[Option<DaySchedule>; 7] {
        &self.0
    }

    /// The entry for `weekday`, if the bot operates that day.
    pub fn day(&self, weekday: chrono::Weekday) -> Option<&DaySchedule> {
        self.0[weekday.num_days_from_monday() as usize].as_ref()
    }

    /// Whether `at` (local wall-clock time) falls inside that day's hours.
    pub fn is_open_at(&self, at: NaiveDateTime) -> bool {
        self.day(at.weekday())
            .is_some_and(|day| day.contains(at.time()))
    }
}

impl fmt::Display for WeeklySchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const LABELS: [&str; 7] = ["Mo", "Tu", "We", "Th", "Fr", "Sa", "Su"];
        for (i, (label, day)) in LABELS.iter().zip(&self.0).enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            match day {
                Some(day) => write!(f, "{label}: {day}")?,
                None => write!(f, "{label}: --")?,
            }
        }
        Ok(())
    }
}

/// A channel's subscription to a calendar.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Subscription {
    pub channel_id: String,
    pub calendar_name: String,
    /// How long before an event's start to post the reminder.
    #[serde(rename = "remind_secs", with = "duration_secs")]
    pub remind_time: Duration,
    /// The next event to remind about; `None` until a lookup finds one.
    pub next_event: Option<CalendarEvent>,
    /// End of the most recently notified event.
    pub last_event: DateTime<Utc>,
}

impl Subscription {
    pub fn new(
        channel_id: impl Into<String>,
        calendar_name: impl Into<String>,
        remind_time: Duration,
        next_event: Option<CalendarEvent>,
        last_event: DateTime<Utc>,
    ) -> Self {
        Self {
            channel_id: channel_id.into(),
            calendar_name: calendar_name.into(),
            remind_time,
            next_event,
            last_event,
        }
    }

    pub fn matches(&self, channel_id: &str, calendar_name: &str) -> bool {
        self.channel_id == channel_id && self.calendar_name == calendar_name
    }

    /// When the reminder for the cached event becomes due. A window reaching
    /// past the earliest representable instant saturates to it.
    pub fn remind_window_start(&self) -> Option<DateTime<Utc>> {
        self.next_event.as_ref().map(|event| {
            event
                .start
                .checked_sub_signed(self.remind_time)
                .unwrap_or(DateTime::<Utc>::MIN_UTC)
        })
    }

    pub fn remind_hours(&self) -> f64 {
        self.remind_time.num_seconds() as f64 / 3600.0
    }
}

/// Render hours without a trailing `.0` for whole numbers.
pub fn format_hours(hours: f64) -> String {
    if hours.fract() == 0.0 {
        format!("{hours:.0}")
    } else {
        format!("{hours}")
    }
}

mod duration_secs {
    use chrono::Duration;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_i64(d.num_seconds())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = i64::deserialize(d)?;
        Duration::try_seconds(secs)
            .ok_or_else(|| serde::de::Error::custom(format!("remind_secs out of range: {secs}")))
    }
}

/// The persisted aggregate root. Always read and written as one unit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Data {
    /// `None` until a schedule has been set.
    pub schedule: Option<WeeklySchedule>,
    pub subscriptions: Vec<Subscription>,
    pub roles: BTreeSet<String>,
    /// User ID → role names held.
    pub user_roles: BTreeMap<String, BTreeSet<String>>,
}

impl Data {
    // --- Subscriptions ---

    pub fn subscriptions_for_channel<'a>(
        &'a self,
        channel_id: &'a str,
    ) -> impl Iterator<Item = &'a Subscription> + 'a {
        self.subscriptions
            .iter()
            .filter(move |s| s.channel_id == channel_id)
    }

    pub fn find_subscription(&self, channel_id: &str, calendar_name: &str) -> Option<&Subscription> {
        self.subscriptions
            .iter()
            .find(|s| s.matches(channel_id, calendar_name))
    }

    /// Append `sub` unless the `(channel_id, calendar_name)` pair already exists.
    pub fn add_subscription(&mut self, sub: Subscription) -> bool {
        if self
            .find_subscription(&sub.channel_id, &sub.calendar_name)
            .is_some()
        {
            return false;
        }
        self.subscriptions.push(sub);
        true
    }

    pub fn remove_subscription(&mut self, channel_id: &str, calendar_name: &str) -> bool {
        let before = self.subscriptions.len();
        self.subscriptions
            .retain(|s| !s.matches(channel_id, calendar_name));
        self.subscriptions.len() != before
    }

    /// Listing for one channel.
    pub fn subscriptions_summary(&self, channel_id: &str) -> String {
        let mut lines: Vec<String> = self
            .subscriptions_for_channel(channel_id)
            .map(|sub| {
                let next = sub
                    .next_event
                    .as_ref()
                    .map(|e| e.name.as_str())
                    .unwrap_or("None");
                format!(
                    "{}: {} hours, next reminder is for {next}",
                    sub.calendar_name,
                    format_hours(sub.remind_hours())
                )
            })
            .collect();
        if lines.is_empty() {
            return "No subscriptions.".to_string();
        }
        lines.insert(0, "Subscriptions:".to_string());
        lines.join("\n")
    }

    /// Listing for every channel, grouped in first-subscribed order.
    pub fn all_subscriptions_summary(&self) -> String {
        if self.subscriptions.is_empty() {
            return "No subscriptions.".to_string();
        }
        let mut channels: Vec<&str> = Vec::new();
        for sub in &self.subscriptions {
            if !channels.contains(&sub.channel_id.as_str()) {
                channels.push(&sub.channel_id);
            }
        }
        let mut out = String::from("All Subscriptions:");
        for channel in channels {
            out.push_str(&format!(
                "\n<#{channel}> {}",
                self.subscriptions_summary(channel)
            ));
        }
        out
    }

    // --- Roles ---

    /// Add roles to the role set. Returns the ones that were new.
    pub fn add_roles<I, S>(&mut self, roles: I) -> Vec<String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        roles
            .into_iter()
            .map(Into::into)
            .filter(|role| self.roles.insert(role.clone()))
            .collect()
    }

    /// Remove a role and purge it from every holder.
    pub fn remove_role(&mut self, role: &str) -> bool {
        if !self.roles.remove(role) {
            return false;
        }
        for held in self.user_roles.values_mut() {
            held.remove(role);
        }
        self.user_roles.retain(|_, held| !held.is_empty());
        true
    }

    /// Replace a user's roles. Every role must already exist; on error the
    /// unknown names are returned and nothing changes.
    pub fn set_user_roles<I, S>(&mut self, user: &str, roles: I) -> Result<(), Vec<String>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let roles: BTreeSet<String> = roles.into_iter().map(Into::into).collect();
        let unknown: Vec<String> = roles
            .iter()
            .filter(|r| !self.roles.contains(*r))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(unknown);
        }
        if roles.is_empty() {
            self.user_roles.remove(user);
        } else {
            self.user_roles.insert(user.to_string(), roles);
        }
        Ok(())
    }

    pub fn roles_for_user(&self, user: &str) -> Vec<&str> {
        self.user_roles
            .get(user)
            .map(|held| held.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn holders_of(&self, role: &str) -> Vec<&str> {
        self.user_roles
            .iter()
            .filter(|(_, held)| held.contains(role))
            .map(|(user, _)| user.as_str())
            .collect()
    }
}
