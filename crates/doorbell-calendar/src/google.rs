//! Google Calendar v3 REST client.
//!
//! Authenticates with an OAuth refresh token and keeps the access token and
//! the calendar name → id map cached in memory.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use doorbell_core::{
    calendar::CalendarEvent, config::CalendarConfig, error::DoorbellError, traits::Calendar,
};
use reqwest::Url;
use serde::Deserialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

const API_BASE: &str = "https://www.googleapis.com/calendar/v3";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Google Calendar client.
pub struct GoogleCalendar {
    client: reqwest::Client,
    api_base: String,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    max_retries: u32,
    access_token: RwLock<Option<String>>,
    /// Calendar display name → calendar id.
    calendars: RwLock<HashMap<String, String>>,
}

impl GoogleCalendar {
    pub fn from_config(config: &CalendarConfig) -> Self {
        Self::with_endpoints(config, API_BASE, TOKEN_URL)
    }

    /// Point the client at alternate endpoints.
    pub fn with_endpoints(config: &CalendarConfig, api_base: &str, token_url: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_base: api_base.trim_end_matches('/').to_string(),
            token_url: token_url.to_string(),
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            refresh_token: config.refresh_token.clone(),
            max_retries: config.max_retries,
            access_token: RwLock::new(None),
            calendars: RwLock::new(HashMap::new()),
        }
    }

    /// Exchange the refresh token for a fresh access token. A rejected
    /// refresh clears the cached token and yields `None`.
    async fn refresh_access_token(&self) -> Result<Option<String>, DoorbellError> {
        debug!("google: refreshing access token");
        let resp = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| DoorbellError::Calendar(format!("token request failed: {e}")))?;

        let parsed: TokenResponse = resp
            .json()
            .await
            .map_err(|e| DoorbellError::Calendar(format!("failed to parse token response: {e}")))?;

        *self.access_token.write().await = parsed.access_token.clone();
        if parsed.access_token.is_none() {
            warn!(
                "google: token refresh rejected: {}",
                parsed.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(parsed.access_token)
    }

    async fn current_token(&self) -> Result<Option<String>, DoorbellError> {
        if let Some(token) = self.access_token.read().await.clone() {
            return Ok(Some(token));
        }
        self.refresh_access_token().await
    }

    /// GET `url` as JSON. A body carrying an `error` object is treated as an
    /// expired token: refresh and retry up to `max_retries` times. An attempt
    /// without a token (refresh rejected) counts as failed. Returns `None`
    /// once retries are exhausted.
    async fn get_json(&self, url: Url) -> Result<Option<serde_json::Value>, DoorbellError> {
        let mut token = self.current_token().await?;
        for attempt in 0..=self.max_retries {
            if let Some(bearer) = &token {
                let resp = self
                    .client
                    .get(url.clone())
                    .bearer_auth(bearer)
                    .send()
                    .await
                    .map_err(|e| DoorbellError::Calendar(format!("request failed: {e}")))?;

                let body: serde_json::Value = resp.json().await.map_err(|e| {
                    DoorbellError::Calendar(format!("failed to parse response: {e}"))
                })?;

                match body.get("error") {
                    None => return Ok(Some(body)),
                    Some(err) => debug!("google: api error on attempt {}: {err}", attempt + 1),
                }
            }
            if attempt < self.max_retries {
                token = self.refresh_access_token().await?;
            }
        }
        warn!(
            "google: giving up on {} after {} retries",
            url.path(),
            self.max_retries
        );
        Ok(None)
    }

    /// Build `{api_base}/{segments...}` with each segment percent-encoded.
    fn api_url(&self, segments: &[&str]) -> Result<Url, DoorbellError> {
        let mut url = Url::parse(&self.api_base)
            .map_err(|e| DoorbellError::Calendar(format!("invalid api base: {e}")))?;
        url.path_segments_mut()
            .map_err(|_| DoorbellError::Calendar("api base cannot be a base url".to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Reload the calendar name → id map.
    async fn refresh_calendars(&self) -> Result<(), DoorbellError> {
        let url = self.api_url(&["users", "me", "calendarList"])?;
        let Some(body) = self.get_json(url).await? else {
            return Ok(());
        };
        let list: CalendarList = serde_json::from_value(body)?;
        let map: HashMap<String, String> = list
            .items
            .into_iter()
            .filter_map(|c| Some((c.summary?, c.id)))
            .collect();
        info!("google: {} calendars available", map.len());
        *self.calendars.write().await = map;
        Ok(())
    }

    /// Calendar id for `name`, reloading the cache once on a miss.
    async fn calendar_id(&self, name: &str) -> Result<Option<String>, DoorbellError> {
        if let Some(id) = self.calendars.read().await.get(name) {
            return Ok(Some(id.clone()));
        }
        self.refresh_calendars().await?;
        Ok(self.calendars.read().await.get(name).cloned())
    }
}

#[async_trait]
impl Calendar for GoogleCalendar {
    async fn calendar_names(&self) -> Result<Vec<String>, DoorbellError> {
        if self.calendars.read().await.is_empty() {
            self.refresh_calendars().await?;
        }
        let mut names: Vec<String> = self.calendars.read().await.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    async fn get_events(
        &self,
        calendar_name: &str,
        min_start: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, DoorbellError> {
        let Some(id) = self.calendar_id(calendar_name).await? else {
            return Ok(Vec::new());
        };
        let min_start = min_start.unwrap_or_else(Utc::now);

        let mut url = self.api_url(&["calendars", &id, "events"])?;
        url.query_pairs_mut()
            .append_pair("orderBy", "startTime")
            .append_pair("singleEvents", "true")
            .append_pair("timeMin", &min_start.to_rfc3339());

        let Some(body) = self.get_json(url).await? else {
            return Ok(Vec::new());
        };
        let list: EventList = serde_json::from_value(body)?;
        Ok(events_from_list(list, min_start))
    }
}

// --- API response types ---

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

#[derive(Deserialize)]
struct CalendarList {
    #[serde(default)]
    items: Vec<CalendarListEntry>,
}

#[derive(Deserialize)]
struct CalendarListEntry {
    id: String,
    summary: Option<String>,
}

#[derive(Deserialize)]
struct EventList {
    #[serde(default)]
    items: Vec<EventItem>,
}

#[derive(Deserialize)]
struct EventItem {
    summary: Option<String>,
    start: Option<EventTime>,
    end: Option<EventTime>,
}

#[derive(Deserialize)]
struct EventTime {
    #[serde(rename = "dateTime")]
    date_time: Option<String>,
    date: Option<String>,
}

impl EventTime {
    /// `dateTime` is RFC 3339; all-day `date` is local midnight.
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        if let Some(dt) = &self.date_time {
            return DateTime::parse_from_rfc3339(dt)
                .ok()
                .map(|t| t.with_timezone(&Utc));
        }
        let day = NaiveDate::parse_from_str(self.date.as_deref()?, "%Y-%m-%d").ok()?;
        Local
            .from_local_datetime(&day.and_hms_opt(0, 0, 0)?)
            .earliest()
            .map(|t| t.with_timezone(&Utc))
    }
}

/// Keep events starting at or after `min_start`, ascending by start.
/// The API's `timeMin` bounds end times, so in-progress events are dropped here.
fn events_from_list(list: EventList, min_start: DateTime<Utc>) -> Vec<CalendarEvent> {
    let mut events: Vec<CalendarEvent> = list
        .items
        .into_iter()
        .filter_map(|item| {
            let start = item.start.as_ref()?.to_utc()?;
            let end = item.end.as_ref()?.to_utc()?;
            let name = item.summary.unwrap_or_else(|| "(untitled)".to_string());
            Some(CalendarEvent::new(name, start, end))
        })
        .filter(|e| e.start >= min_start)
        .collect();
    events.sort_by_key(|e| e.start);
    events
}

#[cfg(test)]
mod tests;
