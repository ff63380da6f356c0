//! In-memory fakes for the collaborator traits.

use async_trait::async_trait;
use chrono::{DateTime, Local, NaiveDate, TimeZone, Utc};
use doorbell_core::{
    calendar::CalendarEvent,
    error::DoorbellError,
    message::{IncomingMessage, OutgoingMessage},
    traits::{Calendar, Channel, Chime, Clock, Delivery, Player},
};
use doorbell_store::Store;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tokio::sync::mpsc;

/// Fresh on-disk store in a temp dir. Keep the dir alive for the test.
pub async fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(dir.path().join("data.json"));
    store.create().await.unwrap();
    (dir, store)
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

/// UTC instant for a local wall-clock time.
pub fn local(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    let naive = NaiveDate::from_ymd_opt(y, mo, d)
        .unwrap()
        .and_hms_opt(h, mi, 0)
        .unwrap();
    Local
        .from_local_datetime(&naive)
        .earliest()
        .unwrap()
        .with_timezone(&Utc)
}

pub fn event(name: &str, start: DateTime<Utc>, minutes: i64) -> CalendarEvent {
    CalendarEvent::new(name, start, start + chrono::Duration::minutes(minutes))
}

pub struct FixedClock(pub Mutex<DateTime<Utc>>);

impl FixedClock {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self(Mutex::new(now))
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.0.lock().unwrap() = now;
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.0.lock().unwrap()
    }
}

/// Calendars with canned events. Named calendars can be made to fail.
#[derive(Default)]
pub struct FakeCalendar {
    events: Mutex<BTreeMap<String, Vec<CalendarEvent>>>,
    failing: Mutex<HashSet<String>>,
    pub queries: AtomicUsize,
}

impl FakeCalendar {
    pub fn with(calendars: &[(&str, Vec<CalendarEvent>)]) -> Self {
        let cal = Self::default();
        for (name, events) in calendars {
            cal.set_events(name, events.clone());
        }
        cal
    }

    pub fn set_events(&self, name: &str, events: Vec<CalendarEvent>) {
        self.events.lock().unwrap().insert(name.to_string(), events);
    }

    pub fn fail(&self, name: &str, failing: bool) {
        let mut set = self.failing.lock().unwrap();
        if failing {
            set.insert(name.to_string());
        } else {
            set.remove(name);
        }
    }
}

#[async_trait]
impl Calendar for FakeCalendar {
    async fn calendar_names(&self) -> Result<Vec<String>, DoorbellError> {
        Ok(self.events.lock().unwrap().keys().cloned().collect())
    }

    async fn get_events(
        &self,
        calendar_name: &str,
        min_start: Option<DateTime<Utc>>,
    ) -> Result<Vec<CalendarEvent>, DoorbellError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.failing.lock().unwrap().contains(calendar_name) {
            return Err(DoorbellError::Calendar("network down".into()));
        }
        let min = min_start.unwrap_or(DateTime::<Utc>::MIN_UTC);
        let mut events: Vec<CalendarEvent> = self
            .events
            .lock()
            .unwrap()
            .get(calendar_name)
            .map(|evs| evs.iter().filter(|e| e.start >= min).cloned().collect())
            .unwrap_or_default();
        events.sort_by_key(|e| e.start);
        Ok(events)
    }
}

/// Records outgoing messages; optionally feeds incoming ones.
#[derive(Default)]
pub struct RecordingChannel {
    pub sent: Mutex<Vec<OutgoingMessage>>,
    pub fail_sends: bool,
    incoming: Mutex<Option<mpsc::Receiver<IncomingMessage>>>,
    pub stopped: Mutex<bool>,
}

impl RecordingChannel {
    pub fn failing() -> Self {
        Self {
            fail_sends: true,
            ..Self::default()
        }
    }

    /// Channel whose `start` yields messages pushed into the returned sender.
    pub fn with_inbox() -> (Self, mpsc::Sender<IncomingMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let channel = Self {
            incoming: Mutex::new(Some(rx)),
            ..Self::default()
        };
        (channel, tx)
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|m| m.text.clone())
            .collect()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    fn name(&self) -> &str {
        "slack"
    }

    async fn start(&self) -> Result<mpsc::Receiver<IncomingMessage>, DoorbellError> {
        let rx = self.incoming.lock().unwrap().take();
        Ok(rx.unwrap_or_else(|| mpsc::channel(1).1))
    }

    async fn send(&self, message: OutgoingMessage) -> Result<(), DoorbellError> {
        if self.fail_sends {
            return Err(DoorbellError::Channel("send failed".into()));
        }
        self.sent.lock().unwrap().push(message);
        Ok(())
    }

    async fn stop(&self) -> Result<(), DoorbellError> {
        *self.stopped.lock().unwrap() = true;
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingChime {
    pub rings: Mutex<Vec<String>>,
}

#[async_trait]
impl Chime for RecordingChime {
    async fn ring(&self, announcement: &str) -> Result<(), DoorbellError> {
        self.rings.lock().unwrap().push(announcement.to_string());
        Ok(())
    }
}

pub struct FakePlayer {
    pub delivery: Delivery,
    pub urls: Mutex<Vec<String>>,
}

impl FakePlayer {
    pub fn new(delivery: Delivery) -> Self {
        Self {
            delivery,
            urls: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Player for FakePlayer {
    async fn enqueue(&self, url: &str) -> Delivery {
        if self.delivery == Delivery::Sent {
            self.urls.lock().unwrap().push(url.to_string());
        }
        self.delivery
    }
}

pub fn incoming(text: &str, channel_id: &str, sender: &str) -> IncomingMessage {
    IncomingMessage {
        id: uuid::Uuid::new_v4(),
        channel: "slack".into(),
        sender_id: sender.into(),
        sender_name: Some(format!("{sender} Name")),
        text: text.into(),
        timestamp: Utc::now(),
        reply_target: Some(channel_id.into()),
    }
}
