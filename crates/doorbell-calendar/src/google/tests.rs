use super::*;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

const CALENDAR_LIST: &str = r#"{
    "items": [
        {"id": "build@group.calendar.google.com", "summary": "Build"},
        {"id": "outreach@group.calendar.google.com", "summary": "Outreach"},
        {"id": "no-summary"}
    ]
}"#;

const EVENTS: &str = r#"{
    "items": [
        {"summary": "Competition", "start": {"date": "2030-01-05"}, "end": {"date": "2030-01-06"}},
        {"summary": "Kickoff", "start": {"dateTime": "2030-01-02T10:00:00Z"}, "end": {"dateTime": "2030-01-02T12:00:00Z"}},
        {"summary": "Overnight", "start": {"dateTime": "2029-12-31T23:00:00Z"}, "end": {"dateTime": "2030-01-01T01:00:00Z"}},
        {"start": {"dateTime": "2030-01-03T08:00:00-05:00"}, "end": {"dateTime": "2030-01-03T09:00:00-05:00"}}
    ]
}"#;

const API_ERROR: &str = r#"{"error": {"code": 401, "message": "Invalid Credentials"}}"#;

fn min_start() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2030, 1, 1, 0, 0, 0).unwrap()
}

/// Minimal HTTP/1.1 server that answers every request with the JSON body
/// returned by `handler(path)`.
async fn serve<F>(handler: F) -> String
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let handler = Arc::new(handler);
    tokio::spawn(async move {
        loop {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            let handler = handler.clone();
            tokio::spawn(async move {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 4096];
                let header_end = loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        return;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                    if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                        break pos + 4;
                    }
                };
                let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
                let content_length = head
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())?
                    })
                    .unwrap_or(0);
                while buf.len() < header_end + content_length {
                    let n = socket.read(&mut chunk).await.unwrap();
                    if n == 0 {
                        break;
                    }
                    buf.extend_from_slice(&chunk[..n]);
                }
                let path = head
                    .lines()
                    .next()
                    .and_then(|l| l.split_whitespace().nth(1))
                    .unwrap_or("/")
                    .to_string();
                let body = handler(&path);
                let resp = format!(
                    "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                socket.write_all(resp.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            });
        }
    });
    format!("http://{addr}")
}

fn client(base: &str, max_retries: u32) -> GoogleCalendar {
    let config = CalendarConfig {
        client_id: "id".into(),
        client_secret: "secret".into(),
        refresh_token: "refresh".into(),
        max_retries,
    };
    GoogleCalendar::with_endpoints(
        &config,
        &format!("{base}/calendar/v3"),
        &format!("{base}/token"),
    )
}

#[derive(Default)]
struct Counters {
    token: AtomicUsize,
    list: AtomicUsize,
    events: AtomicUsize,
}

/// Server whose events endpoint fails `event_failures` times before succeeding.
async fn google(event_failures: usize) -> (String, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let c = counters.clone();
    let base = serve(move |path| {
        if path.starts_with("/token") {
            let n = c.token.fetch_add(1, Ordering::SeqCst);
            format!(r#"{{"access_token": "token-{n}", "expires_in": 3600}}"#)
        } else if path.contains("/calendarList") {
            c.list.fetch_add(1, Ordering::SeqCst);
            CALENDAR_LIST.to_string()
        } else if path.contains("/events") {
            let n = c.events.fetch_add(1, Ordering::SeqCst);
            if n < event_failures {
                API_ERROR.to_string()
            } else {
                EVENTS.to_string()
            }
        } else {
            API_ERROR.to_string()
        }
    })
    .await;
    (base, counters)
}

#[tokio::test]
async fn test_calendar_names_sorted_and_cached() {
    let (base, counters) = google(0).await;
    let cal = client(&base, 3);
    assert_eq!(cal.calendar_names().await.unwrap(), vec!["Build", "Outreach"]);
    assert_eq!(cal.calendar_names().await.unwrap(), vec!["Build", "Outreach"]);
    assert_eq!(counters.list.load(Ordering::SeqCst), 1);
    assert_eq!(counters.token.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_events_filters_and_sorts() {
    let (base, _) = google(0).await;
    let cal = client(&base, 3);
    let events = cal.get_events("Build", Some(min_start())).await.unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["Kickoff", "(untitled)", "Competition"]);
    assert_eq!(
        events[0].start,
        Utc.with_ymd_and_hms(2030, 1, 2, 10, 0, 0).unwrap()
    );
    assert_eq!(
        events[1].start,
        Utc.with_ymd_and_hms(2030, 1, 3, 13, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_get_next_event_returns_first() {
    let (base, _) = google(0).await;
    let cal = client(&base, 3);
    let next = cal
        .get_next_event("Build", Some(min_start()))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(next.name, "Kickoff");
}

#[tokio::test]
async fn test_unknown_calendar_is_empty_and_reloads_cache() {
    let (base, counters) = google(0).await;
    let cal = client(&base, 3);
    assert!(cal.get_events("Nope", None).await.unwrap().is_empty());
    assert!(cal.get_events("Nope", None).await.unwrap().is_empty());
    assert_eq!(counters.list.load(Ordering::SeqCst), 2);
    assert_eq!(counters.events.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_api_error_refreshes_token_and_retries() {
    let (base, counters) = google(2).await;
    let cal = client(&base, 3);
    let events = cal.get_events("Build", Some(min_start())).await.unwrap();
    assert_eq!(events.len(), 3);
    assert_eq!(counters.events.load(Ordering::SeqCst), 3);
    // Initial token plus one refresh per failed attempt.
    assert_eq!(counters.token.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_exhausted_retries_yield_empty() {
    let (base, counters) = google(usize::MAX).await;
    let cal = client(&base, 2);
    let events = cal.get_events("Build", Some(min_start())).await.unwrap();
    assert!(events.is_empty());
    assert_eq!(counters.events.load(Ordering::SeqCst), 3);
}

/// Server whose token endpoint rejects the first `rejections` refreshes.
async fn google_rejecting_refresh(rejections: usize) -> (String, Arc<Counters>) {
    let counters = Arc::new(Counters::default());
    let c = counters.clone();
    let base = serve(move |path| {
        if path.starts_with("/token") {
            let n = c.token.fetch_add(1, Ordering::SeqCst);
            if n < rejections {
                r#"{"error": "invalid_grant", "error_description": "Token has been expired or revoked."}"#
                    .to_string()
            } else {
                format!(r#"{{"access_token": "token-{n}", "expires_in": 3600}}"#)
            }
        } else if path.contains("/calendarList") {
            c.list.fetch_add(1, Ordering::SeqCst);
            CALENDAR_LIST.to_string()
        } else if path.contains("/events") {
            c.events.fetch_add(1, Ordering::SeqCst);
            EVENTS.to_string()
        } else {
            API_ERROR.to_string()
        }
    })
    .await;
    (base, counters)
}

#[tokio::test]
async fn test_rejected_refresh_yields_empty_not_error() {
    let (base, counters) = google_rejecting_refresh(usize::MAX).await;
    let cal = client(&base, 2);
    assert!(cal.calendar_names().await.unwrap().is_empty());
    assert!(cal.get_events("Build", Some(min_start())).await.unwrap().is_empty());
    assert!(cal
        .get_next_event("Build", Some(min_start()))
        .await
        .unwrap()
        .is_none());
    // No request goes out without a token.
    assert_eq!(counters.list.load(Ordering::SeqCst), 0);
    assert_eq!(counters.events.load(Ordering::SeqCst), 0);
    // Initial refresh plus one per attempt that had to be retried.
    assert_eq!(counters.token.load(Ordering::SeqCst), 9);
}

#[tokio::test]
async fn test_rejected_refresh_is_retried() {
    let (base, counters) = google_rejecting_refresh(1).await;
    let cal = client(&base, 2);
    assert_eq!(cal.calendar_names().await.unwrap(), vec!["Build", "Outreach"]);
    assert_eq!(counters.token.load(Ordering::SeqCst), 2);
    assert_eq!(counters.list.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_transport_failure_is_calendar_error() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let cal = client(&format!("http://{addr}"), 3);
    let err = cal.get_events("Build", None).await.unwrap_err();
    assert!(matches!(err, DoorbellError::Calendar(_)));
}

#[test]
fn test_all_day_event_is_local_midnight() {
    let t = EventTime {
        date_time: None,
        date: Some("2030-06-15".into()),
    };
    let local = t.to_utc().unwrap().with_timezone(&Local);
    assert_eq!(local.date_naive(), NaiveDate::from_ymd_opt(2030, 6, 15).unwrap());
    assert_eq!(local.time(), chrono::NaiveTime::MIN);
}

#[test]
fn test_event_time_rejects_garbage() {
    let t = EventTime {
        date_time: Some("yesterday".into()),
        date: None,
    };
    assert!(t.to_utc().is_none());
    let empty = EventTime {
        date_time: None,
        date: None,
    };
    assert!(empty.to_utc().is_none());
}

#[test]
fn test_api_url_encodes_calendar_id() {
    let cal = GoogleCalendar::from_config(&CalendarConfig::default());
    let url = cal
        .api_url(&["calendars", "team/ops#1", "events"])
        .unwrap();
    assert_eq!(
        url.as_str(),
        "https://www.googleapis.com/calendar/v3/calendars/team%2Fops%231/events"
    );
}
