//! ICS calendar feeds: fetch, validate, and normalize events to UTC.

use std::collections::HashMap;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as TimeDelta, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use icalendar::{Calendar, CalendarDateTime, Component, DatePerhapsTime, Event, EventLike, Property};
use rrule::RRuleSet;
use tracing::{debug, warn};

use crate::config::CalendarConfig;
use crate::error::CalendarError;
use crate::model::{CalendarEvent, Instant, Window};

/// Accepted `Content-Type`, after lowercasing and dropping whitespace.
const CALENDAR_CONTENT_TYPE: &str = "text/calendar;charset=utf-8";

/// Upper bound on occurrences taken from one recurrence rule.
const MAX_OCCURRENCES: u16 = 1000;

/// Timezone ids some calendar servers emit that are not IANA names.
const WINDOWS_ZONES: &[(&str, &str)] = &[
    ("W. Europe Standard Time", "Europe/Stockholm"),
    ("Central Europe Standard Time", "Europe/Budapest"),
    ("Romance Standard Time", "Europe/Paris"),
    ("GMT Standard Time", "Europe/London"),
    ("FLE Standard Time", "Europe/Helsinki"),
    ("UTC", "UTC"),
];

#[async_trait]
pub trait CalendarSource: Send + Sync {
    /// Events of `calendar` that touch `window`, in feed order.
    async fn events(
        &self,
        calendar: &CalendarConfig,
        window: &Window,
    ) -> Result<Vec<CalendarEvent>, CalendarError>;
}

/// Reads public ICS subscription URLs.
pub struct IcsFeedClient {
    http: reqwest::Client,
    /// Zone for floating times, all-day dates and unknown TZIDs.
    tz: Tz,
}

impl IcsFeedClient {
    pub fn new(tz: Tz, timeout: Duration) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { http, tz })
    }
}

#[async_trait]
impl CalendarSource for IcsFeedClient {
    async fn events(
        &self,
        calendar: &CalendarConfig,
        window: &Window,
    ) -> Result<Vec<CalendarEvent>, CalendarError> {
        let fetch_err = |source| CalendarError::Fetch {
            calendar: calendar.name.clone(),
            source,
        };

        let response = self.http.get(&calendar.url).send().await.map_err(fetch_err)?;
        let status = response.status();
        if status != reqwest::StatusCode::OK {
            return Err(CalendarError::Status {
                calendar: calendar.name.clone(),
                status: status.as_u16(),
            });
        }

        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();
        if !is_calendar_content_type(&content_type) {
            return Err(CalendarError::ContentType {
                calendar: calendar.name.clone(),
                content_type,
            });
        }

        let body = response.text().await.map_err(fetch_err)?;
        let events = parse_events(&calendar.name, &body, window, self.tz)?;
        debug!("calendar {}: {} events in window", calendar.name, events.len());
        Ok(events)
    }
}

pub fn is_calendar_content_type(value: &str) -> bool {
    let normalized: String = value
        .chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect();
    normalized == CALENDAR_CONTENT_TYPE
}

/// Parse ICS text into events touching `window`.
///
/// VEVENTs without a UID or DTSTART are skipped. Recurring events are
/// expanded; every occurrence keeps the series UID. `EXDATE`s are left out,
/// and an occurrence with a `RECURRENCE-ID` override is replaced by it.
pub fn parse_events(
    calendar: &str,
    text: &str,
    window: &Window,
    tz: Tz,
) -> Result<Vec<CalendarEvent>, CalendarError> {
    let parsed = Calendar::from_str(text).map_err(|reason| CalendarError::Parse {
        calendar: calendar.to_string(),
        reason: reason.to_string(),
    })?;
    let vevents: Vec<&Event> = parsed.components.iter().filter_map(|c| c.as_event()).collect();

    let mut moved: HashMap<&str, Vec<Instant>> = HashMap::new();
    for event in vevents.iter().copied() {
        if let (Some(uid), Some(id)) = (event.get_uid(), event.get_recurrence_id()) {
            moved
                .entry(uid)
                .or_default()
                .push(LocalTime::from_ics(id, tz).instant());
        }
    }

    let mut events = Vec::new();
    for event in vevents {
        let Some(uid) = event.get_uid() else {
            debug!("calendar {calendar}: skipping event without UID");
            continue;
        };
        let Some(start) = event.get_start() else {
            debug!("calendar {calendar}: skipping event {uid} without DTSTART");
            continue;
        };

        let start = LocalTime::from_ics(start, tz);
        let start_at = start.instant();
        let end_at = match event.get_end() {
            Some(end) => LocalTime::from_ics(end, tz).instant(),
            None if start.all_day => start_at + TimeDelta::days(1),
            None => start_at,
        };
        let length = (end_at - start_at).max(TimeDelta::zero());
        let summary = event.get_summary().unwrap_or_default().to_string();

        let make = |start: Instant, recurring: bool| CalendarEvent {
            summary: summary.clone(),
            start,
            end: start + length,
            recurring,
            uid: uid.to_string(),
            calendar: calendar.to_string(),
        };

        let is_override = event.get_recurrence_id().is_some();
        match event.property_value("RRULE").filter(|_| !is_override) {
            Some(rule) => {
                let mut skipped = exdates(event, tz);
                skipped.extend(moved.get(uid).into_iter().flatten());
                match occurrences(&start, rule, length, &skipped, window) {
                    Ok(starts) => events.extend(starts.into_iter().map(|s| make(s, true))),
                    Err(reason) => {
                        warn!("calendar {calendar}: cannot expand {uid}: {reason}");
                        let single = make(start_at, true);
                        if touches(&single, window) {
                            events.push(single);
                        }
                    }
                }
            }
            None => {
                let single = make(start_at, is_override);
                if touches(&single, window) {
                    events.push(single);
                }
            }
        }
    }
    Ok(events)
}

/// Every `EXDATE` of `event`. One line may list several comma-separated
/// values sharing its parameters.
fn exdates(event: &Event, tz: Tz) -> Vec<Instant> {
    let lines = event
        .multi_properties()
        .get("EXDATE")
        .into_iter()
        .flatten()
        .chain(event.properties().get("EXDATE"));

    let mut out = Vec::new();
    for line in lines {
        for value in line.value().split(',').map(str::trim).filter(|v| !v.is_empty()) {
            let mut single = Property::new("EXDATE", value);
            for param in line.params().values() {
                single.append_parameter(param.clone());
            }
            match DatePerhapsTime::from_property(&single) {
                Some(date) => out.push(LocalTime::from_ics(date, tz).instant()),
                None => warn!("ignoring unreadable EXDATE {value:?}"),
            }
        }
    }
    out
}

/// Zero-length events count when they sit inside the window.
fn touches(event: &CalendarEvent, window: &Window) -> bool {
    if event.start == event.end {
        event.start >= window.start && event.start <= window.end
    } else {
        event.start <= window.end && event.end > window.start
    }
}

/// A wall-clock time with the zone it should be read in.
struct LocalTime {
    naive: NaiveDateTime,
    tz: Tz,
    all_day: bool,
}

impl LocalTime {
    fn from_ics(value: DatePerhapsTime, fallback: Tz) -> Self {
        match value {
            DatePerhapsTime::Date(date) => Self::midnight(date, fallback),
            DatePerhapsTime::DateTime(CalendarDateTime::Utc(dt)) => Self {
                naive: dt.naive_utc(),
                tz: Tz::UTC,
                all_day: false,
            },
            DatePerhapsTime::DateTime(CalendarDateTime::Floating(naive)) => Self {
                naive,
                tz: fallback,
                all_day: false,
            },
            DatePerhapsTime::DateTime(CalendarDateTime::WithTimezone { date_time, tzid }) => {
                let tz = resolve_tzid(&tzid).unwrap_or_else(|| {
                    warn!("unknown TZID {tzid:?}, reading as {}", fallback.name());
                    fallback
                });
                Self {
                    naive: date_time,
                    tz,
                    all_day: false,
                }
            }
        }
    }

    fn midnight(date: NaiveDate, tz: Tz) -> Self {
        Self {
            naive: date.and_time(chrono::NaiveTime::MIN),
            tz,
            all_day: true,
        }
    }

    fn instant(&self) -> Instant {
        localize(self.tz, self.naive)
    }
}

/// Local time to UTC. Ambiguous times take the earlier instant; times in a
/// DST gap are read one hour later.
fn localize(tz: Tz, naive: NaiveDateTime) -> Instant {
    tz.from_local_datetime(&naive)
        .earliest()
        .or_else(|| tz.from_local_datetime(&(naive + TimeDelta::hours(1))).earliest())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
}

pub fn resolve_tzid(tzid: &str) -> Option<Tz> {
    let tzid = tzid.trim().trim_matches('"');
    if let Ok(tz) = tzid.parse::<Tz>() {
        return Some(tz);
    }
    WINDOWS_ZONES
        .iter()
        .find(|(windows, _)| windows.eq_ignore_ascii_case(tzid))
        .and_then(|(_, iana)| iana.parse::<Tz>().ok())
}

/// Occurrence starts of `rule` whose span reaches into `window`, minus
/// those listed in `skipped`.
fn occurrences(
    start: &LocalTime,
    rule: &str,
    length: TimeDelta,
    skipped: &[Instant],
    window: &Window,
) -> Result<Vec<Instant>, String> {
    let source = format!(
        "DTSTART;TZID={}:{}\nRRULE:{}",
        start.tz.name(),
        start.naive.format("%Y%m%dT%H%M%S"),
        rule.trim()
    );
    let mut set: RRuleSet = source.parse().map_err(|e: rrule::RRuleError| e.to_string())?;
    for at in skipped {
        set = set.exdate(at.with_timezone(&rrule::Tz::UTC));
    }

    let from = (window.start - length).with_timezone(&rrule::Tz::UTC);
    let until = window.end.with_timezone(&rrule::Tz::UTC);
    let result = set.after(from).before(until).all(MAX_OCCURRENCES);
    if result.limited {
        warn!("recurrence {rule:?} truncated at {MAX_OCCURRENCES} occurrences");
    }

    Ok(result
        .dates
        .into_iter()
        .map(|dt| dt.with_timezone(&Utc))
        .filter(|s| {
            let end = *s + length;
            if length == TimeDelta::zero() {
                *s >= window.start && *s <= window.end
            } else {
                *s <= window.end && end > window.start
            }
        })
        .collect())
}
