//! One reconciliation pass: fetch bookings, narrow them, read every calendar,
//! match, and notify.

use std::sync::Arc;
use std::time::Instant as Stopwatch;

use tracing::{info, warn};

use crate::booking::BookingSource;
use crate::calendar::CalendarSource;
use crate::config::CalendarConfig;
use crate::error::BookingError;
use crate::filter;
use crate::matcher;
use crate::model::{MonitoredResource, Window};
use crate::notifier::{NotifyOutcome, Notifier};
use crate::observability::{
    BOOKINGS_FETCHED_TOTAL, CALENDAR_FAILURES_TOTAL, OVERLAPS_TOTAL, PASSES_TOTAL,
    PASS_DURATION_SECONDS,
};

/// Counts from one pass, for logs and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub bookings_fetched: usize,
    pub bookings_kept: usize,
    pub calendars_failed: usize,
    pub events: usize,
    pub overlaps: usize,
    pub sent: usize,
    pub suppressed: usize,
    pub already_notified: usize,
    pub failed: usize,
}

pub struct Reconciler {
    bookings: Arc<dyn BookingSource>,
    calendars: Arc<dyn CalendarSource>,
    notifier: Notifier,
    feeds: Vec<CalendarConfig>,
    monitored: Vec<MonitoredResource>,
    /// Prefix a booking id is appended to, e.g. `https://host/administration/bookings/`.
    booking_link: String,
}

impl Reconciler {
    pub fn new(
        bookings: Arc<dyn BookingSource>,
        calendars: Arc<dyn CalendarSource>,
        notifier: Notifier,
        feeds: Vec<CalendarConfig>,
        monitored: Vec<MonitoredResource>,
        booking_link: String,
    ) -> Self {
        Self {
            bookings,
            calendars,
            notifier,
            feeds,
            monitored,
            booking_link,
        }
    }

    /// Resource names the booking filter keeps, in first-seen order.
    fn watched_resources(&self) -> Vec<String> {
        let mut names: Vec<String> = Vec::new();
        for m in &self.monitored {
            if !names.contains(&m.resource) {
                names.push(m.resource.clone());
            }
        }
        names
    }

    /// Run one pass over `window`. Only a booking fetch failure aborts it;
    /// calendar and notification failures are logged and skipped.
    pub async fn run_pass(&self, window: &Window) -> Result<PassReport, BookingError> {
        let started = Stopwatch::now();
        let result = self.pass(window).await;
        metrics::histogram!(PASS_DURATION_SECONDS).record(started.elapsed().as_secs_f64());
        let label = if result.is_ok() { "ok" } else { "booking_error" };
        metrics::counter!(PASSES_TOTAL, "result" => label).increment(1);
        result
    }

    async fn pass(&self, window: &Window) -> Result<PassReport, BookingError> {
        let mut report = PassReport::default();

        let fetched = self.bookings.fetch(window).await?;
        report.bookings_fetched = fetched.len();
        metrics::counter!(BOOKINGS_FETCHED_TOTAL).increment(fetched.len() as u64);

        let confirmed = filter::by_state(fetched, filter::CONFIRMED);
        let bookings = filter::by_resource(confirmed, &self.watched_resources());
        report.bookings_kept = bookings.len();

        for feed in &self.feeds {
            let events = match self.calendars.events(feed, window).await {
                Ok(events) => events,
                Err(e) => {
                    warn!("{e}");
                    report.calendars_failed += 1;
                    metrics::counter!(CALENDAR_FAILURES_TOTAL, "calendar" => feed.name.clone())
                        .increment(1);
                    continue;
                }
            };
            report.events += events.len();

            let overlaps = matcher::find_overlaps(
                &feed.name,
                &events,
                &bookings,
                &self.monitored,
                |id| format!("{}{id}", self.booking_link),
            );
            info!(
                "calendar {}: {} events, {} overlaps",
                feed.name,
                events.len(),
                overlaps.len()
            );
            metrics::counter!(OVERLAPS_TOTAL, "calendar" => feed.name.clone())
                .increment(overlaps.len() as u64);
            report.overlaps += overlaps.len();

            for overlap in &overlaps {
                match self.notifier.notify(overlap).await {
                    Ok(NotifyOutcome::Sent { .. }) => report.sent += 1,
                    Ok(NotifyOutcome::Suppressed { .. }) => report.suppressed += 1,
                    Ok(NotifyOutcome::AlreadyNotified) => report.already_notified += 1,
                    Err(e) => {
                        warn!("notification for {} failed: {e}", overlap.event_uid);
                        report.failed += 1;
                    }
                }
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{MailAddress, MailSettings, TransportKind};
    use crate::dedup::NotifiedLog;
    use crate::error::{CalendarError, MailError};
    use crate::mail::{MailTransport, OutgoingMail};
    use crate::model::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::collections::HashSet;
    use std::sync::Mutex;

    fn at(h: u32) -> Instant {
        Utc.with_ymd_and_hms(2024, 5, 6, h, 0, 0).unwrap()
    }

    struct StaticBookings(Option<Vec<Booking>>);

    #[async_trait]
    impl BookingSource for StaticBookings {
        async fn fetch(&self, _window: &Window) -> Result<Vec<Booking>, BookingError> {
            self.0
                .clone()
                .ok_or_else(|| BookingError::Query("boom".into()))
        }
    }

    /// Calendar named "Broken" fails; any other yields one event 9-10.
    struct StaticCalendars;

    #[async_trait]
    impl CalendarSource for StaticCalendars {
        async fn events(
            &self,
            calendar: &CalendarConfig,
            _window: &Window,
        ) -> Result<Vec<CalendarEvent>, CalendarError> {
            if calendar.name == "Broken" {
                return Err(CalendarError::Status {
                    calendar: calendar.name.clone(),
                    status: 500,
                });
            }
            Ok(vec![CalendarEvent {
                summary: "Choir".into(),
                start: at(9),
                end: at(10),
                recurring: false,
                uid: format!("{}-evt", calendar.name),
                calendar: calendar.name.clone(),
            }])
        }
    }

    #[derive(Default)]
    struct MemoryLog(Mutex<HashSet<String>>);

    impl NotifiedLog for MemoryLog {
        fn has_notified(&self, uid: &str) -> bool {
            self.0.lock().unwrap().contains(uid)
        }
        fn mark_notified(&self, uid: &str) {
            self.0.lock().unwrap().insert(uid.to_string());
        }
    }

    struct NullTransport;

    #[async_trait]
    impl MailTransport for NullTransport {
        async fn send(&self, _mail: &OutgoingMail) -> Result<(), MailError> {
            Ok(())
        }
        fn name(&self) -> &'static str {
            "null"
        }
    }

    fn booking(resource: &str) -> Booking {
        Booking {
            human_number: "B-100".into(),
            id: 100,
            state: "confirmed".into(),
            reservations: vec![Reservation {
                event: Some(ReservedEvent {
                    name: "Party".into(),
                    start_at: at(9),
                    end_at: at(11),
                    resources: vec![Resource {
                        name: resource.into(),
                        kind: "Room".into(),
                    }],
                }),
            }],
        }
    }

    fn feed(name: &str) -> CalendarConfig {
        CalendarConfig {
            name: name.into(),
            url: format!("https://cal.example.org/{name}.ics"),
            resource: Some(name.into()),
        }
    }

    fn reconciler(bookings: Option<Vec<Booking>>, feeds: &[&str]) -> Reconciler {
        let settings = MailSettings {
            send_emails: true,
            subject: "Overlap".into(),
            content: "{{ Summary }}".into(),
            content_fallback: "{{ Summary }}".into(),
            mappings: vec![],
            fallback: MailAddress {
                address: "admin@example.org".into(),
                name: String::new(),
            },
            from: MailAddress {
                address: "noreply@example.org".into(),
                name: String::new(),
            },
            transport: TransportKind::Smtp,
            api_endpoint: None,
        };
        let notifier = Notifier::new(
            settings,
            chrono_tz::Tz::UTC,
            Arc::new(MemoryLog::default()),
            Arc::new(NullTransport),
        );
        let feeds: Vec<CalendarConfig> = feeds.iter().map(|n| feed(n)).collect();
        let monitored = feeds
            .iter()
            .map(|f| MonitoredResource {
                calendar: f.name.clone(),
                resource: f.name.clone(),
            })
            .collect();
        Reconciler::new(
            Arc::new(StaticBookings(bookings)),
            Arc::new(StaticCalendars),
            notifier,
            feeds,
            monitored,
            "https://book.example.org/administration/bookings/".into(),
        )
    }

    fn window() -> Window {
        Window::new(at(0), at(23))
    }

    #[tokio::test]
    async fn booking_failure_aborts_pass() {
        let r = reconciler(None, &["RoomA"]);
        assert!(matches!(r.run_pass(&window()).await, Err(BookingError::Query(_))));
    }

    #[tokio::test]
    async fn failing_calendar_does_not_stop_others() {
        let r = reconciler(Some(vec![booking("rooma")]), &["Broken", "RoomA"]);
        let report = r.run_pass(&window()).await.unwrap();
        assert_eq!(report.calendars_failed, 1);
        assert_eq!(report.events, 1);
        assert_eq!(report.overlaps, 1);
        assert_eq!(report.sent, 1);
    }

    #[tokio::test]
    async fn second_pass_is_deduplicated() {
        let r = reconciler(Some(vec![booking("RoomA")]), &["RoomA"]);
        assert_eq!(r.run_pass(&window()).await.unwrap().sent, 1);
        let again = r.run_pass(&window()).await.unwrap();
        assert_eq!(again.sent, 0);
        assert_eq!(again.already_notified, 1);
    }

    #[tokio::test]
    async fn unwatched_bookings_are_ignored() {
        let r = reconciler(Some(vec![booking("Kitchen")]), &["RoomA"]);
        let report = r.run_pass(&window()).await.unwrap();
        assert_eq!(report.bookings_fetched, 1);
        assert_eq!(report.bookings_kept, 0);
        assert_eq!(report.overlaps, 0);
    }
}
