use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Utc};
use serde::Serialize;

/// UTC instant. The only time type past the adapters.
pub type Instant = DateTime<Utc>;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Span {
    pub start: Instant,
    pub end: Instant,
}

impl Span {
    pub fn new(start: Instant, end: Instant) -> Self {
        Self { start, end }
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// The date range a pass looks at.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: Instant,
    pub end: Instant,
}

impl Window {
    pub fn new(start: Instant, end: Instant) -> Self {
        Self { start, end }
    }

    /// From one day before `now` until the last second of `now`'s month,
    /// with the month boundary taken in `now`'s timezone.
    pub fn month_from<Tz: TimeZone>(now: &DateTime<Tz>) -> Self {
        let tz = now.timezone();
        let start = now.with_timezone(&Utc) - Duration::days(1);

        let (year, month) = if now.month() == 12 {
            (now.year() + 1, 1)
        } else {
            (now.year(), now.month() + 1)
        };
        let next_month = NaiveDate::from_ymd_opt(year, month, 1)
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(|naive| {
                tz.from_local_datetime(&naive)
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
                    .unwrap_or_else(|| Utc.from_utc_datetime(&naive))
            });
        let end = match next_month {
            Some(first) => first - Duration::seconds(1),
            None => start + Duration::days(31),
        };

        Self { start, end }
    }

    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Case-insensitive name comparison used for resources and calendars.
pub fn same_name(a: &str, b: &str) -> bool {
    a == b || a.to_lowercase() == b.to_lowercase()
}

// ── Booking platform ─────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Booking {
    pub human_number: String,
    pub id: i64,
    pub state: String,
    pub reservations: Vec<Reservation>,
}

/// A reservation only matters when it links to an event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reservation {
    pub event: Option<ReservedEvent>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservedEvent {
    pub name: String,
    pub start_at: Instant,
    pub end_at: Instant,
    pub resources: Vec<Resource>,
}

impl ReservedEvent {
    pub fn span(&self) -> Span {
        Span::new(self.start_at, self.end_at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resource {
    pub name: String,
    pub kind: String,
}

// ── Calendars ────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalendarEvent {
    pub summary: String,
    pub start: Instant,
    pub end: Instant,
    pub recurring: bool,
    pub uid: String,
    /// Name of the configured calendar the event came from.
    pub calendar: String,
}

impl CalendarEvent {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.end)
    }
}

/// Links a watched calendar to the booking-platform resource it mirrors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitoredResource {
    pub calendar: String,
    pub resource: String,
}

/// One detected collision between a calendar event and a booking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlap {
    pub resource: String,
    pub booking_url: String,
    pub booking_number: String,
    pub booking_event: String,
    pub booking_start: Instant,
    pub booking_end: Instant,
    pub event_uid: String,
    pub event_summary: String,
    pub event_start: Instant,
    pub event_end: Instant,
    pub calendar: String,
}
