//! Overlap detection between calendar events and bookings.
//!
//! Iteration order is part of the contract: reservations are scanned in
//! booking order, bookings in fetch order, events in feed order, and the first
//! hit wins at every level. Deduplication is keyed on the event UID, so which
//! booking gets reported only matters for the message contents.

use crate::model::*;

/// The reservation that made a booking collide.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReservationMatch {
    pub name: String,
    pub start: Instant,
    pub end: Instant,
}

/// First reservation of `booking` whose event overlaps `span` and allocates a
/// resource named exactly `resource`.
pub fn booking_overlap(booking: &Booking, span: &Span, resource: &str) -> Option<ReservationMatch> {
    booking
        .reservations
        .iter()
        .filter_map(|r| r.event.as_ref())
        .find(|event| event.span().overlaps(span) && event.resources.iter().any(|r| r.name == resource))
        .map(|event| ReservationMatch {
            name: event.name.clone(),
            start: event.start_at,
            end: event.end_at,
        })
}

/// First booking (in order) that collides with `event` on `resource`.
pub fn find_first_overlap<'a>(
    event: &CalendarEvent,
    bookings: &'a [Booking],
    resource: &str,
) -> Option<(&'a Booking, ReservationMatch)> {
    let span = event.span();
    bookings
        .iter()
        .find_map(|booking| booking_overlap(booking, &span, resource).map(|m| (booking, m)))
}

/// At most one overlap per event of `calendar`, in feed order.
///
/// Every monitored mapping whose calendar name matches `calendar` (ignoring
/// case) is tried in configured order; the first booking hit ends the scan for
/// that event. `booking_url` turns a booking id into a link for the message.
pub fn find_overlaps(
    calendar: &str,
    events: &[CalendarEvent],
    bookings: &[Booking],
    monitored: &[MonitoredResource],
    booking_url: impl Fn(i64) -> String,
) -> Vec<Overlap> {
    let mappings: Vec<&MonitoredResource> = monitored
        .iter()
        .filter(|m| same_name(&m.calendar, calendar))
        .collect();
    if mappings.is_empty() {
        return Vec::new();
    }

    let mut overlaps = Vec::new();
    for event in events {
        let hit = mappings.iter().find_map(|mapping| {
            find_first_overlap(event, bookings, &mapping.resource).map(|(b, m)| (*mapping, b, m))
        });
        if let Some((mapping, booking, reservation)) = hit {
            overlaps.push(Overlap {
                resource: mapping.resource.clone(),
                booking_url: booking_url(booking.id),
                booking_number: booking.human_number.clone(),
                booking_event: reservation.name,
                booking_start: reservation.start,
                booking_end: reservation.end,
                event_uid: event.uid.clone(),
                event_summary: event.summary.clone(),
                event_start: event.start,
                event_end: event.end,
                calendar: calendar.to_string(),
            });
        }
    }
    overlaps
}
