//! Narrows the fetched booking set to what the matcher should look at.

use std::collections::HashSet;

use tracing::{debug, info};

use crate::model::{Booking, same_name};

pub const CONFIRMED: &str = "confirmed";

/// Keep bookings whose state is exactly `state`.
pub fn by_state(bookings: Vec<Booking>, state: &str) -> Vec<Booking> {
    let before = bookings.len();
    let kept: Vec<Booking> = bookings.into_iter().filter(|b| b.state == state).collect();
    info!(
        "{} {state} bookings, removed {}",
        kept.len(),
        before - kept.len()
    );
    kept
}

/// Keep bookings that allocate at least one monitored resource, compared
/// without case. Each booking appears once, keyed by human number.
///
/// Matching resource names are rewritten to the monitored spelling. An empty
/// `monitored` list keeps everything untouched.
pub fn by_resource(bookings: Vec<Booking>, monitored: &[String]) -> Vec<Booking> {
    if monitored.is_empty() {
        info!("no monitored resources configured, keeping all {} bookings", bookings.len());
        return bookings;
    }

    let before = bookings.len();
    let mut seen = HashSet::new();
    let mut kept = Vec::new();

    for mut booking in bookings {
        let mut matched = false;
        for reservation in &mut booking.reservations {
            let Some(event) = reservation.event.as_mut() else {
                debug!("booking {} has a reservation without an event", booking.human_number);
                continue;
            };
            for resource in &mut event.resources {
                if let Some(name) = monitored.iter().find(|m| same_name(m, &resource.name)) {
                    resource.name.clone_from(name);
                    matched = true;
                }
            }
        }
        if matched && seen.insert(booking.human_number.clone()) {
            kept.push(booking);
        }
    }

    info!(
        "{} bookings use monitored resources, removed {}",
        kept.len(),
        before - kept.len()
    );
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::*;
    use chrono::{TimeZone, Utc};

    fn event(resources: &[&str]) -> ReservedEvent {
        ReservedEvent {
            name: "event".into(),
            start_at: Utc.with_ymd_and_hms(2024, 5, 6, 9, 0, 0).unwrap(),
            end_at: Utc.with_ymd_and_hms(2024, 5, 6, 10, 0, 0).unwrap(),
            resources: resources
                .iter()
                .map(|n| Resource {
                    name: n.to_string(),
                    kind: "Room".into(),
                })
                .collect(),
        }
    }

    fn booking(number: &str, state: &str, reservations: Vec<Option<ReservedEvent>>) -> Booking {
        Booking {
            human_number: number.into(),
            id: 1,
            state: state.into(),
            reservations: reservations.into_iter().map(|event| Reservation { event }).collect(),
        }
    }

    fn names(bookings: &[Booking]) -> Vec<&str> {
        bookings.iter().map(|b| b.human_number.as_str()).collect()
    }

    #[test]
    fn state_match_is_exact() {
        let bookings = vec![
            booking("B-1", "confirmed", vec![]),
            booking("B-2", "Confirmed", vec![]),
            booking("B-3", "cancelled", vec![]),
            booking("B-4", "confirmed", vec![]),
        ];
        assert_eq!(names(&by_state(bookings, CONFIRMED)), vec!["B-1", "B-4"]);
    }

    #[test]
    fn resource_match_ignores_case() {
        let bookings = vec![
            booking("B-1", "confirmed", vec![Some(event(&["rooma"]))]),
            booking("B-2", "confirmed", vec![Some(event(&["RoomB"]))]),
            booking("B-3", "confirmed", vec![Some(event(&["sal ö"]))]),
        ];
        let kept = by_resource(bookings, &["RoomA".to_string(), "Sal Ö".to_string()]);
        assert_eq!(names(&kept), vec!["B-1", "B-3"]);
    }

    #[test]
    fn matching_names_take_monitored_spelling() {
        let bookings = vec![booking("B-1", "confirmed", vec![Some(event(&["ROOMA", "Projector"]))])];
        let kept = by_resource(bookings, &["RoomA".to_string()]);
        let resources = &kept[0].reservations[0].event.as_ref().unwrap().resources;
        assert_eq!(resources[0].name, "RoomA");
        assert_eq!(resources[1].name, "Projector");
    }

    #[test]
    fn booking_included_once() {
        let bookings = vec![
            booking(
                "B-1",
                "confirmed",
                vec![Some(event(&["RoomA", "RoomB"])), Some(event(&["RoomA"]))],
            ),
            booking("B-1", "confirmed", vec![Some(event(&["RoomA"]))]),
        ];
        let kept = by_resource(bookings, &["RoomA".to_string(), "RoomB".to_string()]);
        assert_eq!(names(&kept), vec!["B-1"]);
    }

    #[test]
    fn reservations_without_event_are_skipped() {
        let bookings = vec![
            booking("B-1", "confirmed", vec![None]),
            booking("B-2", "confirmed", vec![None, Some(event(&["RoomA"]))]),
        ];
        let kept = by_resource(bookings, &["RoomA".to_string()]);
        assert_eq!(names(&kept), vec!["B-2"]);
    }

    #[test]
    fn empty_watch_list_fails_open() {
        let bookings = vec![
            booking("B-1", "confirmed", vec![None]),
            booking("B-2", "confirmed", vec![Some(event(&["rooma"]))]),
        ];
        let kept = by_resource(bookings.clone(), &[]);
        assert_eq!(kept, bookings);
    }

    #[test]
    fn included_iff_some_resource_matches() {
        let watch = ["RoomA".to_string(), "Hall".to_string()];
        let cases: Vec<(Vec<Option<ReservedEvent>>, bool)> = vec![
            (vec![], false),
            (vec![None], false),
            (vec![Some(event(&[]))], false),
            (vec![Some(event(&["Kitchen"]))], false),
            (vec![Some(event(&["Kitchen"])), Some(event(&["HALL"]))], true),
            (vec![Some(event(&["rOOMa"]))], true),
        ];
        for (i, (reservations, expected)) in cases.into_iter().enumerate() {
            let kept = by_resource(vec![booking("B", "confirmed", reservations)], &watch);
            assert_eq!(kept.len() == 1, expected, "case {i}");
        }
    }
}
