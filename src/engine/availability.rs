use chrono::Weekday;

use crate::model::*;

// ── Availability Model ────────────────────────────────────────────

/// Opening hours used when a resource has no weekly availability at all:
/// Monday–Saturday 09:00–18:00, Sunday closed.
pub fn default_hours(weekday: Weekday) -> Option<Span> {
    match weekday {
        Weekday::Sun => None,
        _ => Some(Span::new(9 * 60, 18 * 60)),
    }
}

/// Resolve the open window `[start, end)` of a resource on `date`, or `None`
/// when it is closed.
///
/// Fallback is all-or-nothing: the default schedule applies only when the
/// weekly map is unset or empty. A configured map with no usable entry for
/// the weekday means closed.
pub fn resolve_window(resource: &Resource, date: CalendarDate) -> Option<Span> {
    let weekday = date.weekday();
    let weekly = match &resource.availability {
        Some(weekly) if !weekly.is_empty() => weekly,
        _ => return default_hours(weekday),
    };

    let hours = weekly.day(weekday)?;
    if !hours.open {
        return None;
    }
    let (start, end) = (hours.start?, hours.end?);
    // An inverted or zero-length day cannot hold a slot.
    (start < end).then(|| Span::new(start.minutes(), end.minutes()))
}
