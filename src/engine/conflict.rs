use crate::model::*;

/// Drop candidates whose `[c, c + duration)` overlaps any blocking span.
/// Order of `candidates` is preserved.
///
/// `blocking` must already be restricted to one resource and date and to
/// `pending`/`confirmed` appointments.
pub fn filter_conflicts(
    candidates: impl IntoIterator<Item = ClockTime>,
    blocking: &[Span],
    duration: Minutes,
) -> Vec<ClockTime> {
    candidates
        .into_iter()
        .filter(|c| {
            let candidate = Span::new(c.minutes(), c.minutes() + duration);
            !blocking.iter().any(|b| candidate.overlaps(b))
        })
        .collect()
}

/// Find the first blocking appointment overlapping `span`, if any.
/// The store runs this under its schedule write lock.
pub fn find_overlap<'a>(
    span: &Span,
    existing: impl IntoIterator<Item = &'a Appointment>,
) -> Option<AppointmentId> {
    existing
        .into_iter()
        .find(|a| a.status.is_blocking() && a.span().overlaps(span))
        .map(|a| a.id)
}
