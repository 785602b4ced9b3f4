use crate::model::*;

/// Candidate start times inside a window, spaced `granularity` minutes
/// apart from `window.start`, while the start is before `window.end`.
///
/// Cheap to clone; every `iter()` starts over from the first slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SlotGenerator {
    window: Span,
    granularity: Minutes,
    /// When set, drop candidates whose service of this length would run
    /// past `window.end`. Off by default: late starts are offered.
    fit_duration: Option<Minutes>,
}

impl SlotGenerator {
    pub fn new(window: Span, granularity: Minutes) -> Self {
        assert!(granularity > 0, "slot granularity must be positive");
        Self { window, granularity, fit_duration: None }
    }

    pub fn fit_within_window(mut self, duration: Minutes) -> Self {
        self.fit_duration = Some(duration);
        self
    }

    pub fn iter(&self) -> Slots {
        Slots { next: self.window.start, generator: *self }
    }
}

impl IntoIterator for &SlotGenerator {
    type Item = ClockTime;
    type IntoIter = Slots;

    fn into_iter(self) -> Slots {
        self.iter()
    }
}

#[derive(Debug, Clone)]
pub struct Slots {
    next: Minutes,
    generator: SlotGenerator,
}

impl Iterator for Slots {
    type Item = ClockTime;

    fn next(&mut self) -> Option<ClockTime> {
        let g = &self.generator;
        let start = self.next;
        if start >= g.window.end {
            return None;
        }
        if let Some(duration) = g.fit_duration
            && start + duration > g.window.end
        {
            return None;
        }
        self.next = start + g.granularity;
        ClockTime::from_minutes(start)
    }
}
