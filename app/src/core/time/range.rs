use std::fmt::Display;

use super::{DateTime, Time};

/// Recurring daily window `[start, end)`. An end before the start spans midnight,
/// equal start and end is a window that is never active.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyTimeRange {
    start: Time,
    end: Time,
}

impl Display for DailyTimeRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.start, self.end)
    }
}

impl DailyTimeRange {
    pub fn new(start: Time, end: Time) -> Self {
        Self { start, end }
    }

    pub fn contains(&self, time: Time) -> bool {
        if self.start <= self.end {
            //same-day scenario
            self.start <= time && time < self.end
        } else {
            //cross-day scenario
            self.start <= time || time < self.end
        }
    }

    /// Next instant strictly after `reference` at which the window opens or closes.
    pub fn next_boundary_after(&self, reference: DateTime) -> anyhow::Result<DateTime> {
        let mut candidates = vec![];

        for time in [self.start, self.end] {
            let today = reference.at(time)?;
            candidates.push(if today > reference {
                today
            } else {
                reference.on_next_day().at(time)?
            });
        }

        candidates
            .into_iter()
            .min()
            .ok_or_else(|| anyhow::anyhow!("No boundary for range {}", self))
    }
}
