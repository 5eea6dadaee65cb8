//! Shift timing and the adjacent-day interval pre-filter.
//!
//! An assignment on date `d` occupies `[d + start, d + start + duration)`,
//! so an overnight shift ends on `d + 1`. Every gap in the crate is measured
//! on these absolute windows.

use chrono::{Duration, NaiveDate, NaiveDateTime};

use crate::domain::{ShiftCatalog, ShiftCode, ShiftType};
use crate::ledger::AssignmentLedger;

/// Absolute start and end of one assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftWindow {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl ShiftWindow {
    pub fn of(date: NaiveDate, shift: &ShiftType) -> Self {
        let start = date.and_time(shift.start);
        Self {
            start,
            end: start + shift.duration(),
        }
    }

    /// Rest between this window and `other`, whichever comes first.
    /// Overlapping windows give a negative gap.
    pub fn gap_to(&self, other: &ShiftWindow) -> Duration {
        if self.start <= other.start {
            other.start - self.end
        } else {
            self.start - other.end
        }
    }
}

/// Formats a duration as `11h 30m` for violation details.
pub fn format_hours(gap: Duration) -> String {
    let minutes = gap.num_minutes();
    let sign = if minutes < 0 { "-" } else { "" };
    let minutes = minutes.abs();
    format!("{}{}h {:02}m", sign, minutes / 60, minutes % 60)
}

/// Adjacent-day guard run before the full rule set.
///
/// A candidate passes when its start is at least `min_spacing` after the
/// start of the staff member's previous-day shift and at least `min_spacing`
/// before the start of their next-day shift. A same-day assignment always
/// fails.
#[derive(Debug, Clone)]
pub struct IntervalChecker {
    catalog: ShiftCatalog,
    min_spacing: Duration,
}

impl IntervalChecker {
    pub fn new(catalog: ShiftCatalog, min_spacing_hours: i64) -> Self {
        Self {
            catalog,
            min_spacing: Duration::hours(min_spacing_hours),
        }
    }

    pub fn is_clear(
        &self,
        staff_id: &str,
        date: NaiveDate,
        code: ShiftCode,
        ledger: &AssignmentLedger,
    ) -> bool {
        let Some(candidate) = self.catalog.get(code) else {
            return false;
        };
        let start = ShiftWindow::of(date, candidate).start;

        for (other_date, other_code) in ledger.nearby(staff_id, date, 1) {
            if other_date == date {
                return false;
            }
            let Some(other) = self.catalog.get(other_code) else {
                continue;
            };
            let other_start = ShiftWindow::of(other_date, other).start;
            let spacing = if other_date < date {
                start - other_start
            } else {
                other_start - start
            };
            if spacing < self.min_spacing {
                return false;
            }
        }
        true
    }
}
