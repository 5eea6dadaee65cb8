//! In-memory snapshot of committed assignments for one run.
//!
//! The ledger is the only place the engine reads schedule state from. It
//! indexes assignments per staff member (for rule checks around a date) and
//! per slot (for coverage), and keeps the one-assignment-per-(staff, date)
//! invariant.

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::domain::{Annotation, ScheduleAssignment, ShiftCode, Violation};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LedgerError {
    #[error("{staff_id} is already assigned on {date}")]
    DoubleBooking { staff_id: String, date: NaiveDate },

    #[error("{staff_id} has no assignment on {date}")]
    NotAssigned { staff_id: String, date: NaiveDate },

    #[error("assignment of {staff_id} on {date} is fixed")]
    Fixed { staff_id: String, date: NaiveDate },
}

/// Committed assignments of one run, plus read-only history before the period.
#[derive(Debug, Clone, Default)]
pub struct AssignmentLedger {
    calendars: HashMap<String, BTreeMap<NaiveDate, ScheduleAssignment>>,
    slots: BTreeMap<(NaiveDate, ShiftCode), Vec<String>>,
    history: HashSet<(String, NaiveDate)>,
}

impl AssignmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an assignment from before the period. It takes part in rule
    /// checks but is neither counted as coverage nor emitted.
    pub fn insert_history(
        &mut self,
        staff_id: &str,
        date: NaiveDate,
        shift: ShiftCode,
    ) -> Result<(), LedgerError> {
        self.insert_entry(ScheduleAssignment {
            staff_id: staff_id.to_string(),
            date,
            shift,
            violations: Vec::new(),
            annotation: Annotation::Fixed,
        })?;
        self.history.insert((staff_id.to_string(), date));
        Ok(())
    }

    /// Commits an assignment and counts it towards its slot.
    pub fn insert(&mut self, assignment: ScheduleAssignment) -> Result<(), LedgerError> {
        let slot = (assignment.date, assignment.shift);
        let staff_id = assignment.staff_id.clone();
        self.insert_entry(assignment)?;
        self.slots.entry(slot).or_default().push(staff_id);
        Ok(())
    }

    fn insert_entry(&mut self, assignment: ScheduleAssignment) -> Result<(), LedgerError> {
        let calendar = self.calendars.entry(assignment.staff_id.clone()).or_default();
        if calendar.contains_key(&assignment.date) {
            return Err(LedgerError::DoubleBooking {
                staff_id: assignment.staff_id,
                date: assignment.date,
            });
        }
        calendar.insert(assignment.date, assignment);
        Ok(())
    }

    /// Removes a movable assignment.
    pub fn remove(&mut self, staff_id: &str, date: NaiveDate) -> Result<ScheduleAssignment, LedgerError> {
        self.check_movable(staff_id, date)?;
        let removed = self
            .calendars
            .get_mut(staff_id)
            .and_then(|calendar| calendar.remove(&date))
            .ok_or_else(|| LedgerError::NotAssigned {
                staff_id: staff_id.to_string(),
                date,
            })?;
        if let Some(occupants) = self.slots.get_mut(&(date, removed.shift)) {
            occupants.retain(|id| id != staff_id);
        }
        Ok(removed)
    }

    /// Replaces the occupant of `from`'s slot on `date` with `to`.
    ///
    /// Either both halves happen or neither does.
    pub fn swap_occupant(
        &mut self,
        from: &str,
        to: &str,
        date: NaiveDate,
        annotation: Annotation,
        violations: Vec<Violation>,
    ) -> Result<ShiftCode, LedgerError> {
        self.check_movable(from, date)?;
        if self.is_assigned(to, date) {
            return Err(LedgerError::DoubleBooking {
                staff_id: to.to_string(),
                date,
            });
        }

        let removed = self.remove(from, date)?;
        let shift = removed.shift;
        self.insert(ScheduleAssignment {
            staff_id: to.to_string(),
            date,
            shift,
            violations,
            annotation,
        })?;
        Ok(shift)
    }

    fn check_movable(&self, staff_id: &str, date: NaiveDate) -> Result<(), LedgerError> {
        match self.get(staff_id, date) {
            None => Err(LedgerError::NotAssigned {
                staff_id: staff_id.to_string(),
                date,
            }),
            Some(a) if a.annotation == Annotation::Fixed => Err(LedgerError::Fixed {
                staff_id: staff_id.to_string(),
                date,
            }),
            Some(_) => Ok(()),
        }
    }

    pub fn get(&self, staff_id: &str, date: NaiveDate) -> Option<&ScheduleAssignment> {
        self.calendars.get(staff_id)?.get(&date)
    }

    pub fn shift_on(&self, staff_id: &str, date: NaiveDate) -> Option<ShiftCode> {
        self.get(staff_id, date).map(|a| a.shift)
    }

    pub fn is_assigned(&self, staff_id: &str, date: NaiveDate) -> bool {
        self.get(staff_id, date).is_some()
    }

    pub fn is_fixed(&self, staff_id: &str, date: NaiveDate) -> bool {
        self.get(staff_id, date)
            .is_some_and(|a| a.annotation == Annotation::Fixed)
    }

    /// Assignments of one staff member within `radius` days of `date`.
    pub fn nearby(&self, staff_id: &str, date: NaiveDate, radius: i64) -> Vec<(NaiveDate, ShiftCode)> {
        let Some(calendar) = self.calendars.get(staff_id) else {
            return Vec::new();
        };
        let from = date - Duration::days(radius);
        let to = date + Duration::days(radius);
        calendar
            .range(from..=to)
            .map(|(d, a)| (*d, a.shift))
            .collect()
    }

    /// Number of staff counted on a slot.
    pub fn coverage(&self, date: NaiveDate, shift: ShiftCode) -> usize {
        self.slots.get(&(date, shift)).map_or(0, Vec::len)
    }

    pub fn occupants(&self, date: NaiveDate, shift: ShiftCode) -> &[String] {
        self.slots.get(&(date, shift)).map_or(&[], Vec::as_slice)
    }

    /// Every counted assignment, ordered by date, shift, then staff id.
    pub fn assignments(&self) -> Vec<ScheduleAssignment> {
        let mut out = Vec::with_capacity(self.len());
        for (staff_id, calendar) in &self.calendars {
            for assignment in calendar.values() {
                if !self.history.contains(&(staff_id.clone(), assignment.date)) {
                    out.push(assignment.clone());
                }
            }
        }
        out.sort_by(|a, b| {
            (a.date, a.shift, &a.staff_id).cmp(&(b.date, b.shift, &b.staff_id))
        });
        out
    }

    /// Number of counted assignments.
    pub fn len(&self) -> usize {
        self.slots.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
