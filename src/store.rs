//! Storage collaborator and per-(ward, period) run serialization.

use parking_lot::{Mutex, RwLock};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::domain::{Period, ScheduleAssignment};
use crate::error::StoreError;

/// Identifies one ward's schedule for one period.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey {
    pub ward: String,
    pub year: i32,
    /// Zero-based.
    pub month: u32,
}

impl PeriodKey {
    pub fn new(ward: impl Into<String>, period: &Period) -> Self {
        Self {
            ward: ward.into(),
            year: period.year(),
            month: period.month_index(),
        }
    }
}

impl fmt::Display for PeriodKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}-{:02}", self.ward, self.year, self.month + 1)
    }
}

/// Where committed schedules live.
pub trait ScheduleStore: Send + Sync {
    /// Clears everything stored for (ward, period) and stores `assignments`
    /// in its place. Either the whole set is stored or nothing changes.
    fn replace_period(
        &self,
        ward: &str,
        period: &Period,
        assignments: Vec<ScheduleAssignment>,
    ) -> Result<(), StoreError>;

    /// The committed set for (ward, period); empty if none.
    fn load_period(&self, ward: &str, period: &Period) -> Result<Vec<ScheduleAssignment>, StoreError>;
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    periods: RwLock<HashMap<PeriodKey, Vec<ScheduleAssignment>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ScheduleStore for InMemoryStore {
    fn replace_period(
        &self,
        ward: &str,
        period: &Period,
        assignments: Vec<ScheduleAssignment>,
    ) -> Result<(), StoreError> {
        let key = PeriodKey::new(ward, period);
        let mut seen = HashSet::with_capacity(assignments.len());
        for assignment in &assignments {
            if !period.contains(assignment.date) {
                return Err(StoreError::OutsidePeriod {
                    staff_id: assignment.staff_id.clone(),
                    date: assignment.date,
                    period: key.to_string(),
                });
            }
            if !seen.insert((assignment.staff_id.as_str(), assignment.date)) {
                return Err(StoreError::DuplicateAssignment {
                    staff_id: assignment.staff_id.clone(),
                    date: assignment.date,
                });
            }
        }

        self.periods.write().insert(key, assignments);
        Ok(())
    }

    fn load_period(&self, ward: &str, period: &Period) -> Result<Vec<ScheduleAssignment>, StoreError> {
        Ok(self
            .periods
            .read()
            .get(&PeriodKey::new(ward, period))
            .cloned()
            .unwrap_or_default())
    }
}

/// Hands out one lock per (ward, period) so runs for the same key serialize
/// while runs for different keys proceed independently.
#[derive(Debug, Default)]
pub struct RunLocks {
    locks: Mutex<HashMap<PeriodKey, Arc<Mutex<()>>>>,
}

impl RunLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lock_for(&self, key: &PeriodKey) -> Arc<Mutex<()>> {
        self.locks.lock().entry(key.clone()).or_default().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Annotation, ShiftCode};
    use chrono::NaiveDate;

    fn assignment(staff: &str, day: u32) -> ScheduleAssignment {
        ScheduleAssignment {
            staff_id: staff.to_string(),
            date: NaiveDate::from_ymd_opt(2024, 3, day).unwrap(),
            shift: ShiftCode::Day,
            violations: Vec::new(),
            annotation: Annotation::Fill,
        }
    }

    #[test]
    fn test_replace_clears_prior_assignments() {
        let store = InMemoryStore::new();
        let period = Period::month(2024, 2).unwrap();

        store
            .replace_period("icu", &period, vec![assignment("a", 1), assignment("b", 1)])
            .unwrap();
        store.replace_period("icu", &period, vec![assignment("c", 2)]).unwrap();

        let stored = store.load_period("icu", &period).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].staff_id, "c");
        assert!(store.load_period("er", &period).unwrap().is_empty());
    }

    #[test]
    fn test_rejected_commit_keeps_previous_set() {
        let store = InMemoryStore::new();
        let period = Period::month(2024, 2).unwrap();
        store.replace_period("icu", &period, vec![assignment("a", 1)]).unwrap();

        let err = store
            .replace_period("icu", &period, vec![assignment("b", 1), assignment("b", 1)])
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateAssignment { .. }));
        assert_eq!(store.load_period("icu", &period).unwrap()[0].staff_id, "a");

        let april = Period::month(2024, 3).unwrap();
        let err = store.replace_period("icu", &april, vec![assignment("a", 1)]).unwrap_err();
        assert!(matches!(err, StoreError::OutsidePeriod { .. }));
    }

    #[test]
    fn test_run_locks_are_per_key() {
        let locks = RunLocks::new();
        let period = Period::month(2024, 2).unwrap();
        let icu = PeriodKey::new("icu", &period);
        let er = PeriodKey::new("er", &period);

        let first = locks.lock_for(&icu);
        let _held = first.lock();
        assert!(locks.lock_for(&icu).try_lock().is_none());
        assert!(locks.lock_for(&er).try_lock().is_some());
        assert_eq!(icu.to_string(), "icu/2024-03");
    }
}
