//! Labor-rule validation of a single (staff, date, shift) proposal.
//!
//! Five rules run in a fixed order, each yielding at most one violation:
//!
//! 1. protected staff (pregnant or nursing) never work nights
//! 2. at most `max_days_per_window` working days in any `rest_window_days` window
//! 3. at most `max_consecutive_days` consecutive working days
//! 4. rest between neighbouring shifts of at least `min_rest_hours`, with an
//!    emergency band down to `emergency_rest_hours` that only warns
//! 5. a shift's own length is at most `max_shift_hours`
//!
//! Validation is read-only. It looks at the ledger around the candidate date
//! and nothing else.

use chrono::{Duration, NaiveDate};
use std::collections::{BTreeSet, HashMap};

use crate::config::RulesConfig;
use crate::domain::{ShiftCatalog, ShiftType, StaffMember, Violation, ViolationCode};
use crate::interval::{format_hours, ShiftWindow};
use crate::ledger::AssignmentLedger;

/// Result of validating one proposal.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationOutcome {
    pub valid: bool,
    pub violations: Vec<Violation>,
}

impl ValidationOutcome {
    fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            valid: !violations.iter().any(Violation::is_error),
            violations,
        }
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Violation> {
        self.violations.iter().filter(|v| !v.is_error())
    }
}

/// Whether the proposal is already in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Subject {
    Candidate,
    Committed,
}

#[derive(Debug, Clone)]
pub struct RuleValidator {
    catalog: ShiftCatalog,
    config: RulesConfig,
}

impl RuleValidator {
    pub fn new(catalog: ShiftCatalog, config: RulesConfig) -> Self {
        Self { catalog, config }
    }

    /// Validates a proposal that is not yet in `ledger`.
    pub fn validate(
        &self,
        staff: &StaffMember,
        date: NaiveDate,
        shift: &ShiftType,
        ledger: &AssignmentLedger,
    ) -> ValidationOutcome {
        self.evaluate(staff, date, shift, ledger, Subject::Candidate)
    }

    /// Re-evaluates every counted assignment in `ledger` against its
    /// neighbours. Assignments of staff missing from `roster` are skipped.
    pub fn audit(&self, roster: &[StaffMember], ledger: &AssignmentLedger) -> Vec<Violation> {
        let by_id: HashMap<&str, &StaffMember> =
            roster.iter().map(|s| (s.id.as_str(), s)).collect();

        let mut found = Vec::new();
        for assignment in ledger.assignments() {
            let (Some(staff), Some(shift)) = (
                by_id.get(assignment.staff_id.as_str()),
                self.catalog.get(assignment.shift),
            ) else {
                continue;
            };
            let outcome = self.evaluate(staff, assignment.date, shift, ledger, Subject::Committed);
            found.extend(outcome.violations);
        }
        found
    }

    fn evaluate(
        &self,
        staff: &StaffMember,
        date: NaiveDate,
        shift: &ShiftType,
        ledger: &AssignmentLedger,
        subject: Subject,
    ) -> ValidationOutcome {
        let radius = i64::from(self.config.rest_window_days.max(self.config.max_consecutive_days + 1));
        let nearby = ledger.nearby(&staff.id, date, radius);

        let mut working: BTreeSet<NaiveDate> = nearby.iter().map(|(d, _)| *d).collect();
        working.insert(date);

        let violations = [
            self.protected_night(staff, date, shift),
            self.weekly_rest(staff, date, &working),
            self.consecutive_days(staff, date, &working),
            self.rest_interval(staff, date, shift, ledger, subject),
            self.daily_hours(staff, date, shift),
        ]
        .into_iter()
        .flatten()
        .collect();

        ValidationOutcome::from_violations(violations)
    }

    fn protected_night(&self, staff: &StaffMember, date: NaiveDate, shift: &ShiftType) -> Option<Violation> {
        if !(shift.code.is_night() && staff.special_status.is_protected()) {
            return None;
        }
        Some(Violation::error(
            ViolationCode::ProtectedNight,
            &staff.id,
            date,
            format!("{} may not work night shifts ({:?})", staff.name, staff.special_status),
        ))
    }

    fn weekly_rest(&self, staff: &StaffMember, date: NaiveDate, working: &BTreeSet<NaiveDate>) -> Option<Violation> {
        let span = i64::from(self.config.rest_window_days);
        let limit = self.config.max_days_per_window as usize;

        for offset in (0..span).rev() {
            let from = date - Duration::days(offset);
            let to = from + Duration::days(span - 1);
            let count = working.range(from..=to).count();
            if count > limit {
                return Some(
                    Violation::error(
                        ViolationCode::SevenDayRest,
                        &staff.id,
                        date,
                        format!(
                            "{} would work {} of {} days",
                            staff.name, count, span
                        ),
                    )
                    .with_detail(format!("window {} to {}", from, to)),
                );
            }
        }
        None
    }

    fn consecutive_days(&self, staff: &StaffMember, date: NaiveDate, working: &BTreeSet<NaiveDate>) -> Option<Violation> {
        let mut first = date;
        while working.contains(&(first - Duration::days(1))) {
            first -= Duration::days(1);
        }
        let mut last = date;
        while working.contains(&(last + Duration::days(1))) {
            last += Duration::days(1);
        }

        let run = (last - first).num_days() + 1;
        if run <= i64::from(self.config.max_consecutive_days) {
            return None;
        }
        Some(
            Violation::error(
                ViolationCode::ConsecutiveDays,
                &staff.id,
                date,
                format!("{} would work {} consecutive days", staff.name, run),
            )
            .with_detail(format!("{} to {}", first, last)),
        )
    }

    fn rest_interval(
        &self,
        staff: &StaffMember,
        date: NaiveDate,
        shift: &ShiftType,
        ledger: &AssignmentLedger,
        subject: Subject,
    ) -> Option<Violation> {
        let candidate = ShiftWindow::of(date, shift);

        let shortest = ledger
            .nearby(&staff.id, date, 1)
            .into_iter()
            .filter(|(d, _)| subject == Subject::Candidate || *d != date)
            .filter_map(|(d, code)| self.catalog.get(code).map(|s| ShiftWindow::of(d, s)))
            .map(|other| candidate.gap_to(&other))
            .min()?;

        let required = Duration::hours(self.config.min_rest_hours);
        if shortest >= required {
            return None;
        }

        let emergency = Duration::hours(self.config.emergency_rest_hours);
        let message = format!(
            "{} has {} rest between shifts, {}h required",
            staff.name,
            format_hours(shortest),
            self.config.min_rest_hours
        );
        let violation = if self.config.emergency_rest_exception && shortest >= emergency {
            Violation::warning(ViolationCode::RestInterval, &staff.id, date, message)
                .with_detail("emergency exception")
        } else {
            Violation::error(ViolationCode::RestInterval, &staff.id, date, message)
        };
        Some(violation)
    }

    fn daily_hours(&self, staff: &StaffMember, date: NaiveDate, shift: &ShiftType) -> Option<Violation> {
        let length = shift.duration();
        if length <= Duration::hours(self.config.max_shift_hours) {
            return None;
        }
        Some(Violation::error(
            ViolationCode::DailyHours,
            &staff.id,
            date,
            format!(
                "{} shift lasts {}, limit is {}h",
                shift.code,
                format_hours(length),
                self.config.max_shift_hours
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{hm, Annotation, Level, ScheduleAssignment, Severity, ShiftCode, SpecialStatus};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    fn validator() -> RuleValidator {
        RuleValidator::new(ShiftCatalog::standard(), RulesConfig::default())
    }

    fn commit(ledger: &mut AssignmentLedger, staff: &str, day: u32, shift: ShiftCode) {
        ledger
            .insert(ScheduleAssignment {
                staff_id: staff.to_string(),
                date: date(day),
                shift,
                violations: Vec::new(),
                annotation: Annotation::Fill,
            })
            .unwrap();
    }

    fn shift(code: ShiftCode) -> ShiftType {
        *ShiftCatalog::standard().get(code).unwrap()
    }

    fn codes(outcome: &ValidationOutcome) -> Vec<ViolationCode> {
        outcome.violations.iter().map(|v| v.code).collect()
    }

    #[test]
    fn test_protected_staff_blocked_from_nights() {
        let nurse = StaffMember::new("a", Level::N1).with_status(SpecialStatus::Nursing);
        let outcome = validator().validate(&nurse, date(1), &shift(ShiftCode::Night), &AssignmentLedger::new());
        assert!(!outcome.valid);
        assert_eq!(codes(&outcome), vec![ViolationCode::ProtectedNight]);

        let outcome = validator().validate(&nurse, date(1), &shift(ShiftCode::Day), &AssignmentLedger::new());
        assert!(outcome.valid);
        assert!(outcome.violations.is_empty());
    }

    #[test]
    fn test_sixth_day_in_window_rejected() {
        let nurse = StaffMember::new("a", Level::N2);
        let mut ledger = AssignmentLedger::new();
        for day in [1, 2, 3, 5, 6] {
            commit(&mut ledger, "a", day, ShiftCode::Day);
        }
        let outcome = validator().validate(&nurse, date(7), &shift(ShiftCode::Day), &ledger);
        assert!(!outcome.valid);
        assert_eq!(codes(&outcome), vec![ViolationCode::SevenDayRest]);

        // Every window containing day 9 holds at most four worked days.
        let outcome = validator().validate(&nurse, date(9), &shift(ShiftCode::Day), &ledger);
        assert!(outcome.valid);
    }

    #[test]
    fn test_consecutive_cap_with_relaxed_window() {
        let config = RulesConfig {
            max_days_per_window: 7,
            ..RulesConfig::default()
        };
        let validator = RuleValidator::new(ShiftCatalog::standard(), config);
        let nurse = StaffMember::new("a", Level::N2);
        let mut ledger = AssignmentLedger::new();
        for day in [1, 2, 3, 5, 6, 7] {
            commit(&mut ledger, "a", day, ShiftCode::Day);
        }
        let outcome = validator.validate(&nurse, date(4), &shift(ShiftCode::Day), &ledger);
        assert_eq!(codes(&outcome), vec![ViolationCode::ConsecutiveDays]);
        assert!(!outcome.valid);
    }

    #[test]
    fn test_same_day_back_to_back_is_error() {
        let nurse = StaffMember::new("b", Level::N2);
        let mut ledger = AssignmentLedger::new();
        commit(&mut ledger, "b", 5, ShiftCode::Day);

        let outcome = validator().validate(&nurse, date(5), &shift(ShiftCode::Evening), &ledger);
        assert!(!outcome.valid);
        assert_eq!(codes(&outcome), vec![ViolationCode::RestInterval]);
        assert_eq!(outcome.violations[0].severity, Severity::Error);
    }

    #[test]
    fn test_emergency_band_warns() {
        let nurse = StaffMember::new("a", Level::N2);
        let mut ledger = AssignmentLedger::new();
        commit(&mut ledger, "a", 1, ShiftCode::Evening);

        // Evening ends 23:00, day starts 07:00: 8h.
        let outcome = validator().validate(&nurse, date(2), &shift(ShiftCode::Day), &ledger);
        assert!(outcome.valid);
        assert_eq!(outcome.warnings().count(), 1);
        assert_eq!(outcome.violations[0].code, ViolationCode::RestInterval);

        let strict = RuleValidator::new(
            ShiftCatalog::standard(),
            RulesConfig {
                emergency_rest_exception: false,
                ..RulesConfig::default()
            },
        );
        assert!(!strict.validate(&nurse, date(2), &shift(ShiftCode::Day), &ledger).valid);
    }

    #[test]
    fn test_night_then_day_after_a_free_day_is_clean() {
        let nurse = StaffMember::new("c", Level::N2);
        let mut ledger = AssignmentLedger::new();
        commit(&mut ledger, "c", 1, ShiftCode::Night);

        let outcome = validator().validate(&nurse, date(3), &shift(ShiftCode::Day), &ledger);
        assert!(outcome.valid);
        assert!(outcome.violations.is_empty());

        let outcome = validator().validate(&nurse, date(2), &shift(ShiftCode::Day), &ledger);
        assert!(!outcome.valid);
    }

    #[test]
    fn test_long_shift_rejected() {
        let nurse = StaffMember::new("a", Level::N2);
        let long = ShiftType::new(ShiftCode::Day, hm(6, 0), hm(19, 0));
        let outcome = validator().validate(&nurse, date(1), &long, &AssignmentLedger::new());
        assert_eq!(codes(&outcome), vec![ViolationCode::DailyHours]);
    }

    #[test]
    fn test_audit_ignores_the_assignment_itself() {
        let roster = vec![StaffMember::new("a", Level::N2), StaffMember::new("b", Level::N0)];
        let mut ledger = AssignmentLedger::new();
        commit(&mut ledger, "a", 1, ShiftCode::Day);
        commit(&mut ledger, "a", 2, ShiftCode::Day);
        commit(&mut ledger, "b", 1, ShiftCode::Evening);
        commit(&mut ledger, "b", 2, ShiftCode::Day);

        let found = validator().audit(&roster, &ledger);
        // b: evening then day is an 8h gap, reported from both sides.
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|v| v.staff_id == "b" && !v.is_error()));
    }
}
