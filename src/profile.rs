//! Constraint Profile Builder.
//!
//! A profile holds one staff member's limits for the period and their
//! running state while the engine commits assignments. Profiles are built
//! once per run and owned by that run.

use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{LeaveRequest, Period, ShiftCode, StaffMember, WardStaffingPolicy};
use crate::error::SetupError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintProfile {
    /// Index into the run's roster.
    pub staff_idx: usize,
    pub staff_id: String,
    pub unavailable: BTreeSet<NaiveDate>,
    pub forbidden: BTreeSet<ShiftCode>,
    /// Period length minus unavailable days.
    pub max_possible_days: u32,
    pub target_days: u32,
    pub min_days: u32,
    /// `max_possible_days` capped by the policy maximum.
    pub max_days: u32,
    pub assigned_days: u32,
    /// Assignments of this run, kept in date order.
    pub assignments: Vec<(NaiveDate, ShiftCode)>,
}

impl ConstraintProfile {
    pub fn is_available(&self, date: NaiveDate) -> bool {
        !self.unavailable.contains(&date)
    }

    pub fn permits(&self, code: ShiftCode) -> bool {
        !self.forbidden.contains(&code)
    }

    pub fn has_capacity(&self) -> bool {
        self.assigned_days < self.max_days
    }

    pub fn min_deficit(&self) -> u32 {
        self.min_days.saturating_sub(self.assigned_days)
    }

    pub fn target_deficit(&self) -> u32 {
        self.target_days.saturating_sub(self.assigned_days)
    }

    pub fn target_excess(&self) -> u32 {
        self.assigned_days.saturating_sub(self.target_days)
    }

    pub fn record(&mut self, date: NaiveDate, code: ShiftCode) {
        let at = self.assignments.partition_point(|(d, _)| *d < date);
        self.assignments.insert(at, (date, code));
        self.assigned_days += 1;
    }

    pub fn release(&mut self, date: NaiveDate) -> Option<ShiftCode> {
        let at = self.assignments.iter().position(|(d, _)| *d == date)?;
        let (_, code) = self.assignments.remove(at);
        self.assigned_days -= 1;
        Some(code)
    }
}

/// Builds one profile per active staff member, in roster order.
///
/// Leave days are given as days of the month; days of the month beyond a
/// truncated period are ignored, days outside the month are an error.
pub fn build_profiles(
    staff: &[StaffMember],
    period: &Period,
    policy: &WardStaffingPolicy,
    leave_requests: &[LeaveRequest],
    forbidden_overrides: &BTreeMap<String, BTreeSet<ShiftCode>>,
) -> Result<Vec<ConstraintProfile>, SetupError> {
    let month_days = Period::month(period.year(), period.month_index())
        .map(|m| m.days())
        .unwrap_or(period.days());

    let mut leave: BTreeMap<&str, BTreeSet<NaiveDate>> = BTreeMap::new();
    for request in leave_requests {
        if !staff.iter().any(|s| s.id == request.staff_id) {
            return Err(SetupError::UnknownStaff(request.staff_id.clone()));
        }
        let days = leave.entry(request.staff_id.as_str()).or_default();
        for &day in &request.days {
            if day == 0 || day > month_days {
                return Err(SetupError::InvalidLeaveDay {
                    staff_id: request.staff_id.clone(),
                    day: i64::from(day),
                });
            }
            if let Some(date) = period.date(day) {
                days.insert(date);
            }
        }
    }

    if let Some(unknown) = forbidden_overrides
        .keys()
        .find(|id| !staff.iter().any(|s| &s.id == *id))
    {
        return Err(SetupError::UnknownStaff(unknown.clone()));
    }

    let profiles = staff
        .iter()
        .enumerate()
        .filter(|(_, member)| member.active)
        .map(|(staff_idx, member)| {
            let unavailable = leave.remove(member.id.as_str()).unwrap_or_default();

            let mut forbidden = forbidden_overrides.get(&member.id).cloned().unwrap_or_default();
            if member.special_status.is_protected() {
                forbidden.insert(ShiftCode::Night);
            }

            let max_possible_days = period.days() - unavailable.len() as u32;
            ConstraintProfile {
                staff_idx,
                staff_id: member.id.clone(),
                unavailable,
                forbidden,
                max_possible_days,
                target_days: max_possible_days.min(policy.target_working_days),
                min_days: max_possible_days.min(policy.min_working_days),
                max_days: max_possible_days.min(policy.max_working_days),
                assigned_days: 0,
                assignments: Vec::new(),
            }
        })
        .collect();

    Ok(profiles)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Level, SpecialStatus};

    fn policy() -> WardStaffingPolicy {
        WardStaffingPolicy {
            min_per_shift: BTreeMap::new(),
            max_per_shift: BTreeMap::new(),
            min_working_days: 20,
            target_working_days: 21,
            max_working_days: 22,
            min_senior_per_shift: 1,
        }
    }

    fn leave(staff_id: &str, days: &[u32]) -> LeaveRequest {
        LeaveRequest {
            staff_id: staff_id.to_string(),
            days: days.iter().copied().collect(),
        }
    }

    #[test]
    fn test_minimum_capped_by_available_days() {
        let period = Period::truncated(2024, 2, 20).unwrap();
        let staff = vec![StaffMember::new("d", Level::N1)];
        let profiles = build_profiles(&staff, &period, &policy(), &[leave("d", &[4, 11])], &BTreeMap::new())
            .unwrap();

        let d = &profiles[0];
        assert_eq!(d.max_possible_days, 18);
        assert_eq!(d.min_days, 18);
        assert_eq!(d.target_days, 18);
        assert_eq!(d.max_days, 18);
        assert!(!d.is_available(period.date(4).unwrap()));
    }

    #[test]
    fn test_leave_beyond_truncated_period_is_ignored() {
        let period = Period::truncated(2024, 2, 20).unwrap();
        let staff = vec![StaffMember::new("a", Level::N1)];
        let profiles = build_profiles(&staff, &period, &policy(), &[leave("a", &[25, 31])], &BTreeMap::new())
            .unwrap();
        assert_eq!(profiles[0].max_possible_days, 20);

        let err = build_profiles(&staff, &period, &policy(), &[leave("a", &[32])], &BTreeMap::new())
            .unwrap_err();
        assert!(matches!(err, SetupError::InvalidLeaveDay { day: 32, .. }));
    }

    #[test]
    fn test_forbidden_shifts_merge_status_and_overrides() {
        let period = Period::month(2024, 2).unwrap();
        let staff = vec![
            StaffMember::new("p", Level::N3).with_status(SpecialStatus::Pregnant),
            StaffMember::new("q", Level::N1),
        ];
        let overrides: BTreeMap<String, BTreeSet<ShiftCode>> =
            [("p".to_string(), [ShiftCode::Evening].into_iter().collect())]
                .into_iter()
                .collect();
        let profiles = build_profiles(&staff, &period, &policy(), &[], &overrides).unwrap();

        assert!(!profiles[0].permits(ShiftCode::Night));
        assert!(!profiles[0].permits(ShiftCode::Evening));
        assert!(profiles[0].permits(ShiftCode::Day));
        assert!(profiles[1].permits(ShiftCode::Night));
    }

    #[test]
    fn test_inactive_staff_have_no_profile() {
        let period = Period::month(2024, 2).unwrap();
        let mut retired = StaffMember::new("r", Level::N4);
        retired.active = false;
        let staff = vec![retired, StaffMember::new("s", Level::N0)];
        let profiles = build_profiles(&staff, &period, &policy(), &[], &BTreeMap::new()).unwrap();
        assert_eq!(profiles.len(), 1);
        assert_eq!(profiles[0].staff_idx, 1);
    }

    #[test]
    fn test_record_keeps_date_order() {
        let period = Period::month(2024, 2).unwrap();
        let staff = vec![StaffMember::new("a", Level::N1)];
        let mut profile = build_profiles(&staff, &period, &policy(), &[], &BTreeMap::new())
            .unwrap()
            .remove(0);

        profile.record(period.date(9).unwrap(), ShiftCode::Day);
        profile.record(period.date(2).unwrap(), ShiftCode::Night);
        assert_eq!(profile.assignments[0].0, period.date(2).unwrap());
        assert_eq!(profile.assigned_days, 2);

        assert_eq!(profile.release(period.date(9).unwrap()), Some(ShiftCode::Day));
        assert_eq!(profile.release(period.date(9).unwrap()), None);
        assert_eq!(profile.assigned_days, 1);
    }

    #[test]
    fn test_unknown_staff_in_leave_is_rejected() {
        let period = Period::month(2024, 2).unwrap();
        let staff = vec![StaffMember::new("a", Level::N1)];
        let err = build_profiles(&staff, &period, &policy(), &[leave("zz", &[1])], &BTreeMap::new())
            .unwrap_err();
        assert_eq!(err, SetupError::UnknownStaff("zz".into()));
    }
}
