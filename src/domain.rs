//! Domain model for nurse shift allocation.

use chrono::{Duration, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Competency tier. Ordered junior to senior.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Level {
    N0,
    N1,
    N2,
    N3,
    N4,
}

impl Level {
    /// Lowest tier counted towards senior cover.
    pub const SENIOR_FLOOR: Level = Level::N2;

    pub fn is_senior(self) -> bool {
        self >= Self::SENIOR_FLOOR
    }
}

/// Special status flags that restrict assignments.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpecialStatus {
    #[default]
    None,
    Pregnant,
    Nursing,
    Other,
}

impl SpecialStatus {
    /// Pregnant and nursing staff may not work night shifts.
    pub fn is_protected(self) -> bool {
        matches!(self, SpecialStatus::Pregnant | SpecialStatus::Nursing)
    }
}

/// Working shift codes, in processing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ShiftCode {
    #[serde(rename = "D")]
    Day,
    #[serde(rename = "E")]
    Evening,
    #[serde(rename = "N")]
    Night,
}

impl ShiftCode {
    pub const ALL: [ShiftCode; 3] = [ShiftCode::Day, ShiftCode::Evening, ShiftCode::Night];

    pub fn as_str(self) -> &'static str {
        match self {
            ShiftCode::Day => "D",
            ShiftCode::Evening => "E",
            ShiftCode::Night => "N",
        }
    }

    pub fn is_night(self) -> bool {
        self == ShiftCode::Night
    }
}

impl fmt::Display for ShiftCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ShiftCode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "D" => Ok(ShiftCode::Day),
            "E" => Ok(ShiftCode::Evening),
            "N" => Ok(ShiftCode::Night),
            _ => Err(()),
        }
    }
}

/// A staff member. Immutable within one scheduling run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StaffMember {
    pub id: String,
    pub name: String,
    pub level: Level,
    pub special_status: SpecialStatus,
    pub seniority: u32,
    pub annual_leave: u32,
    pub active: bool,
}

impl StaffMember {
    pub fn new(id: impl Into<String>, level: Level) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            level,
            special_status: SpecialStatus::None,
            seniority: 0,
            annual_leave: 0,
            active: true,
        }
    }

    pub fn with_status(mut self, status: SpecialStatus) -> Self {
        self.special_status = status;
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

/// A shift definition. `end <= start` means the shift crosses midnight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShiftType {
    pub code: ShiftCode,
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl ShiftType {
    pub fn new(code: ShiftCode, start: NaiveTime, end: NaiveTime) -> Self {
        Self { code, start, end }
    }

    pub fn crosses_midnight(&self) -> bool {
        self.end <= self.start
    }

    /// Length of the shift, adding a day when it crosses midnight.
    pub fn duration(&self) -> Duration {
        let raw = self.end - self.start;
        if self.crosses_midnight() {
            raw + Duration::hours(24)
        } else {
            raw
        }
    }
}

/// The shift types known to a run, looked up by code.
#[derive(Debug, Clone, Default)]
pub struct ShiftCatalog {
    types: BTreeMap<ShiftCode, ShiftType>,
}

impl ShiftCatalog {
    pub fn new(types: impl IntoIterator<Item = ShiftType>) -> Self {
        Self {
            types: types.into_iter().map(|t| (t.code, t)).collect(),
        }
    }

    /// Day 07:00-15:00, evening 15:00-23:00, night 23:00-07:00.
    pub fn standard() -> Self {
        Self::new([
            ShiftType::new(ShiftCode::Day, hm(7, 0), hm(15, 0)),
            ShiftType::new(ShiftCode::Evening, hm(15, 0), hm(23, 0)),
            ShiftType::new(ShiftCode::Night, hm(23, 0), hm(7, 0)),
        ])
    }

    pub fn get(&self, code: ShiftCode) -> Option<&ShiftType> {
        self.types.get(&code)
    }

    pub fn contains(&self, code: ShiftCode) -> bool {
        self.types.contains_key(&code)
    }

    /// Shift types in fixed processing order.
    pub fn iter(&self) -> impl Iterator<Item = &ShiftType> {
        self.types.values()
    }

    pub fn codes(&self) -> impl Iterator<Item = ShiftCode> + '_ {
        self.types.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }
}

/// Days of the target month a staff member is unavailable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaveRequest {
    pub staff_id: String,
    pub days: BTreeSet<u32>,
}

/// Ward staffing targets for one period.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WardStaffingPolicy {
    pub min_per_shift: BTreeMap<ShiftCode, usize>,
    pub max_per_shift: BTreeMap<ShiftCode, usize>,
    pub min_working_days: u32,
    pub target_working_days: u32,
    pub max_working_days: u32,
    pub min_senior_per_shift: usize,
}

impl WardStaffingPolicy {
    pub fn min_for(&self, code: ShiftCode) -> usize {
        self.min_per_shift.get(&code).copied().unwrap_or(0)
    }

    pub fn max_for(&self, code: ShiftCode) -> Option<usize> {
        self.max_per_shift.get(&code).copied()
    }

    /// Senior cover requested for a slot, never above its minimum headcount.
    pub fn senior_for(&self, code: ShiftCode) -> usize {
        self.min_senior_per_shift.min(self.min_for(code))
    }
}

/// A scheduling period: one calendar month, optionally truncated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Period {
    year: i32,
    month: u32,
    days: u32,
    first: NaiveDate,
}

impl Period {
    /// The whole month (zero-based `month`). `None` if not a valid month.
    pub fn month(year: i32, month: u32) -> Option<Self> {
        let (first, days) = month_bounds(year, month)?;
        Some(Self {
            year,
            month,
            days,
            first,
        })
    }

    /// The first `days` days of the month. `None` if longer than the month.
    pub fn truncated(year: i32, month: u32, days: u32) -> Option<Self> {
        let full = Self::month(year, month)?;
        if days == 0 || days > full.days {
            return None;
        }
        Some(Self { days, ..full })
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// Zero-based month index.
    pub fn month_index(&self) -> u32 {
        self.month
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    pub fn last_day(&self) -> NaiveDate {
        self.first + Duration::days(i64::from(self.days) - 1)
    }

    /// Date of a one-based day of month inside the period.
    pub fn date(&self, day: u32) -> Option<NaiveDate> {
        if day == 0 || day > self.days {
            return None;
        }
        Some(self.first + Duration::days(i64::from(day) - 1))
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.first && date <= self.last_day()
    }

    /// All dates of the period in order.
    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        let first = self.first;
        (0..i64::from(self.days)).map(move |offset| first + Duration::days(offset))
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:02}", self.year, self.month + 1)
    }
}

fn month_bounds(year: i32, month: u32) -> Option<(NaiveDate, u32)> {
    if month > 11 {
        return None;
    }
    let first = NaiveDate::from_ymd_opt(year, month + 1, 1)?;
    let next = if month == 11 {
        NaiveDate::from_ymd_opt(year + 1, 1, 1)?
    } else {
        NaiveDate::from_ymd_opt(year, month + 2, 1)?
    };
    Some((first, (next - first).num_days() as u32))
}

/// How an assignment came into being.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Annotation {
    /// Supplied by the caller before the run; never moved.
    Fixed,
    /// Committed while filling minimum headcount.
    Fill,
    /// Added to lift a staff member towards their minimum days.
    Balancing,
    /// Balancing addition on a slot already at minimum headcount.
    Extra,
    /// Moved here from an over-target staff member.
    Redistributed,
    /// Proposed by the external optimizer.
    External,
}

impl Annotation {
    pub fn describe(self) -> &'static str {
        match self {
            Annotation::Fixed => "pre-assigned",
            Annotation::Fill => "filled to minimum headcount",
            Annotation::Balancing => "created during rebalancing",
            Annotation::Extra => "exceeds base allotment",
            Annotation::Redistributed => "redistributed",
            Annotation::External => "proposed by external optimizer",
        }
    }
}

/// Severity of a rule violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ViolationCode {
    ProtectedNight,
    SevenDayRest,
    ConsecutiveDays,
    RestInterval,
    DailyHours,
}

/// A labor-rule finding for one (staff, date).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    pub code: ViolationCode,
    pub severity: Severity,
    pub message: String,
    pub staff_id: String,
    pub date: NaiveDate,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

impl Violation {
    pub fn error(
        code: ViolationCode,
        staff_id: &str,
        date: NaiveDate,
        message: impl Into<String>,
    ) -> Self {
        Self {
            code,
            severity: Severity::Error,
            message: message.into(),
            staff_id: staff_id.to_string(),
            date,
            detail: None,
        }
    }

    pub fn warning(
        code: ViolationCode,
        staff_id: &str,
        date: NaiveDate,
        message: impl Into<String>,
    ) -> Self {
        Self {
            severity: Severity::Warning,
            ..Self::error(code, staff_id, date, message)
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

/// One committed (staff, date, shift). At most one per (staff, date).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleAssignment {
    pub staff_id: String,
    pub date: NaiveDate,
    pub shift: ShiftCode,
    pub violations: Vec<Violation>,
    pub annotation: Annotation,
}

/// Builds a `NaiveTime` from hour and minute literals.
pub(crate) fn hm(hour: u32, minute: u32) -> NaiveTime {
    NaiveTime::from_hms_opt(hour, minute, 0).unwrap_or(NaiveTime::MIN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_ordering_and_seniority() {
        assert!(Level::N0 < Level::N4);
        assert!(!Level::N1.is_senior());
        assert!(Level::N2.is_senior());
        assert!(Level::N4.is_senior());
    }

    #[test]
    fn test_night_shift_duration_crosses_midnight() {
        let catalog = ShiftCatalog::standard();
        let night = catalog.get(ShiftCode::Night).unwrap();
        assert!(night.crosses_midnight());
        assert_eq!(night.duration(), Duration::hours(8));

        let day = catalog.get(ShiftCode::Day).unwrap();
        assert!(!day.crosses_midnight());
        assert_eq!(day.duration(), Duration::hours(8));
    }

    #[test]
    fn test_period_lengths() {
        assert_eq!(Period::month(2024, 1).unwrap().days(), 29);
        assert_eq!(Period::month(2023, 1).unwrap().days(), 28);
        assert_eq!(Period::month(2024, 11).unwrap().days(), 31);
        assert!(Period::month(2024, 12).is_none());
        assert!(Period::truncated(2024, 3, 31).is_none());

        let period = Period::truncated(2024, 2, 20).unwrap();
        assert_eq!(period.dates().count(), 20);
        assert_eq!(period.last_day(), NaiveDate::from_ymd_opt(2024, 3, 20).unwrap());
        assert_eq!(period.to_string(), "2024-03");
    }

    #[test]
    fn test_shift_code_parsing() {
        assert_eq!("d".parse::<ShiftCode>(), Ok(ShiftCode::Day));
        assert_eq!("N".parse::<ShiftCode>(), Ok(ShiftCode::Night));
        assert!("O".parse::<ShiftCode>().is_err());
    }

    #[test]
    fn test_senior_cover_capped_by_minimum() {
        let policy = WardStaffingPolicy {
            min_per_shift: [(ShiftCode::Day, 3), (ShiftCode::Night, 0)].into_iter().collect(),
            max_per_shift: BTreeMap::new(),
            min_working_days: 10,
            target_working_days: 15,
            max_working_days: 20,
            min_senior_per_shift: 1,
        };
        assert_eq!(policy.senior_for(ShiftCode::Day), 1);
        assert_eq!(policy.senior_for(ShiftCode::Night), 0);
        assert_eq!(policy.senior_for(ShiftCode::Evening), 0);
    }
}
