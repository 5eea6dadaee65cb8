//! DTOs for REST API requests/responses.
//!
//! The wire format is camelCase JSON. Shift codes travel as their letters,
//! times as `"HH:MM"`, dates as `"YYYY-MM-DD"`, the month is zero-based and
//! leave days are days of the month.

use chrono::{Datelike, NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::domain::{
    Annotation, Level, LeaveRequest, Period, ScheduleAssignment, ShiftCode, ShiftType, SpecialStatus,
    StaffMember, Violation, WardStaffingPolicy,
};
use crate::engine::{CandidateCheck, FixedAssignment, ScheduleSummary, SchedulingProblem};
use crate::error::SetupError;
use crate::solver::{RunError, SolveJob, SolverPath, SolverStatus};

/// Pre-assignment codes that mark a day off rather than a shift.
const OFF_CODES: [&str; 2] = ["O", "OFF"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaffDto {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub level: Level,
    #[serde(default)]
    pub special_status: SpecialStatus,
    #[serde(default)]
    pub seniority: u32,
    #[serde(default)]
    pub annual_leave: u32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl From<&StaffMember> for StaffDto {
    fn from(s: &StaffMember) -> Self {
        Self {
            id: s.id.clone(),
            name: Some(s.name.clone()),
            level: s.level,
            special_status: s.special_status,
            seniority: s.seniority,
            annual_leave: s.annual_leave,
            active: s.active,
        }
    }
}

impl StaffDto {
    fn to_staff(&self) -> StaffMember {
        StaffMember {
            id: self.id.clone(),
            name: self.name.clone().unwrap_or_else(|| self.id.clone()),
            level: self.level,
            special_status: self.special_status,
            seniority: self.seniority,
            annual_leave: self.annual_leave,
            active: self.active,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftTypeDto {
    pub code: String,
    pub start_time: String,
    pub end_time: String,
}

impl From<&ShiftType> for ShiftTypeDto {
    fn from(s: &ShiftType) -> Self {
        Self {
            code: s.code.to_string(),
            start_time: s.start.format("%H:%M").to_string(),
            end_time: s.end.format("%H:%M").to_string(),
        }
    }
}

impl ShiftTypeDto {
    fn to_shift_type(&self) -> Result<ShiftType, SetupError> {
        Ok(ShiftType::new(
            parse_code(&self.code)?,
            parse_time(&self.start_time)?,
            parse_time(&self.end_time)?,
        ))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyDto {
    pub min_nurses_per_shift_type: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub max_nurses_per_shift_type: BTreeMap<String, usize>,
    pub min_working_days: u32,
    pub max_working_days: u32,
    pub target_working_days: u32,
    #[serde(default)]
    pub min_senior_per_shift: usize,
}

impl From<&WardStaffingPolicy> for PolicyDto {
    fn from(p: &WardStaffingPolicy) -> Self {
        Self {
            min_nurses_per_shift_type: p.min_per_shift.iter().map(|(c, &n)| (c.to_string(), n)).collect(),
            max_nurses_per_shift_type: p.max_per_shift.iter().map(|(c, &n)| (c.to_string(), n)).collect(),
            min_working_days: p.min_working_days,
            max_working_days: p.max_working_days,
            target_working_days: p.target_working_days,
            min_senior_per_shift: p.min_senior_per_shift,
        }
    }
}

impl PolicyDto {
    fn to_policy(&self) -> Result<WardStaffingPolicy, SetupError> {
        let by_code = |map: &BTreeMap<String, usize>| -> Result<BTreeMap<ShiftCode, usize>, SetupError> {
            map.iter().map(|(code, &n)| Ok((parse_code(code)?, n))).collect()
        };
        Ok(WardStaffingPolicy {
            min_per_shift: by_code(&self.min_nurses_per_shift_type)?,
            max_per_shift: by_code(&self.max_nurses_per_shift_type)?,
            min_working_days: self.min_working_days,
            target_working_days: self.target_working_days,
            max_working_days: self.max_working_days,
            min_senior_per_shift: self.min_senior_per_shift,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaveRequestDto {
    pub staff_id: String,
    pub days: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAssignedDto {
    pub staff_id: String,
    pub date: String,
    pub shift_code: String,
}

impl From<&FixedAssignment> for PreAssignedDto {
    fn from(f: &FixedAssignment) -> Self {
        Self {
            staff_id: f.staff_id.clone(),
            date: f.date.to_string(),
            shift_code: f.shift.to_string(),
        }
    }
}

/// Engine input as submitted by clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleRequestDto {
    pub ward: String,
    pub year: i32,
    /// Zero-based.
    pub month: u32,
    /// Truncates the period; defaults to the whole month.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub days: Option<u32>,
    pub staff: Vec<StaffDto>,
    pub shift_types: Vec<ShiftTypeDto>,
    pub policy: PolicyDto,
    #[serde(default)]
    pub leave_requests: Vec<LeaveRequestDto>,
    #[serde(default)]
    pub forbidden_shift_overrides: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    pub pre_assigned: Vec<PreAssignedDto>,
    /// Assignments dated before the period.
    #[serde(default)]
    pub history: Vec<PreAssignedDto>,
    #[serde(default)]
    pub solver_path: SolverPath,
}

impl ScheduleRequestDto {
    pub fn from_problem(problem: &SchedulingProblem, solver_path: SolverPath) -> Self {
        let period = &problem.period;
        let full_month = Period::month(period.year(), period.month_index()).map(|p| p.days());
        Self {
            ward: problem.ward.clone(),
            year: period.year(),
            month: period.month_index(),
            days: (full_month != Some(period.days())).then_some(period.days()),
            staff: problem.staff.iter().map(StaffDto::from).collect(),
            shift_types: problem.shift_types.iter().map(ShiftTypeDto::from).collect(),
            policy: PolicyDto::from(&problem.policy),
            leave_requests: problem
                .leave_requests
                .iter()
                .map(|l| LeaveRequestDto {
                    staff_id: l.staff_id.clone(),
                    days: l.days.iter().map(|&d| i64::from(d)).collect(),
                })
                .collect(),
            forbidden_shift_overrides: problem
                .forbidden_overrides
                .iter()
                .map(|(id, codes)| (id.clone(), codes.iter().map(ShiftCode::to_string).collect()))
                .collect(),
            pre_assigned: problem.pre_assigned.iter().map(PreAssignedDto::from).collect(),
            history: problem.history.iter().map(PreAssignedDto::from).collect(),
            solver_path,
        }
    }

    /// Converts to the engine's input. Day-off pre-assignments (`O`/`OFF`)
    /// become leave days.
    pub fn to_problem(&self) -> Result<SchedulingProblem, SetupError> {
        let invalid_period = || SetupError::InvalidPeriod {
            year: self.year,
            month: self.month,
        };
        let period = match self.days {
            Some(days) => Period::truncated(self.year, self.month, days),
            None => Period::month(self.year, self.month),
        }
        .ok_or_else(invalid_period)?;

        let shift_types = self
            .shift_types
            .iter()
            .map(ShiftTypeDto::to_shift_type)
            .collect::<Result<Vec<_>, _>>()?;

        let mut leave: BTreeMap<String, BTreeSet<u32>> = BTreeMap::new();
        for request in &self.leave_requests {
            let days = leave.entry(request.staff_id.clone()).or_default();
            for &day in &request.days {
                let day = u32::try_from(day).map_err(|_| SetupError::InvalidLeaveDay {
                    staff_id: request.staff_id.clone(),
                    day,
                })?;
                days.insert(day);
            }
        }

        let mut pre_assigned = Vec::new();
        for entry in &self.pre_assigned {
            let date = parse_date(&entry.date)?;
            if OFF_CODES.contains(&entry.shift_code.trim().to_uppercase().as_str()) {
                if date.year() != self.year || date.month0() != self.month {
                    return Err(SetupError::OutsidePeriod {
                        staff_id: entry.staff_id.clone(),
                        date,
                    });
                }
                leave.entry(entry.staff_id.clone()).or_default().insert(date.day());
                continue;
            }
            pre_assigned.push(FixedAssignment::new(
                entry.staff_id.clone(),
                date,
                parse_code(&entry.shift_code)?,
            ));
        }

        let history = self
            .history
            .iter()
            .map(|entry| {
                Ok(FixedAssignment::new(
                    entry.staff_id.clone(),
                    parse_date(&entry.date)?,
                    parse_code(&entry.shift_code)?,
                ))
            })
            .collect::<Result<Vec<_>, SetupError>>()?;

        let forbidden_overrides = self
            .forbidden_shift_overrides
            .iter()
            .map(|(id, codes)| {
                let codes = codes.iter().map(|c| parse_code(c)).collect::<Result<BTreeSet<_>, _>>()?;
                Ok((id.clone(), codes))
            })
            .collect::<Result<BTreeMap<_, _>, SetupError>>()?;

        Ok(SchedulingProblem {
            ward: self.ward.clone(),
            period,
            staff: self.staff.iter().map(StaffDto::to_staff).collect(),
            shift_types,
            policy: self.policy.to_policy()?,
            leave_requests: leave
                .into_iter()
                .map(|(staff_id, days)| LeaveRequest { staff_id, days })
                .collect(),
            forbidden_overrides,
            pre_assigned,
            history,
        })
    }
}

fn parse_code(code: &str) -> Result<ShiftCode, SetupError> {
    code.parse().map_err(|_| SetupError::UnknownShiftCode(code.to_string()))
}

fn parse_time(time: &str) -> Result<NaiveTime, SetupError> {
    NaiveTime::parse_from_str(time.trim(), "%H:%M").map_err(|_| SetupError::InvalidTime(time.to_string()))
}

fn parse_date(date: &str) -> Result<NaiveDate, SetupError> {
    NaiveDate::parse_from_str(date.trim(), "%Y-%m-%d").map_err(|_| SetupError::InvalidDate(date.to_string()))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentDto {
    pub staff_id: String,
    pub date: NaiveDate,
    pub shift_code: ShiftCode,
    pub annotation: Annotation,
    /// Human-readable form of `annotation`.
    pub annotation_text: &'static str,
    pub violations: Vec<Violation>,
}

impl From<&ScheduleAssignment> for AssignmentDto {
    fn from(a: &ScheduleAssignment) -> Self {
        Self {
            staff_id: a.staff_id.clone(),
            date: a.date,
            shift_code: a.shift,
            annotation: a.annotation,
            annotation_text: a.annotation.describe(),
            violations: a.violations.clone(),
        }
    }
}

/// Structured error body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorDto {
    pub code: String,
    pub message: String,
}

impl From<&SetupError> for ErrorDto {
    fn from(e: &SetupError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

impl From<&RunError> for ErrorDto {
    fn from(e: &RunError) -> Self {
        Self {
            code: e.code().to_string(),
            message: e.to_string(),
        }
    }
}

/// A job's state and, once committed, its schedule.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleResultDto {
    pub id: String,
    pub ward: String,
    pub period: String,
    pub solver_status: SolverStatus,
    pub solver_path: SolverPath,
    pub used_fallback: bool,
    pub assignments: Vec<AssignmentDto>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<ScheduleSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorDto>,
}

impl ScheduleResultDto {
    pub fn from_job(job: &SolveJob) -> Self {
        let result = job.result.as_ref();
        Self {
            id: job.id.clone(),
            ward: job.problem.ward.clone(),
            period: job.problem.period.to_string(),
            solver_status: job.status,
            solver_path: result.map_or(job.path, |r| r.path),
            used_fallback: result.is_some_and(|r| r.used_fallback),
            assignments: result
                .map(|r| r.outcome.assignments.iter().map(AssignmentDto::from).collect())
                .unwrap_or_default(),
            summary: result.map(|r| r.outcome.summary.clone()),
            error: job.error.as_ref().map(ErrorDto::from),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    pub solver_status: SolverStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
}

/// Committed schedule for one ward and period.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodScheduleDto {
    pub ward: String,
    pub period: String,
    pub assignments: Vec<AssignmentDto>,
}

/// One proposal to check against a request's fixed assignments.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateRequest {
    pub schedule: ScheduleRequestDto,
    pub staff_id: String,
    pub date: NaiveDate,
    pub shift_code: ShiftCode,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidateResponse {
    pub valid: bool,
    pub available: bool,
    pub permitted: bool,
    pub interval_clear: bool,
    pub violations: Vec<Violation>,
}

impl From<CandidateCheck> for ValidateResponse {
    fn from(check: CandidateCheck) -> Self {
        Self {
            valid: check.is_acceptable(),
            available: check.available,
            permitted: check.permitted,
            interval_clear: check.interval_clear,
            violations: check.outcome.violations,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InfoResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub solver_engine: &'static str,
}
