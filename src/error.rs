//! Errors that stop a scheduling run before it starts, or fail its commit.
//!
//! Per-assignment rule problems are [`Violation`](crate::domain::Violation)
//! values and never appear here.

use chrono::NaiveDate;
use thiserror::Error;

/// Input rejected before the engine runs.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SetupError {
    #[error("staff roster is empty")]
    EmptyRoster,

    #[error("no shift types defined")]
    NoShiftTypes,

    #[error("invalid period {year}-{month} (month is zero-based)")]
    InvalidPeriod { year: i32, month: u32 },

    #[error("invalid staffing policy: {0}")]
    InvalidPolicy(String),

    #[error("staff id {0} appears more than once")]
    DuplicateStaff(String),

    #[error("unknown staff id {0}")]
    UnknownStaff(String),

    #[error("unknown shift code {0:?}")]
    UnknownShiftCode(String),

    #[error("shift type {0} is defined more than once")]
    DuplicateShiftType(String),

    #[error("invalid time {0:?}, expected HH:MM")]
    InvalidTime(String),

    #[error("invalid date {0:?}, expected YYYY-MM-DD")]
    InvalidDate(String),

    #[error("leave day {day} for {staff_id} is not a day of the month")]
    InvalidLeaveDay { staff_id: String, day: i64 },

    #[error("pre-assignment of {staff_id} on {date} is outside the period")]
    OutsidePeriod { staff_id: String, date: NaiveDate },

    #[error("pre-assignment of {staff_id} on {date} falls on a leave day")]
    PreAssignedOnLeave { staff_id: String, date: NaiveDate },

    #[error("{staff_id} has conflicting pre-assignments on {date}")]
    ConflictingPreAssignment { staff_id: String, date: NaiveDate },

    #[error("history entry of {staff_id} on {date} is not before the period")]
    HistoryInsidePeriod { staff_id: String, date: NaiveDate },
}

impl SetupError {
    /// Stable machine-readable code for API responses.
    pub fn code(&self) -> &'static str {
        match self {
            SetupError::EmptyRoster => "EMPTY_ROSTER",
            SetupError::NoShiftTypes => "NO_SHIFT_TYPES",
            SetupError::InvalidPeriod { .. } => "INVALID_PERIOD",
            SetupError::InvalidPolicy(_) => "INVALID_POLICY",
            SetupError::DuplicateStaff(_) => "DUPLICATE_STAFF",
            SetupError::UnknownStaff(_) => "UNKNOWN_STAFF",
            SetupError::UnknownShiftCode(_) => "UNKNOWN_SHIFT_CODE",
            SetupError::DuplicateShiftType(_) => "DUPLICATE_SHIFT_TYPE",
            SetupError::InvalidTime(_) => "INVALID_TIME",
            SetupError::InvalidDate(_) => "INVALID_DATE",
            SetupError::InvalidLeaveDay { .. } => "INVALID_LEAVE_DAY",
            SetupError::OutsidePeriod { .. } => "OUTSIDE_PERIOD",
            SetupError::PreAssignedOnLeave { .. } => "PRE_ASSIGNED_ON_LEAVE",
            SetupError::ConflictingPreAssignment { .. } => "CONFLICTING_PRE_ASSIGNMENT",
            SetupError::HistoryInsidePeriod { .. } => "HISTORY_INSIDE_PERIOD",
        }
    }
}

/// Storage collaborator failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{staff_id} has more than one assignment on {date}")]
    DuplicateAssignment { staff_id: String, date: NaiveDate },

    #[error("assignment of {staff_id} on {date} is outside period {period}")]
    OutsidePeriod {
        staff_id: String,
        date: NaiveDate,
        period: String,
    },

    #[error("storage backend failed: {0}")]
    Backend(String),
}
