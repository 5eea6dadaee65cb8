//! External Optimizer Adapter.
//!
//! The external path hands the whole problem to a global solver process and
//! reads back a full assignment set. The heuristic phases do not run on this
//! path; the proposals are adopted by the engine and audited.
//!
//! The wire format is JSON on stdin and stdout:
//!
//! ```json
//! {"nurses": [{"id": "n1", "name": "Ann", "level": "N2"}],
//!  "shiftTypes": [{"id": "D", "code": "D", "startTime": "07:00", "endTime": "15:00"}],
//!  "year": 2024, "month": 2,
//!  "wardConfig": {"minNursesDay": 3, "minWorkingDays": 15, "maxWorkingDays": 22},
//!  "constraints": {"minSeniorCount": 1, "minShiftInterval11h": true, "avoidFlowerPattern": true},
//!  "preAssigned": [{"nurseId": "n1", "date": "2024-03-04", "shiftCode": "O"}],
//!  "nurseForbiddenShifts": {"n1": ["N"]}}
//! ```

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

use crate::config::OptimizerConfig;
use crate::domain::{Level, ShiftCode};
use crate::engine::{FixedAssignment, SchedulingProblem};

/// Code the optimizer uses for a day off.
pub const OFF_CODE: &str = "O";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SolverError {
    #[error("no feasible schedule: {0}")]
    Infeasible(String),

    #[error("optimizer transport failed: {0}")]
    Transport(String),

    #[error("optimizer response malformed: {0}")]
    Parse(String),

    #[error("optimizer timed out after {0:?}")]
    Timeout(Duration),
}

impl SolverError {
    pub fn code(&self) -> &'static str {
        match self {
            SolverError::Infeasible(_) => "INFEASIBLE",
            SolverError::Transport(_) => "TRANSPORT",
            SolverError::Parse(_) => "PARSE",
            SolverError::Timeout(_) => "TIMEOUT",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerRequest {
    pub nurses: Vec<NurseEntry>,
    pub shift_types: Vec<ShiftTypeEntry>,
    pub year: i32,
    /// Zero-based.
    pub month: u32,
    pub ward_config: WardConfigEntry,
    pub constraints: ConstraintsEntry,
    pub pre_assigned: Vec<PreAssignedEntry>,
    pub nurse_forbidden_shifts: BTreeMap<String, Vec<ShiftCode>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NurseEntry {
    pub id: String,
    pub name: String,
    pub level: Level,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftTypeEntry {
    pub id: String,
    pub code: ShiftCode,
    pub start_time: String,
    pub end_time: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WardConfigEntry {
    pub min_nurses_day: usize,
    pub min_nurses_evening: usize,
    pub min_nurses_night: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nurses_day: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nurses_evening: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_nurses_night: Option<usize>,
    pub min_working_days: u32,
    pub max_working_days: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConstraintsEntry {
    pub min_senior_count: usize,
    #[serde(rename = "minShiftInterval11h")]
    pub min_shift_interval_11h: bool,
    pub avoid_flower_pattern: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PreAssignedEntry {
    pub nurse_id: String,
    pub date: String,
    pub shift_code: String,
}

impl OptimizerRequest {
    /// Mirrors the problem in the optimizer schema. Leave days travel as
    /// `O` pre-assignments; protected-status night bans are merged into
    /// the forbidden shifts.
    pub fn from_problem(problem: &SchedulingProblem, config: &OptimizerConfig) -> Self {
        let active = problem.staff.iter().filter(|s| s.active);

        let mut nurse_forbidden_shifts: BTreeMap<String, Vec<ShiftCode>> = BTreeMap::new();
        for member in active.clone() {
            let mut codes = problem
                .forbidden_overrides
                .get(&member.id)
                .cloned()
                .unwrap_or_default();
            if member.special_status.is_protected() {
                codes.insert(ShiftCode::Night);
            }
            if !codes.is_empty() {
                nurse_forbidden_shifts.insert(member.id.clone(), codes.into_iter().collect());
            }
        }

        let mut pre_assigned: Vec<PreAssignedEntry> = problem
            .pre_assigned
            .iter()
            .map(|f| PreAssignedEntry {
                nurse_id: f.staff_id.clone(),
                date: f.date.format("%Y-%m-%d").to_string(),
                shift_code: f.shift.as_str().to_string(),
            })
            .collect();
        for request in &problem.leave_requests {
            for &day in &request.days {
                if let Some(date) = problem.period.date(day) {
                    pre_assigned.push(PreAssignedEntry {
                        nurse_id: request.staff_id.clone(),
                        date: date.format("%Y-%m-%d").to_string(),
                        shift_code: OFF_CODE.to_string(),
                    });
                }
            }
        }

        let policy = &problem.policy;
        Self {
            nurses: active
                .map(|s| NurseEntry {
                    id: s.id.clone(),
                    name: s.name.clone(),
                    level: s.level,
                })
                .collect(),
            shift_types: problem
                .shift_types
                .iter()
                .map(|t| ShiftTypeEntry {
                    id: t.code.as_str().to_string(),
                    code: t.code,
                    start_time: t.start.format("%H:%M").to_string(),
                    end_time: t.end.format("%H:%M").to_string(),
                })
                .collect(),
            year: problem.period.year(),
            month: problem.period.month_index(),
            ward_config: WardConfigEntry {
                min_nurses_day: policy.min_for(ShiftCode::Day),
                min_nurses_evening: policy.min_for(ShiftCode::Evening),
                min_nurses_night: policy.min_for(ShiftCode::Night),
                max_nurses_day: policy.max_for(ShiftCode::Day),
                max_nurses_evening: policy.max_for(ShiftCode::Evening),
                max_nurses_night: policy.max_for(ShiftCode::Night),
                min_working_days: policy.min_working_days,
                max_working_days: policy.max_working_days,
            },
            constraints: ConstraintsEntry {
                min_senior_count: policy.min_senior_per_shift,
                min_shift_interval_11h: true,
                avoid_flower_pattern: config.avoid_flower_pattern,
            },
            pre_assigned,
            nurse_forbidden_shifts,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizerResponse {
    pub success: bool,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub schedules: Vec<ProposedShift>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub details: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposedShift {
    pub date: String,
    pub nurse_id: String,
    #[serde(default)]
    pub shift_type_id: Option<serde_json::Value>,
    pub shift_code: String,
}

impl OptimizerResponse {
    pub fn from_json(bytes: &[u8]) -> Result<Self, SolverError> {
        serde_json::from_slice(bytes).map_err(|e| SolverError::Parse(e.to_string()))
    }

    /// Working assignments of a successful response. Day-off entries are
    /// dropped; an unsuccessful response is infeasible.
    pub fn into_assignments(self) -> Result<Vec<FixedAssignment>, SolverError> {
        if !self.success {
            let reason = match (self.error, self.details) {
                (Some(error), Some(details)) => format!("{} ({})", error, details),
                (Some(error), None) => error,
                (None, Some(details)) => details,
                (None, None) => "optimizer reported failure".to_string(),
            };
            return Err(SolverError::Infeasible(reason));
        }

        let mut assignments = Vec::with_capacity(self.schedules.len());
        for entry in self.schedules {
            if entry.shift_code.eq_ignore_ascii_case(OFF_CODE) {
                continue;
            }
            let date = NaiveDate::parse_from_str(&entry.date, "%Y-%m-%d")
                .map_err(|e| SolverError::Parse(format!("date {:?}: {}", entry.date, e)))?;
            let shift = entry
                .shift_code
                .parse::<ShiftCode>()
                .map_err(|_| SolverError::Parse(format!("shift code {:?}", entry.shift_code)))?;
            assignments.push(FixedAssignment::new(entry.nurse_id, date, shift));
        }
        Ok(assignments)
    }
}

/// A global solver reachable through the request/response schema.
pub trait ExternalOptimizer: Send + Sync {
    fn solve(&self, request: &OptimizerRequest) -> Result<Vec<FixedAssignment>, SolverError>;
}

/// Runs the optimizer as a child process per request.
#[derive(Debug, Clone)]
pub struct ProcessOptimizer {
    command: Vec<String>,
    timeout: Duration,
}

impl ProcessOptimizer {
    pub fn new(command: Vec<String>, timeout: Duration) -> Self {
        Self { command, timeout }
    }

    pub fn from_config(config: &OptimizerConfig) -> Self {
        Self::new(config.command.clone(), Duration::from_secs(config.timeout_secs))
    }

    fn exchange(&self, input: Vec<u8>) -> Result<Vec<u8>, SolverError> {
        let (program, args) = self
            .command
            .split_first()
            .ok_or_else(|| SolverError::Transport("optimizer command is empty".into()))?;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // Own process group, so a launcher script's children die with it.
        #[cfg(unix)]
        std::os::unix::process::CommandExt::process_group(&mut command, 0);
        let mut child = command
            .spawn()
            .map_err(|e| SolverError::Transport(format!("failed to start {}: {}", program, e)))?;

        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            terminate(&mut child);
            return Err(SolverError::Transport("optimizer pipes unavailable".into()));
        };

        // Pipes are drained on their own threads so a large response cannot
        // block the child while we wait on it.
        let writer = std::thread::spawn(move || stdin.write_all(&input));
        let reader = std::thread::spawn(move || {
            let mut buf = Vec::new();
            stdout.read_to_end(&mut buf).map(|_| buf)
        });
        let errors = std::thread::spawn(move || {
            let mut buf = String::new();
            let _ = stderr.read_to_string(&mut buf);
            buf
        });

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    terminate(&mut child);
                    warn!(timeout = ?self.timeout, "Optimizer killed at deadline");
                    return Err(SolverError::Timeout(self.timeout));
                }
                Ok(None) => std::thread::sleep(Duration::from_millis(50)),
                Err(e) => return Err(SolverError::Transport(e.to_string())),
            }
        };

        if let Ok(Err(e)) = writer.join() {
            debug!(error = %e, "Optimizer closed stdin early");
        }
        let output = reader
            .join()
            .map_err(|_| SolverError::Transport("stdout reader panicked".into()))?
            .map_err(|e| SolverError::Transport(e.to_string()))?;
        let diagnostics = errors.join().unwrap_or_default();

        if output.iter().all(u8::is_ascii_whitespace) {
            return Err(SolverError::Transport(format!(
                "optimizer exited with {} and no output: {}",
                status,
                diagnostics.trim()
            )));
        }
        if !status.success() {
            debug!(%status, stderr = %diagnostics.trim(), "Optimizer exited unsuccessfully");
        }
        Ok(output)
    }
}

/// Kills the optimizer's whole process group, then reaps the child. Must run
/// before the child is reaped so its pid still names the group.
fn terminate(child: &mut Child) {
    #[cfg(unix)]
    {
        if let Ok(pgid) = libc::pid_t::try_from(child.id()) {
            // SAFETY: killpg takes plain integers and touches no memory. The
            // group was created at spawn with the unreaped child as its leader.
            unsafe {
                libc::killpg(pgid, libc::SIGKILL);
            }
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

impl ExternalOptimizer for ProcessOptimizer {
    fn solve(&self, request: &OptimizerRequest) -> Result<Vec<FixedAssignment>, SolverError> {
        let input = serde_json::to_vec(request).map_err(|e| SolverError::Transport(e.to_string()))?;
        let output = self.exchange(input)?;
        OptimizerResponse::from_json(&output)?.into_assignments()
    }
}
