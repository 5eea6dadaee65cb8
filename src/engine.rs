//! Allocation Engine.
//!
//! A run moves through three phases over a private ledger:
//!
//! - **Fill**: every (date, shift) slot up to its minimum headcount, senior
//!   cover first, best-ranked candidate that passes the interval checker and
//!   the rule validator.
//! - **Balance**: staff still below their minimum days get extra days,
//!   largest deficit first.
//! - **Redistribute**: assignments move from over-target to under-target
//!   staff on the identical slot, so coverage never changes.
//!
//! The engine never touches storage. Callers hand the finished
//! [`ScheduleOutcome`] to a [`ScheduleStore`](crate::store::ScheduleStore).

use chrono::NaiveDate;
use serde::Serialize;
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::{AppConfig, RankingConfig, RulesConfig};
use crate::domain::{
    Annotation, LeaveRequest, Period, ScheduleAssignment, ShiftCatalog, ShiftCode, ShiftType,
    StaffMember, Violation, WardStaffingPolicy,
};
use crate::error::SetupError;
use crate::interval::IntervalChecker;
use crate::ledger::{AssignmentLedger, LedgerError};
use crate::profile::{build_profiles, ConstraintProfile};
use crate::ranking::CandidateRanker;
use crate::rules::{RuleValidator, ValidationOutcome};

/// A (staff, date, shift) fixed before the run, or taken from history.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct FixedAssignment {
    pub staff_id: String,
    pub date: NaiveDate,
    pub shift: ShiftCode,
}

impl FixedAssignment {
    pub fn new(staff_id: impl Into<String>, date: NaiveDate, shift: ShiftCode) -> Self {
        Self {
            staff_id: staff_id.into(),
            date,
            shift,
        }
    }
}

/// Everything one scheduling run needs, as an in-memory snapshot.
#[derive(Debug, Clone)]
pub struct SchedulingProblem {
    pub ward: String,
    pub period: Period,
    pub staff: Vec<StaffMember>,
    pub shift_types: Vec<ShiftType>,
    pub policy: WardStaffingPolicy,
    pub leave_requests: Vec<LeaveRequest>,
    pub forbidden_overrides: BTreeMap<String, BTreeSet<ShiftCode>>,
    pub pre_assigned: Vec<FixedAssignment>,
    /// Assignments dated before the period, used only by rule checks.
    pub history: Vec<FixedAssignment>,
}

impl SchedulingProblem {
    /// Staff and leave for `ward` over `period`; no pre-assignments.
    pub fn new(
        ward: impl Into<String>,
        period: Period,
        staff: Vec<StaffMember>,
        shift_types: Vec<ShiftType>,
        policy: WardStaffingPolicy,
    ) -> Self {
        Self {
            ward: ward.into(),
            period,
            staff,
            shift_types,
            policy,
            leave_requests: Vec::new(),
            forbidden_overrides: BTreeMap::new(),
            pre_assigned: Vec::new(),
            history: Vec::new(),
        }
    }

    fn catalog(&self) -> Result<ShiftCatalog, SetupError> {
        if self.shift_types.is_empty() {
            return Err(SetupError::NoShiftTypes);
        }
        let mut seen = BTreeSet::new();
        for shift in &self.shift_types {
            if !seen.insert(shift.code) {
                return Err(SetupError::DuplicateShiftType(shift.code.to_string()));
            }
        }
        Ok(ShiftCatalog::new(self.shift_types.iter().copied()))
    }

    fn check_roster(&self) -> Result<(), SetupError> {
        if self.staff.iter().all(|s| !s.active) {
            return Err(SetupError::EmptyRoster);
        }
        let mut seen = BTreeSet::new();
        for member in &self.staff {
            if !seen.insert(member.id.as_str()) {
                return Err(SetupError::DuplicateStaff(member.id.clone()));
            }
        }
        Ok(())
    }

    fn check_policy(&self, catalog: &ShiftCatalog) -> Result<(), SetupError> {
        let policy = &self.policy;
        if policy.min_working_days > policy.max_working_days {
            return Err(SetupError::InvalidPolicy(format!(
                "minWorkingDays ({}) exceeds maxWorkingDays ({})",
                policy.min_working_days, policy.max_working_days
            )));
        }
        if policy.target_working_days < policy.min_working_days
            || policy.target_working_days > policy.max_working_days
        {
            return Err(SetupError::InvalidPolicy(format!(
                "targetWorkingDays ({}) is outside [{}, {}]",
                policy.target_working_days, policy.min_working_days, policy.max_working_days
            )));
        }
        for (&code, &minimum) in &policy.min_per_shift {
            if minimum > 0 && !catalog.contains(code) {
                return Err(SetupError::InvalidPolicy(format!(
                    "minimum headcount set for undefined shift {}",
                    code
                )));
            }
            if let Some(maximum) = policy.max_for(code) {
                if maximum < minimum {
                    return Err(SetupError::InvalidPolicy(format!(
                        "shift {} maximum ({}) is below its minimum ({})",
                        code, maximum, minimum
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Rule limits and ranking weights for one run.
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    pub rules: RulesConfig,
    pub ranking: RankingConfig,
}

impl From<&AppConfig> for EngineConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            rules: config.rules.clone(),
            ranking: config.ranking.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Phase {
    Fill,
    Balance,
    Redistribute,
}

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Fill => "Fill",
            Phase::Balance => "Balance",
            Phase::Redistribute => "Redistribute",
        }
    }
}

/// What one phase tried and committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: Phase,
    /// Candidates considered.
    pub attempts: u64,
    pub commits: u64,
    pub elapsed_ms: u64,
}

impl PhaseReport {
    fn new(phase: Phase) -> Self {
        Self {
            phase,
            attempts: 0,
            commits: 0,
            elapsed_ms: 0,
        }
    }
}

/// A slot short of what the policy asks for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotShortfall {
    pub date: NaiveDate,
    pub shift: ShiftCode,
    pub required: usize,
    pub assigned: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ScheduleSummary {
    pub total_assigned: usize,
    pub staff_days: BTreeMap<String, u32>,
    pub shift_totals: BTreeMap<ShiftCode, usize>,
    pub below_minimum: usize,
    pub above_target: usize,
    pub understaffed: Vec<SlotShortfall>,
    pub senior_shortfalls: Vec<SlotShortfall>,
    /// Rule errors found by auditing the final schedule. Only fixed or
    /// externally proposed assignments can produce these.
    pub rule_errors: Vec<Violation>,
    pub phases: Vec<PhaseReport>,
}

impl ScheduleSummary {
    pub fn is_complete(&self) -> bool {
        self.understaffed.is_empty() && self.senior_shortfalls.is_empty() && self.rule_errors.is_empty()
    }
}

/// The result of a run.
#[derive(Debug, Clone)]
pub struct ScheduleOutcome {
    pub ward: String,
    pub period: Period,
    pub assignments: Vec<ScheduleAssignment>,
    pub summary: ScheduleSummary,
}

/// Every check the engine would apply to one proposal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateCheck {
    /// Not on leave.
    pub available: bool,
    /// Not a forbidden shift for this staff member.
    pub permitted: bool,
    pub interval_clear: bool,
    pub outcome: ValidationOutcome,
}

impl CandidateCheck {
    pub fn is_acceptable(&self) -> bool {
        self.available && self.permitted && self.interval_clear && self.outcome.valid
    }
}

/// An external proposal the engine could not adopt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProposalError {
    #[error("proposal names unknown or inactive staff id {0}")]
    UnknownStaff(String),

    #[error("proposal uses shift {0}, which is not defined")]
    UnknownShift(ShiftCode),

    #[error("proposal for {staff_id} on {date} is outside the period")]
    OutsidePeriod { staff_id: String, date: NaiveDate },

    #[error("proposal puts {staff_id} to work on leave day {date}")]
    OnLeave { staff_id: String, date: NaiveDate },

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

pub struct AllocationEngine {
    problem: SchedulingProblem,
    catalog: ShiftCatalog,
    validator: RuleValidator,
    checker: IntervalChecker,
    ranker: CandidateRanker,
    profiles: Vec<ConstraintProfile>,
    profile_by_staff: HashMap<String, usize>,
    ledger: AssignmentLedger,
    reports: Vec<PhaseReport>,
}

impl AllocationEngine {
    /// Validates the problem, builds profiles and loads history and fixed
    /// assignments. Any input problem is returned as a [`SetupError`].
    pub fn new(problem: SchedulingProblem, config: EngineConfig) -> Result<Self, SetupError> {
        if problem.staff.is_empty() {
            return Err(SetupError::EmptyRoster);
        }
        let catalog = problem.catalog()?;
        problem.check_roster()?;
        problem.check_policy(&catalog)?;

        let profiles = build_profiles(
            &problem.staff,
            &problem.period,
            &problem.policy,
            &problem.leave_requests,
            &problem.forbidden_overrides,
        )?;
        let profile_by_staff = profiles
            .iter()
            .enumerate()
            .map(|(idx, p)| (p.staff_id.clone(), idx))
            .collect();

        let mut engine = Self {
            validator: RuleValidator::new(catalog.clone(), config.rules.clone()),
            checker: IntervalChecker::new(catalog.clone(), config.rules.min_start_spacing_hours),
            ranker: CandidateRanker::new(config.ranking),
            catalog,
            problem,
            profiles,
            profile_by_staff,
            ledger: AssignmentLedger::new(),
            reports: Vec::new(),
        };
        engine.load_history()?;
        engine.load_fixed()?;

        info!(
            ward = %engine.problem.ward,
            period = %engine.problem.period,
            staff = engine.profiles.len(),
            fixed = engine.ledger.len(),
            "Scheduling run prepared"
        );
        Ok(engine)
    }

    fn load_history(&mut self) -> Result<(), SetupError> {
        for entry in &self.problem.history {
            if !self.problem.staff.iter().any(|s| s.id == entry.staff_id) {
                return Err(SetupError::UnknownStaff(entry.staff_id.clone()));
            }
            if !self.catalog.contains(entry.shift) {
                return Err(SetupError::UnknownShiftCode(entry.shift.to_string()));
            }
            if entry.date >= self.problem.period.first_day() {
                return Err(SetupError::HistoryInsidePeriod {
                    staff_id: entry.staff_id.clone(),
                    date: entry.date,
                });
            }
            self.ledger
                .insert_history(&entry.staff_id, entry.date, entry.shift)
                .map_err(|_| SetupError::ConflictingPreAssignment {
                    staff_id: entry.staff_id.clone(),
                    date: entry.date,
                })?;
        }
        Ok(())
    }

    fn load_fixed(&mut self) -> Result<(), SetupError> {
        let mut fixed = self.problem.pre_assigned.clone();
        fixed.sort_by(|a, b| (a.date, a.shift, &a.staff_id).cmp(&(b.date, b.shift, &b.staff_id)));
        fixed.dedup();

        for entry in fixed {
            let Some(&pidx) = self.profile_by_staff.get(&entry.staff_id) else {
                return Err(SetupError::UnknownStaff(entry.staff_id));
            };
            if !self.catalog.contains(entry.shift) {
                return Err(SetupError::UnknownShiftCode(entry.shift.to_string()));
            }
            if !self.problem.period.contains(entry.date) {
                return Err(SetupError::OutsidePeriod {
                    staff_id: entry.staff_id,
                    date: entry.date,
                });
            }
            if !self.profiles[pidx].is_available(entry.date) {
                return Err(SetupError::PreAssignedOnLeave {
                    staff_id: entry.staff_id,
                    date: entry.date,
                });
            }

            let warnings = self.warnings_for(pidx, entry.date, entry.shift);
            self.commit(pidx, entry.date, entry.shift, Annotation::Fixed, warnings)
                .map_err(|_| SetupError::ConflictingPreAssignment {
                    staff_id: entry.staff_id.clone(),
                    date: entry.date,
                })?;
        }
        Ok(())
    }

    pub fn problem(&self) -> &SchedulingProblem {
        &self.problem
    }

    pub fn ledger(&self) -> &AssignmentLedger {
        &self.ledger
    }

    pub fn profiles(&self) -> &[ConstraintProfile] {
        &self.profiles
    }

    pub fn profile(&self, staff_id: &str) -> Option<&ConstraintProfile> {
        self.profile_by_staff.get(staff_id).map(|&idx| &self.profiles[idx])
    }

    /// Checks one proposal against the current ledger without committing it.
    pub fn evaluate(&self, staff_id: &str, date: NaiveDate, code: ShiftCode) -> Result<CandidateCheck, ProposalError> {
        let Some(profile) = self.profile(staff_id) else {
            return Err(ProposalError::UnknownStaff(staff_id.to_string()));
        };
        let Some(shift) = self.catalog.get(code) else {
            return Err(ProposalError::UnknownShift(code));
        };
        if !self.problem.period.contains(date) {
            return Err(ProposalError::OutsidePeriod {
                staff_id: staff_id.to_string(),
                date,
            });
        }

        let staff = &self.problem.staff[profile.staff_idx];
        Ok(CandidateCheck {
            available: profile.is_available(date),
            permitted: profile.permits(code),
            interval_clear: self.checker.is_clear(staff_id, date, code, &self.ledger),
            outcome: self.validator.validate(staff, date, shift, &self.ledger),
        })
    }

    /// Runs all three phases and returns the outcome.
    pub fn run(mut self) -> ScheduleOutcome {
        self.fill();
        self.balance();
        self.redistribute();
        self.finish()
    }

    /// Phase 1: fill every slot up to its minimum headcount.
    pub fn fill(&mut self) -> PhaseReport {
        let started = Instant::now();
        let mut report = PhaseReport::new(Phase::Fill);
        let dates: Vec<NaiveDate> = self.problem.period.dates().collect();
        let codes: Vec<ShiftCode> = self.catalog.codes().collect();

        for date in dates {
            for &code in &codes {
                let minimum = self.problem.policy.min_for(code);
                let senior_cover = self.problem.policy.senior_for(code);
                let mut seniors_exhausted = false;

                while self.ledger.coverage(date, code) < minimum {
                    if !seniors_exhausted && self.senior_count(date, code) < senior_cover {
                        if self.fill_slot(date, code, true, &mut report) {
                            continue;
                        }
                        seniors_exhausted = true;
                    }
                    if !self.fill_slot(date, code, false, &mut report) {
                        warn!(
                            %date,
                            shift = %code,
                            assigned = self.ledger.coverage(date, code),
                            required = minimum,
                            "Slot left understaffed"
                        );
                        break;
                    }
                }
            }
        }

        self.finish_phase(report, started)
    }

    fn fill_slot(&mut self, date: NaiveDate, code: ShiftCode, seniors_only: bool, report: &mut PhaseReport) -> bool {
        let mut candidates: Vec<usize> = (0..self.profiles.len())
            .filter(|&idx| {
                let profile = &self.profiles[idx];
                profile.is_available(date)
                    && profile.permits(code)
                    && profile.has_capacity()
                    && !self.ledger.is_assigned(&profile.staff_id, date)
                    && (!seniors_only || self.problem.staff[profile.staff_idx].level.is_senior())
            })
            .collect();
        self.ranker.rank(&self.profiles, &mut candidates);

        for pidx in candidates {
            report.attempts += 1;
            let Some(warnings) = self.try_candidate(pidx, date, code) else {
                continue;
            };
            if self.commit(pidx, date, code, Annotation::Fill, warnings).is_ok() {
                report.commits += 1;
                return true;
            }
        }
        false
    }

    /// Phase 2: lift staff below their minimum days, largest deficit first.
    pub fn balance(&mut self) -> PhaseReport {
        let started = Instant::now();
        let mut report = PhaseReport::new(Phase::Balance);
        let dates: Vec<NaiveDate> = self.problem.period.dates().collect();

        let mut needy: Vec<usize> = (0..self.profiles.len())
            .filter(|&idx| self.profiles[idx].min_deficit() > 0)
            .collect();
        needy.sort_by_key(|&idx| Reverse(self.profiles[idx].min_deficit()));

        for pidx in needy {
            for &date in &dates {
                let profile = &self.profiles[pidx];
                if profile.min_deficit() == 0 || !profile.has_capacity() {
                    break;
                }
                if !profile.is_available(date) || self.ledger.is_assigned(&profile.staff_id, date) {
                    continue;
                }

                let mut codes: Vec<ShiftCode> = self.catalog.codes().filter(|&c| profile.permits(c)).collect();
                codes.sort_by_key(|&c| self.ledger.coverage(date, c) >= self.problem.policy.min_for(c));

                for code in codes {
                    let coverage = self.ledger.coverage(date, code);
                    if self.problem.policy.max_for(code).is_some_and(|max| coverage >= max) {
                        continue;
                    }
                    report.attempts += 1;
                    let Some(warnings) = self.try_candidate(pidx, date, code) else {
                        continue;
                    };
                    let annotation = if coverage >= self.problem.policy.min_for(code) {
                        Annotation::Extra
                    } else {
                        Annotation::Balancing
                    };
                    if self.commit(pidx, date, code, annotation, warnings).is_ok() {
                        report.commits += 1;
                        break;
                    }
                }
            }

            let profile = &self.profiles[pidx];
            if profile.min_deficit() > 0 {
                debug!(
                    staff_id = %profile.staff_id,
                    deficit = profile.min_deficit(),
                    "Staff member still below minimum days"
                );
            }
        }

        self.finish_phase(report, started)
    }

    /// Phase 3: hand slots from over-target to under-target staff.
    ///
    /// Each swap is atomic. Fixed assignments never move.
    pub fn redistribute(&mut self) -> PhaseReport {
        let started = Instant::now();
        let mut report = PhaseReport::new(Phase::Redistribute);

        let mut over: Vec<usize> = (0..self.profiles.len())
            .filter(|&idx| self.profiles[idx].target_excess() > 0)
            .collect();
        over.sort_by_key(|&idx| Reverse(self.profiles[idx].target_excess()));

        let mut under: Vec<usize> = (0..self.profiles.len())
            .filter(|&idx| {
                let p = &self.profiles[idx];
                p.target_deficit() > 0 && p.assigned_days < p.max_possible_days
            })
            .collect();

        for opidx in over {
            let held: Vec<(NaiveDate, ShiftCode)> = self.profiles[opidx].assignments.iter().rev().copied().collect();
            for (date, code) in held {
                if self.profiles[opidx].target_excess() == 0 {
                    break;
                }
                let from = self.profiles[opidx].staff_id.clone();
                if self.ledger.is_fixed(&from, date) {
                    continue;
                }

                under.sort_by_key(|&idx| Reverse(self.profiles[idx].target_deficit()));
                for &upidx in &under {
                    let profile = &self.profiles[upidx];
                    if profile.target_deficit() == 0
                        || !profile.has_capacity()
                        || !profile.is_available(date)
                        || !profile.permits(code)
                        || self.ledger.is_assigned(&profile.staff_id, date)
                    {
                        continue;
                    }
                    report.attempts += 1;
                    let Some(warnings) = self.try_candidate(upidx, date, code) else {
                        continue;
                    };

                    let to = self.profiles[upidx].staff_id.clone();
                    match self.ledger.swap_occupant(&from, &to, date, Annotation::Redistributed, warnings) {
                        Ok(_) => {
                            self.profiles[opidx].release(date);
                            self.profiles[upidx].record(date, code);
                            report.commits += 1;
                            debug!(from = %from, to = %to, %date, shift = %code, "Redistributed assignment");
                            break;
                        }
                        Err(err) => {
                            debug!(error = %err, "Swap rejected");
                        }
                    }
                }
            }
        }

        self.finish_phase(report, started)
    }

    /// Adopts an externally proposed assignment set instead of running the
    /// phases. Proposals that repeat a fixed assignment are skipped; rule
    /// warnings are attached, rule errors surface in the summary audit.
    pub fn adopt_external(&mut self, proposals: &[FixedAssignment]) -> Result<usize, ProposalError> {
        let mut ordered = proposals.to_vec();
        ordered.sort_by(|a, b| (a.date, a.shift, &a.staff_id).cmp(&(b.date, b.shift, &b.staff_id)));

        let mut adopted = 0;
        for proposal in ordered {
            let Some(&pidx) = self.profile_by_staff.get(&proposal.staff_id) else {
                return Err(ProposalError::UnknownStaff(proposal.staff_id));
            };
            if !self.catalog.contains(proposal.shift) {
                return Err(ProposalError::UnknownShift(proposal.shift));
            }
            if !self.problem.period.contains(proposal.date) {
                return Err(ProposalError::OutsidePeriod {
                    staff_id: proposal.staff_id,
                    date: proposal.date,
                });
            }
            if self.ledger.is_fixed(&proposal.staff_id, proposal.date)
                && self.ledger.shift_on(&proposal.staff_id, proposal.date) == Some(proposal.shift)
            {
                continue;
            }
            if !self.profiles[pidx].is_available(proposal.date) {
                return Err(ProposalError::OnLeave {
                    staff_id: proposal.staff_id,
                    date: proposal.date,
                });
            }

            let warnings = self.warnings_for(pidx, proposal.date, proposal.shift);
            self.commit(pidx, proposal.date, proposal.shift, Annotation::External, warnings)?;
            adopted += 1;
        }

        info!(ward = %self.problem.ward, adopted, "Adopted external assignments");
        Ok(adopted)
    }

    /// Consumes the engine and reports the committed schedule.
    pub fn finish(self) -> ScheduleOutcome {
        let summary = self.summarize();
        info!(
            ward = %self.problem.ward,
            period = %self.problem.period,
            assigned = summary.total_assigned,
            understaffed = summary.understaffed.len(),
            below_minimum = summary.below_minimum,
            "Scheduling run complete"
        );
        ScheduleOutcome {
            assignments: self.ledger.assignments(),
            ward: self.problem.ward,
            period: self.problem.period,
            summary,
        }
    }

    fn summarize(&self) -> ScheduleSummary {
        let mut shift_totals: BTreeMap<ShiftCode, usize> = self.catalog.codes().map(|c| (c, 0)).collect();
        let mut understaffed = Vec::new();
        let mut senior_shortfalls = Vec::new();

        for date in self.problem.period.dates() {
            for code in self.catalog.codes() {
                let assigned = self.ledger.coverage(date, code);
                *shift_totals.entry(code).or_default() += assigned;

                let required = self.problem.policy.min_for(code);
                if assigned < required {
                    understaffed.push(SlotShortfall {
                        date,
                        shift: code,
                        required,
                        assigned,
                    });
                }
                let seniors_required = self.problem.policy.senior_for(code);
                let seniors = self.senior_count(date, code);
                if seniors < seniors_required {
                    senior_shortfalls.push(SlotShortfall {
                        date,
                        shift: code,
                        required: seniors_required,
                        assigned: seniors,
                    });
                }
            }
        }

        let rule_errors = self
            .validator
            .audit(&self.problem.staff, &self.ledger)
            .into_iter()
            .filter(Violation::is_error)
            .collect();

        ScheduleSummary {
            total_assigned: self.ledger.len(),
            staff_days: self
                .profiles
                .iter()
                .map(|p| (p.staff_id.clone(), p.assigned_days))
                .collect(),
            shift_totals,
            below_minimum: self.profiles.iter().filter(|p| p.min_deficit() > 0).count(),
            above_target: self.profiles.iter().filter(|p| p.target_excess() > 0).count(),
            understaffed,
            senior_shortfalls,
            rule_errors,
            phases: self.reports.clone(),
        }
    }

    /// Commits one assignment to the ledger and its profile.
    pub(crate) fn commit(
        &mut self,
        pidx: usize,
        date: NaiveDate,
        code: ShiftCode,
        annotation: Annotation,
        violations: Vec<Violation>,
    ) -> Result<(), LedgerError> {
        let staff_id = self.profiles[pidx].staff_id.clone();
        self.ledger.insert(ScheduleAssignment {
            staff_id: staff_id.clone(),
            date,
            shift: code,
            violations,
            annotation,
        })?;
        self.profiles[pidx].record(date, code);
        debug!(staff_id = %staff_id, %date, shift = %code, annotation = ?annotation, "Committed assignment");
        Ok(())
    }

    /// Interval checker then rule validator. `Some(warnings)` on success.
    fn try_candidate(&self, pidx: usize, date: NaiveDate, code: ShiftCode) -> Option<Vec<Violation>> {
        let staff = &self.problem.staff[self.profiles[pidx].staff_idx];
        if !self.checker.is_clear(&staff.id, date, code, &self.ledger) {
            return None;
        }
        let shift = self.catalog.get(code)?;
        let outcome = self.validator.validate(staff, date, shift, &self.ledger);
        outcome.valid.then_some(outcome.violations)
    }

    fn warnings_for(&self, pidx: usize, date: NaiveDate, code: ShiftCode) -> Vec<Violation> {
        let staff = &self.problem.staff[self.profiles[pidx].staff_idx];
        let Some(shift) = self.catalog.get(code) else {
            return Vec::new();
        };
        self.validator
            .validate(staff, date, shift, &self.ledger)
            .violations
            .into_iter()
            .filter(|v| !v.is_error())
            .collect()
    }

    fn senior_count(&self, date: NaiveDate, code: ShiftCode) -> usize {
        self.ledger
            .occupants(date, code)
            .iter()
            .filter(|id| {
                self.profile(id)
                    .is_some_and(|p| self.problem.staff[p.staff_idx].level.is_senior())
            })
            .count()
    }

    fn finish_phase(&mut self, mut report: PhaseReport, started: Instant) -> PhaseReport {
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            phase = report.phase.as_str(),
            attempts = report.attempts,
            commits = report.commits,
            elapsed_ms = report.elapsed_ms,
            "Phase complete"
        );
        self.reports.push(report.clone());
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Level, Severity, SpecialStatus, ViolationCode};

    fn policy(day: usize, evening: usize, night: usize) -> WardStaffingPolicy {
        WardStaffingPolicy {
            min_per_shift: [(ShiftCode::Day, day), (ShiftCode::Evening, evening), (ShiftCode::Night, night)]
                .into_iter()
                .collect(),
            max_per_shift: BTreeMap::new(),
            min_working_days: 0,
            target_working_days: 0,
            max_working_days: 5,
            min_senior_per_shift: 0,
        }
    }

    fn problem(days: u32, staff: Vec<StaffMember>, policy: WardStaffingPolicy) -> SchedulingProblem {
        SchedulingProblem::new(
            "ward-a",
            Period::truncated(2024, 2, days).unwrap(),
            staff,
            ShiftCatalog::standard().iter().copied().collect(),
            policy,
        )
    }

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, day).unwrap()
    }

    #[test]
    fn test_setup_errors() {
        let err = AllocationEngine::new(problem(1, vec![], policy(1, 0, 0)), EngineConfig::default()).err();
        assert_eq!(err, Some(SetupError::EmptyRoster));

        let staff = vec![StaffMember::new("a", Level::N1), StaffMember::new("a", Level::N2)];
        let err = AllocationEngine::new(problem(1, staff, policy(1, 0, 0)), EngineConfig::default()).err();
        assert_eq!(err, Some(SetupError::DuplicateStaff("a".into())));

        let mut p = problem(1, vec![StaffMember::new("a", Level::N1)], policy(1, 0, 0));
        p.shift_types.clear();
        assert_eq!(AllocationEngine::new(p, EngineConfig::default()).err(), Some(SetupError::NoShiftTypes));

        let mut p = problem(1, vec![StaffMember::new("a", Level::N1)], policy(1, 0, 0));
        p.policy.min_working_days = 9;
        assert!(matches!(
            AllocationEngine::new(p, EngineConfig::default()).err(),
            Some(SetupError::InvalidPolicy(_))
        ));

        let mut p = problem(2, vec![StaffMember::new("a", Level::N1)], policy(1, 0, 0));
        p.pre_assigned.push(FixedAssignment::new("a", date(3), ShiftCode::Day));
        assert!(matches!(
            AllocationEngine::new(p, EngineConfig::default()).err(),
            Some(SetupError::OutsidePeriod { .. })
        ));

        let mut p = problem(2, vec![StaffMember::new("a", Level::N1)], policy(1, 0, 0));
        p.pre_assigned.push(FixedAssignment::new("a", date(1), ShiftCode::Day));
        p.pre_assigned.push(FixedAssignment::new("a", date(1), ShiftCode::Night));
        assert!(matches!(
            AllocationEngine::new(p, EngineConfig::default()).err(),
            Some(SetupError::ConflictingPreAssignment { .. })
        ));

        let mut p = problem(2, vec![StaffMember::new("a", Level::N1)], policy(1, 0, 0));
        p.history.push(FixedAssignment::new("a", date(1), ShiftCode::Day));
        assert!(matches!(
            AllocationEngine::new(p, EngineConfig::default()).err(),
            Some(SetupError::HistoryInsidePeriod { .. })
        ));
    }

    #[test]
    fn test_fill_prefers_seniors_then_falls_back() {
        let staff = vec![
            StaffMember::new("junior-1", Level::N0),
            StaffMember::new("junior-2", Level::N1),
            StaffMember::new("senior", Level::N3),
        ];
        let mut policy = policy(2, 0, 0);
        policy.min_senior_per_shift = 1;
        let mut engine = AllocationEngine::new(problem(1, staff, policy), EngineConfig::default()).unwrap();

        let report = engine.fill();
        assert_eq!(report.commits, 2);
        let occupants = engine.ledger().occupants(date(1), ShiftCode::Day);
        assert_eq!(occupants[0], "senior");
        assert_eq!(occupants[1], "junior-1");
    }

    #[test]
    fn test_senior_shortfall_reported() {
        let staff = vec![StaffMember::new("junior", Level::N1)];
        let mut policy = policy(1, 0, 0);
        policy.min_senior_per_shift = 1;
        let outcome = AllocationEngine::new(problem(1, staff, policy), EngineConfig::default())
            .unwrap()
            .run();
        assert_eq!(outcome.assignments.len(), 1);
        assert_eq!(outcome.summary.senior_shortfalls.len(), 1);
        assert!(outcome.summary.understaffed.is_empty());
    }

    #[test]
    fn test_balance_marks_extra_and_respects_maximum() {
        let staff = vec![StaffMember::new("a", Level::N2), StaffMember::new("b", Level::N2)];
        let mut policy = policy(1, 0, 0);
        policy.min_working_days = 2;
        policy.target_working_days = 2;
        policy.max_per_shift.insert(ShiftCode::Day, 1);
        policy.max_per_shift.insert(ShiftCode::Night, 0);
        let mut engine = AllocationEngine::new(problem(2, staff, policy), EngineConfig::default()).unwrap();

        engine.fill();
        assert_eq!(engine.ledger().shift_on("a", date(1)), Some(ShiftCode::Day));
        assert_eq!(engine.ledger().shift_on("b", date(2)), Some(ShiftCode::Day));

        // Day and night are at their maximum, so only evenings remain. An
        // evening before b's day shift breaks forward rotation.
        let report = engine.balance();
        assert_eq!(report.commits, 1);
        let assignment = engine.ledger().get("a", date(2)).unwrap();
        assert_eq!(assignment.shift, ShiftCode::Evening);
        assert_eq!(assignment.annotation, Annotation::Extra);
        assert!(!engine.ledger().is_assigned("b", date(1)));
    }

    #[test]
    fn test_balance_prefers_understaffed_slot() {
        let staff = vec![StaffMember::new("a", Level::N2)];
        let mut policy = policy(0, 1, 0);
        policy.min_working_days = 1;
        policy.target_working_days = 1;
        let mut engine = AllocationEngine::new(problem(1, staff, policy), EngineConfig::default()).unwrap();

        engine.balance();
        let assignment = engine.ledger().get("a", date(1)).unwrap();
        assert_eq!(assignment.shift, ShiftCode::Evening);
        assert_eq!(assignment.annotation, Annotation::Balancing);
    }

    #[test]
    fn test_redistribute_leaves_fixed_alone() {
        let staff = vec![StaffMember::new("a", Level::N2), StaffMember::new("b", Level::N2)];
        let mut policy = policy(0, 0, 0);
        policy.min_working_days = 1;
        policy.target_working_days = 1;
        let mut p = problem(3, staff, policy);
        p.pre_assigned = vec![
            FixedAssignment::new("a", date(1), ShiftCode::Day),
            FixedAssignment::new("a", date(2), ShiftCode::Day),
        ];
        let mut engine = AllocationEngine::new(p, EngineConfig::default()).unwrap();

        let report = engine.redistribute();
        assert_eq!(report.commits, 0);
        assert_eq!(engine.profile("a").unwrap().assigned_days, 2);
        assert!(engine.ledger().is_fixed("a", date(2)));
    }

    #[test]
    fn test_protected_staff_never_take_nights() {
        let staff = vec![
            StaffMember::new("p", Level::N3).with_status(SpecialStatus::Pregnant),
            StaffMember::new("q", Level::N1),
        ];
        let outcome = AllocationEngine::new(problem(3, staff, policy(1, 0, 1)), EngineConfig::default())
            .unwrap()
            .run();
        assert!(outcome
            .assignments
            .iter()
            .all(|a| !(a.staff_id == "p" && a.shift == ShiftCode::Night)));
    }

    #[test]
    fn test_evaluate_reports_without_committing() {
        let staff = vec![
            StaffMember::new("a", Level::N2),
            StaffMember::new("p", Level::N1).with_status(SpecialStatus::Nursing),
        ];
        let mut p = problem(3, staff, policy(0, 0, 0));
        p.pre_assigned.push(FixedAssignment::new("a", date(1), ShiftCode::Night));
        let engine = AllocationEngine::new(p, EngineConfig::default()).unwrap();

        let next_morning = engine.evaluate("a", date(2), ShiftCode::Day).unwrap();
        assert!(!next_morning.interval_clear);
        assert!(!next_morning.outcome.valid);
        assert!(!next_morning.is_acceptable());

        let day_after = engine.evaluate("a", date(3), ShiftCode::Day).unwrap();
        assert!(day_after.is_acceptable());
        assert!(!engine.ledger().is_assigned("a", date(3)));

        let night = engine.evaluate("p", date(2), ShiftCode::Night).unwrap();
        assert!(!night.permitted);
        assert!(!night.outcome.valid);

        assert!(matches!(
            engine.evaluate("a", date(4), ShiftCode::Day),
            Err(ProposalError::OutsidePeriod { .. })
        ));
    }

    #[test]
    fn test_history_night_blocks_first_morning() {
        let last_february = NaiveDate::from_ymd_opt(2024, 2, 29).unwrap();
        let mut p = problem(3, vec![StaffMember::new("a", Level::N2)], policy(0, 0, 0));
        p.history.push(FixedAssignment::new("a", last_february, ShiftCode::Night));
        let engine = AllocationEngine::new(p, EngineConfig::default()).unwrap();

        // The night ends 07:00 on the 1st, exactly when the day shift starts.
        let first = engine.evaluate("a", date(1), ShiftCode::Day).unwrap();
        assert!(!first.interval_clear);
        assert!(!first.is_acceptable());
        let rest = first
            .outcome
            .violations
            .iter()
            .find(|v| v.code == ViolationCode::RestInterval)
            .unwrap();
        assert_eq!(rest.severity, Severity::Error);

        let second = engine.evaluate("a", date(2), ShiftCode::Day).unwrap();
        assert!(second.is_acceptable());
        assert!(second.outcome.violations.is_empty());
    }

    #[test]
    fn test_history_counts_in_windows_straddling_the_period() {
        let mut p = problem(3, vec![StaffMember::new("a", Level::N2)], policy(0, 0, 0));
        p.history = (26..=29)
            .map(|day| FixedAssignment::new("a", NaiveDate::from_ymd_opt(2024, 2, day).unwrap(), ShiftCode::Day))
            .collect();
        p.pre_assigned.push(FixedAssignment::new("a", date(1), ShiftCode::Day));
        let engine = AllocationEngine::new(p, EngineConfig::default()).unwrap();
        assert_eq!(engine.profile("a").unwrap().assigned_days, 1);

        let check = engine.evaluate("a", date(2), ShiftCode::Day).unwrap();
        assert!(check.interval_clear);
        assert!(!check.outcome.valid);
        let codes: Vec<ViolationCode> = check.outcome.violations.iter().map(|v| v.code).collect();
        assert_eq!(codes, vec![ViolationCode::SevenDayRest]);

        let outcome = engine.finish();
        assert_eq!(outcome.assignments.len(), 1);
        assert_eq!(outcome.assignments[0].date, date(1));
    }

    #[test]
    fn test_external_proposals_are_audited() {
        let staff = vec![StaffMember::new("a", Level::N2)];
        let mut engine = AllocationEngine::new(problem(2, staff, policy(0, 0, 0)), EngineConfig::default()).unwrap();
        engine
            .adopt_external(&[
                FixedAssignment::new("a", date(1), ShiftCode::Night),
                FixedAssignment::new("a", date(2), ShiftCode::Day),
            ])
            .unwrap();
        let outcome = engine.finish();
        assert_eq!(outcome.assignments.len(), 2);
        assert!(outcome.assignments.iter().all(|a| a.annotation == Annotation::External));
        assert!(!outcome.summary.rule_errors.is_empty());
        assert!(outcome.summary.phases.is_empty());

        let staff = vec![StaffMember::new("a", Level::N2)];
        let mut engine = AllocationEngine::new(problem(2, staff, policy(0, 0, 0)), EngineConfig::default()).unwrap();
        assert_eq!(
            engine.adopt_external(&[FixedAssignment::new("x", date(1), ShiftCode::Day)]),
            Err(ProposalError::UnknownStaff("x".into()))
        );
    }
}
