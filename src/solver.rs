//! Scheduling service: jobs, background runs and commit.
//!
//! A run takes the per-(ward, period) lock, produces an outcome on the
//! chosen path and replaces the stored schedule for that period. A job
//! cancelled before commit leaves the store untouched.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::config::{AppConfig, FallbackPolicy, OptimizerConfig};
use crate::console::{self, PhaseTimer};
use crate::engine::{
    AllocationEngine, EngineConfig, Phase, PhaseReport, ProposalError, SchedulingProblem, ScheduleOutcome,
};
use crate::error::{SetupError, StoreError};
use crate::optimizer::{ExternalOptimizer, OptimizerRequest, ProcessOptimizer, SolverError};
use crate::store::{InMemoryStore, PeriodKey, RunLocks, ScheduleStore};

/// Status of a scheduling job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SolverStatus {
    /// Created, not started.
    NotSolving,
    Solving,
    /// Outcome committed.
    Completed,
    Failed,
    /// Stopped before commit.
    Cancelled,
}

impl SolverStatus {
    /// Returns the status as a SCREAMING_SNAKE_CASE string for API responses.
    ///
    /// ```
    /// use nurse_scheduling::solver::SolverStatus;
    ///
    /// assert_eq!(SolverStatus::NotSolving.as_str(), "NOT_SOLVING");
    /// assert_eq!(SolverStatus::Completed.as_str(), "COMPLETED");
    /// ```
    pub fn as_str(self) -> &'static str {
        match self {
            SolverStatus::NotSolving => "NOT_SOLVING",
            SolverStatus::Solving => "SOLVING",
            SolverStatus::Completed => "COMPLETED",
            SolverStatus::Failed => "FAILED",
            SolverStatus::Cancelled => "CANCELLED",
        }
    }
}

/// Which producer a run uses. The two are mutually exclusive per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SolverPath {
    #[default]
    Heuristic,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RunError {
    #[error(transparent)]
    Setup(#[from] SetupError),

    #[error(transparent)]
    Solver(#[from] SolverError),

    #[error("external proposal rejected: {0}")]
    Proposal(#[from] ProposalError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("run cancelled before commit")]
    Cancelled,
}

impl RunError {
    pub fn code(&self) -> &'static str {
        match self {
            RunError::Setup(e) => e.code(),
            RunError::Solver(e) => e.code(),
            RunError::Proposal(_) => "PROPOSAL_REJECTED",
            RunError::Store(_) => "STORE",
            RunError::Cancelled => "CANCELLED",
        }
    }
}

/// A completed run as seen by callers.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub outcome: ScheduleOutcome,
    pub path: SolverPath,
    /// The external path failed and the heuristic engine produced the result.
    pub used_fallback: bool,
}

/// A scheduling job with current state.
pub struct SolveJob {
    pub id: String,
    pub status: SolverStatus,
    pub path: SolverPath,
    pub problem: SchedulingProblem,
    pub result: Option<RunResult>,
    pub error: Option<RunError>,
    cancel: Arc<AtomicBool>,
}

impl SolveJob {
    pub fn new(id: String, problem: SchedulingProblem, path: SolverPath) -> Self {
        Self {
            id,
            status: SolverStatus::NotSolving,
            path,
            problem,
            result: None,
            error: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }
}

/// The parts of the service a background run needs.
#[derive(Clone)]
struct Runner {
    store: Arc<dyn ScheduleStore>,
    optimizer: Arc<dyn ExternalOptimizer>,
    locks: Arc<RunLocks>,
    engine_config: EngineConfig,
    optimizer_config: OptimizerConfig,
}

impl Runner {
    fn run(&self, problem: SchedulingProblem, path: SolverPath, cancel: &AtomicBool) -> Result<RunResult, RunError> {
        let key = PeriodKey::new(problem.ward.clone(), &problem.period);
        let lock = self.locks.lock_for(&key);
        let _guard = lock.lock();
        let started = Instant::now();

        console::print_problem(
            &problem.ward,
            &problem.period.to_string(),
            problem.staff.len(),
            problem.shift_types.len(),
            problem.period.days(),
        );
        info!(key = %key, path = ?path, "Starting scheduling run");

        let mut used_fallback = false;
        let outcome = match path {
            SolverPath::Heuristic => self.run_heuristic(problem, cancel)?,
            SolverPath::External => match self.run_external(problem.clone(), cancel) {
                Ok(outcome) => outcome,
                Err(RunError::Solver(err)) if self.fallback_allows(&err) => {
                    warn!(key = %key, error = %err, "Optimizer failed, falling back to heuristic engine");
                    console::print_warning(&format!("optimizer failed ({}), using heuristic engine", err));
                    used_fallback = true;
                    self.run_heuristic(problem, cancel)?
                }
                Err(err) => return Err(err),
            },
        };

        check_cancel(cancel)?;
        self.store
            .replace_period(&outcome.ward, &outcome.period, outcome.assignments.clone())?;

        console::print_run_ended(started.elapsed(), &outcome.summary);
        info!(
            key = %key,
            assigned = outcome.summary.total_assigned,
            understaffed = outcome.summary.understaffed.len(),
            duration_ms = started.elapsed().as_millis() as u64,
            "Schedule committed"
        );
        Ok(RunResult {
            outcome,
            path,
            used_fallback,
        })
    }

    fn run_heuristic(&self, problem: SchedulingProblem, cancel: &AtomicBool) -> Result<ScheduleOutcome, RunError> {
        let mut engine = AllocationEngine::new(problem, self.engine_config.clone())?;

        let phases: [(Phase, fn(&mut AllocationEngine) -> PhaseReport); 3] = [
            (Phase::Fill, AllocationEngine::fill),
            (Phase::Balance, AllocationEngine::balance),
            (Phase::Redistribute, AllocationEngine::redistribute),
        ];
        for (index, (phase, step)) in phases.into_iter().enumerate() {
            check_cancel(cancel)?;
            let timer = PhaseTimer::start(phase.as_str(), index);
            let report = step(&mut engine);
            timer.finish(&report);
        }
        Ok(engine.finish())
    }

    fn run_external(&self, problem: SchedulingProblem, cancel: &AtomicBool) -> Result<ScheduleOutcome, RunError> {
        let mut engine = AllocationEngine::new(problem, self.engine_config.clone())?;
        let request = OptimizerRequest::from_problem(engine.problem(), &self.optimizer_config);

        check_cancel(cancel)?;
        let proposals = self.optimizer.solve(&request)?;
        check_cancel(cancel)?;

        engine.adopt_external(&proposals)?;
        Ok(engine.finish())
    }

    fn fallback_allows(&self, err: &SolverError) -> bool {
        match self.optimizer_config.fallback {
            FallbackPolicy::Never => false,
            FallbackPolicy::OnInfeasible => matches!(err, SolverError::Infeasible(_)),
            FallbackPolicy::Always => true,
        }
    }
}

fn check_cancel(cancel: &AtomicBool) -> Result<(), RunError> {
    if cancel.load(Ordering::SeqCst) {
        Err(RunError::Cancelled)
    } else {
        Ok(())
    }
}

/// Manages scheduling jobs.
///
/// # Examples
///
/// ```
/// use nurse_scheduling::config::AppConfig;
/// use nurse_scheduling::solver::{SolverPath, SolverService, SolverStatus};
/// use nurse_scheduling::demo_data::{generate, DemoData};
///
/// let service = SolverService::in_memory(&AppConfig::default());
/// let problem = generate(DemoData::Small);
///
/// // Create a job (doesn't start solving yet)
/// let job = service.create_job("test-1".to_string(), problem, SolverPath::Heuristic);
/// assert_eq!(job.read().status, SolverStatus::NotSolving);
/// ```
pub struct SolverService {
    jobs: RwLock<HashMap<String, Arc<RwLock<SolveJob>>>>,
    runner: Runner,
}

impl SolverService {
    pub fn new(
        store: Arc<dyn ScheduleStore>,
        optimizer: Arc<dyn ExternalOptimizer>,
        engine_config: EngineConfig,
        optimizer_config: OptimizerConfig,
    ) -> Self {
        Self {
            jobs: RwLock::new(HashMap::new()),
            runner: Runner {
                store,
                optimizer,
                locks: Arc::new(RunLocks::new()),
                engine_config,
                optimizer_config,
            },
        }
    }

    /// In-memory store and the configured optimizer process.
    pub fn in_memory(config: &AppConfig) -> Self {
        Self::new(
            Arc::new(InMemoryStore::new()),
            Arc::new(ProcessOptimizer::from_config(&config.optimizer)),
            EngineConfig::from(config),
            config.optimizer.clone(),
        )
    }

    pub fn store(&self) -> &Arc<dyn ScheduleStore> {
        &self.runner.store
    }

    pub fn engine_config(&self) -> &EngineConfig {
        &self.runner.engine_config
    }

    pub fn create_job(&self, id: String, problem: SchedulingProblem, path: SolverPath) -> Arc<RwLock<SolveJob>> {
        let job = Arc::new(RwLock::new(SolveJob::new(id.clone(), problem, path)));
        self.jobs.write().insert(id, job.clone());
        job
    }

    pub fn get_job(&self, id: &str) -> Option<Arc<RwLock<SolveJob>>> {
        self.jobs.read().get(id).cloned()
    }

    pub fn list_jobs(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.jobs.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn remove_job(&self, id: &str) -> Option<Arc<RwLock<SolveJob>>> {
        self.jobs.write().remove(id)
    }

    /// Runs a job on the blocking pool.
    pub fn start_solving(&self, job: Arc<RwLock<SolveJob>>) {
        let runner = self.runner.clone();
        {
            let mut guard = job.write();
            guard.status = SolverStatus::Solving;
        }
        tokio::task::spawn_blocking(move || execute(&runner, &job));
    }

    /// Runs a job on the current thread.
    pub fn solve_now(&self, job: &Arc<RwLock<SolveJob>>) {
        job.write().status = SolverStatus::Solving;
        execute(&self.runner, job);
    }

    /// Requests cancellation. Has no effect once the run has committed.
    pub fn stop_solving(&self, id: &str) -> bool {
        let Some(job) = self.get_job(id) else {
            return false;
        };
        let guard = job.read();
        let running = matches!(guard.status, SolverStatus::NotSolving | SolverStatus::Solving);
        if running {
            guard.cancel.store(true, Ordering::SeqCst);
        }
        running
    }

    /// Runs a problem synchronously without a job record.
    pub fn run_blocking(&self, problem: SchedulingProblem, path: SolverPath) -> Result<RunResult, RunError> {
        self.runner.run(problem, path, &AtomicBool::new(false))
    }
}

fn execute(runner: &Runner, job: &Arc<RwLock<SolveJob>>) {
    let (id, problem, path, cancel) = {
        let guard = job.read();
        (guard.id.clone(), guard.problem.clone(), guard.path, guard.cancel.clone())
    };

    let result = runner.run(problem, path, &cancel);
    let mut guard = job.write();
    match result {
        Ok(result) => {
            guard.status = SolverStatus::Completed;
            guard.result = Some(result);
        }
        Err(RunError::Cancelled) => {
            info!(job_id = %id, "Scheduling job cancelled");
            guard.status = SolverStatus::Cancelled;
            guard.error = Some(RunError::Cancelled);
        }
        Err(err) => {
            error!(job_id = %id, error = %err, "Scheduling job failed");
            guard.status = SolverStatus::Failed;
            guard.error = Some(err);
        }
    }
}
