//! The three bootstrap phases. Each builds its task list from the configuration
//! and runs it through a [`TaskPool`] drawing on the shared [`JobBudget`].

pub mod acquire;
pub mod download;
mod gate;
pub mod install;

use std::fmt;
use std::time::{Duration, Instant};

use serde::Serialize;
use tracing::{info, warn};

use crate::bootstrap::Config;
use crate::external::Collaborators;
use crate::models::Sleeper;
use crate::tasks::{CancelFlag, JobBudget, PoolReport, TaskPool};

pub use gate::{gate, Gate, GateOpener};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Phase {
    Acquire,
    Install,
    Download,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::Acquire, Phase::Install, Phase::Download];

    pub fn label(&self) -> &'static str {
        match self {
            Phase::Acquire => "acquire",
            Phase::Install => "install",
            Phase::Download => "download",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhaseState {
    Pending,
    Running,
    Completed,
}

/// What a completed phase produced. `Completed` regardless of how many tasks failed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseReport {
    pub phase: Phase,
    pub state: PhaseState,
    pub outcomes: PoolReport,
    pub notes: Vec<String>,
    pub setup_error: Option<String>,
    pub elapsed: Duration,
}

impl PhaseReport {
    pub fn failure_count(&self) -> usize {
        self.outcomes.failures.len() + usize::from(self.setup_error.is_some())
    }

    pub fn is_clean(&self) -> bool {
        self.failure_count() == 0
    }

    /// Report for a phase whose thread died before producing one.
    pub fn crashed(phase: Phase, reason: impl Into<String>) -> Self {
        let mut run = PhaseRun::new(phase);
        run.start();
        run.setup_failed(reason);
        run.finish(PoolReport::default())
    }
}

/// Drives one phase through `Pending -> Running -> Completed`.
#[derive(Debug)]
pub struct PhaseRun {
    phase: Phase,
    state: PhaseState,
    started: Option<Instant>,
    outcomes: PoolReport,
    notes: Vec<String>,
    setup_error: Option<String>,
}

impl PhaseRun {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            state: PhaseState::Pending,
            started: None,
            outcomes: PoolReport::default(),
            notes: Vec::new(),
            setup_error: None,
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn start(&mut self) {
        if self.state == PhaseState::Pending {
            self.state = PhaseState::Running;
            self.started = Some(Instant::now());
            info!(phase = %self.phase, "phase started");
        }
    }

    /// Folds one pool run into the phase.
    pub fn absorb(&mut self, report: PoolReport) {
        self.outcomes.merge(report);
    }

    /// An expected degraded branch: logged as a warning and listed in the summary.
    pub fn note(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(phase = %self.phase, "{message}");
        self.notes.push(message);
    }

    pub fn setup_failed(&mut self, reason: impl Into<String>) {
        let reason = reason.into();
        warn!(phase = %self.phase, "phase setup failed: {reason}");
        self.setup_error = Some(reason);
    }

    pub fn finish(mut self, outcomes: PoolReport) -> PhaseReport {
        self.outcomes.merge(outcomes);
        let elapsed = self.started.map(|at| at.elapsed()).unwrap_or_default();
        let report = PhaseReport {
            phase: self.phase,
            state: PhaseState::Completed,
            outcomes: self.outcomes,
            notes: self.notes,
            setup_error: self.setup_error,
            elapsed,
        };
        let failures = report.failure_count();
        if failures == 0 {
            info!(
                phase = %report.phase,
                tasks = report.outcomes.len(),
                elapsed_ms = elapsed.as_millis() as u64,
                "phase completed"
            );
        } else {
            warn!(
                phase = %report.phase,
                tasks = report.outcomes.len(),
                failures,
                elapsed_ms = elapsed.as_millis() as u64,
                "phase completed with failures"
            );
        }
        report
    }
}

/// Everything a phase needs from the coordinator.
#[derive(Clone)]
pub struct PhaseContext<'a> {
    pub config: &'a Config,
    pub tools: &'a Collaborators,
    pub budget: JobBudget,
    pub cancel: CancelFlag,
    pub sleeper: Sleeper,
}

impl PhaseContext<'_> {
    pub fn pool(&self) -> TaskPool {
        TaskPool::with_budget(self.budget.clone()).cancel_on(self.cancel.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{OutcomeRecord, TaskId, TaskKind};

    #[test]
    fn run_moves_through_each_state_once() {
        let mut run = PhaseRun::new(Phase::Install);
        assert_eq!(run.state(), PhaseState::Pending);
        run.start();
        assert_eq!(run.state(), PhaseState::Running);
        let report = run.finish(PoolReport::default());
        assert_eq!(report.state, PhaseState::Completed);
        assert!(report.is_clean());
    }

    #[test]
    fn failures_and_setup_errors_both_count() {
        let mut run = PhaseRun::new(Phase::Download);
        run.start();
        run.setup_failed("login exploded");
        let mut outcomes = PoolReport::default();
        outcomes.failures.push(OutcomeRecord::fail(
            TaskId::new("x"),
            TaskKind::Download,
            "gone",
        ));
        let report = run.finish(outcomes);
        assert_eq!(report.failure_count(), 2);
        assert_eq!(report.state, PhaseState::Completed);
    }

    #[test]
    fn notes_do_not_count_as_failures() {
        let mut run = PhaseRun::new(Phase::Download);
        run.start();
        run.note("skipping gated download");
        let report = run.finish(PoolReport::default());
        assert!(report.is_clean());
        assert_eq!(report.notes.len(), 1);
    }

    #[test]
    fn crashed_phase_is_completed_with_an_error() {
        let report = PhaseReport::crashed(Phase::Acquire, "thread panicked");
        assert_eq!(report.state, PhaseState::Completed);
        assert_eq!(report.setup_error.as_deref(), Some("thread panicked"));
    }
}
