//! CPU-gated batch runner.
//!
//! Hands successive batches of wordlists to the cracking backend, one
//! invocation per batch. Before every batch the runner samples CPU load and
//! sleeps in fixed steps while it is above the ceiling. Only one run may be
//! active per runner; a second claim fails with [`SchedulerError::Busy`]
//! instead of queueing.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::{Duration, Instant};

use quickdic_logging::targets::T_CRACK;
use tracing::{debug, info, warn};

use crate::backend::{BatchOutcome, CrackingBackend};
use crate::cancel::{cancel_sleep, CancelFlag};
use crate::cpu::{sample_or_idle, CpuSampler};
use crate::error::{Result, SchedulerError};
use crate::queue::{count_entries, BatchPlan, Candidate};

/// Wait between CPU samples while over the ceiling.
pub const CPU_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub struct RunParams {
    pub ceiling_pct: f32,
    pub batch_size: usize,
    pub inter_batch_delay: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    Idle,
    Running(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CrackOutcome {
    Found(String),
    NotFound,
    /// The run ended early on an internal failure; reported like `NotFound`.
    Error(String),
}

impl CrackOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            CrackOutcome::Found(_) => "found",
            CrackOutcome::NotFound => "not_found",
            CrackOutcome::Error(_) => "error",
        }
    }

    pub fn password(&self) -> Option<&str> {
        match self {
            CrackOutcome::Found(pw) => Some(pw),
            _ => None,
        }
    }
}

/// Result of one work unit's run. Final once returned.
#[derive(Debug, Clone, PartialEq)]
pub struct CrackAttempt {
    pub work_unit: String,
    pub target: String,
    pub outcome: CrackOutcome,
    pub elapsed: Duration,
    /// Wordlist files handed to the backend.
    pub candidates_checked: usize,
    /// Lines across those wordlists.
    pub entries_scanned: u64,
    pub invocations: usize,
}

impl CrackAttempt {
    fn new(work_unit: &str, target: &str) -> Self {
        Self {
            work_unit: work_unit.to_string(),
            target: target.to_string(),
            outcome: CrackOutcome::NotFound,
            elapsed: Duration::ZERO,
            candidates_checked: 0,
            entries_scanned: 0,
            invocations: 0,
        }
    }
}

pub struct BatchRunner {
    backend: Arc<dyn CrackingBackend>,
    sampler: RwLock<Arc<dyn CpuSampler>>,
    state: Mutex<RunState>,
    backoff: Duration,
    cancel: Option<CancelFlag>,
}

impl BatchRunner {
    pub fn new(backend: Arc<dyn CrackingBackend>, sampler: Arc<dyn CpuSampler>) -> Self {
        Self {
            backend,
            sampler: RwLock::new(sampler),
            state: Mutex::new(RunState::Idle),
            backoff: CPU_BACKOFF,
            cancel: None,
        }
    }

    /// Override the CPU backoff step.
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Abort waits when `flag` is raised (used on shutdown only).
    pub fn with_cancel_flag(mut self, flag: CancelFlag) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Swap the CPU source; takes effect at the next sample.
    pub fn set_sampler(&self, sampler: Arc<dyn CpuSampler>) {
        match self.sampler.write() {
            Ok(mut slot) => *slot = sampler,
            Err(poisoned) => *poisoned.into_inner() = sampler,
        }
    }

    pub fn state(&self) -> RunState {
        self.lock_state().clone()
    }

    pub fn is_busy(&self) -> bool {
        matches!(*self.lock_state(), RunState::Running(_))
    }

    /// Take the runner for `work_unit`. The guard releases it on drop.
    pub fn try_claim(&self, work_unit: &str) -> Result<RunGuard<'_>> {
        let mut state = self.lock_state();
        if let RunState::Running(current) = &*state {
            return Err(SchedulerError::Busy(current.clone()));
        }
        *state = RunState::Running(work_unit.to_string());
        Ok(RunGuard {
            runner: self,
            work_unit: work_unit.to_string(),
        })
    }

    /// Claim and run in one step.
    pub fn run(
        &self,
        work_unit: &str,
        capture: &Path,
        target: &str,
        candidates: &[Candidate],
        params: &RunParams,
    ) -> Result<CrackAttempt> {
        let guard = self.try_claim(work_unit)?;
        Ok(guard.run(capture, target, candidates, params))
    }

    fn lock_state(&self) -> MutexGuard<'_, RunState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn execute(
        &self,
        work_unit: &str,
        capture: &Path,
        target: &str,
        candidates: &[Candidate],
        params: &RunParams,
    ) -> CrackAttempt {
        let mut attempt = CrackAttempt::new(work_unit, target);
        if candidates.is_empty() {
            info!(target: T_CRACK, work_unit, "No wordlists available, nothing to run");
            return attempt;
        }

        let started = Instant::now();
        let plan = BatchPlan::new(candidates, params.batch_size);
        attempt.outcome = match self.drive(&plan, capture, target, params, &mut attempt) {
            Ok(outcome) => outcome,
            Err(err) => {
                warn!(target: T_CRACK, work_unit, "Run aborted: {}", err);
                CrackOutcome::Error(err.to_string())
            }
        };
        attempt.elapsed = started.elapsed();
        attempt
    }

    fn drive(
        &self,
        plan: &BatchPlan,
        capture: &Path,
        target: &str,
        params: &RunParams,
        attempt: &mut CrackAttempt,
    ) -> Result<CrackOutcome> {
        let total = plan.candidate_count();
        for (index, batch) in plan.iter().enumerate() {
            self.wait_for_cpu(params.ceiling_pct)?;

            attempt.candidates_checked += batch.len();
            attempt.entries_scanned += batch.iter().map(|c| count_entries(&c.path)).sum::<u64>();
            let progress = attempt.candidates_checked as f32 / total as f32 * 100.0;
            let names: Vec<&str> = batch.iter().map(|c| c.name.as_str()).collect();
            info!(
                target: T_CRACK,
                "Progress: {:.1}% ({}/{} wordlists), batch: {}",
                progress,
                attempt.candidates_checked,
                total,
                names.join(", ")
            );

            let paths: Vec<PathBuf> = batch.iter().map(|c| c.path.clone()).collect();
            attempt.invocations += 1;
            match self.backend.run_batch(capture, target, &paths) {
                Ok(BatchOutcome::Found(password)) => return Ok(CrackOutcome::Found(password)),
                Ok(BatchOutcome::NotFound) => debug!(target: T_CRACK, "Batch result: key not found"),
                Err(err) => warn!(target: T_CRACK, "Batch failed, treating as not found: {}", err),
            }

            if index + 1 < plan.len() {
                debug!(
                    target: T_CRACK,
                    "Waiting {}s before next batch",
                    params.inter_batch_delay.as_secs_f32()
                );
                cancel_sleep(self.cancel.as_ref(), params.inter_batch_delay)?;
            }
        }
        Ok(CrackOutcome::NotFound)
    }

    fn wait_for_cpu(&self, ceiling_pct: f32) -> Result<()> {
        loop {
            let sampler = match self.sampler.read() {
                Ok(slot) => Arc::clone(&slot),
                Err(poisoned) => Arc::clone(&poisoned.into_inner()),
            };
            let usage = sample_or_idle(sampler.as_ref());
            if usage <= ceiling_pct {
                return Ok(());
            }
            info!(
                target: T_CRACK,
                "CPU usage {:.1}% above {:.0}%, waiting",
                usage,
                ceiling_pct
            );
            cancel_sleep(self.cancel.as_ref(), self.backoff)?;
        }
    }
}

/// Exclusive hold on a [`BatchRunner`].
pub struct RunGuard<'a> {
    runner: &'a BatchRunner,
    work_unit: String,
}

impl RunGuard<'_> {
    pub fn work_unit(&self) -> &str {
        &self.work_unit
    }

    /// Run every batch to a hit or exhaustion, then release the runner.
    pub fn run(
        self,
        capture: &Path,
        target: &str,
        candidates: &[Candidate],
        params: &RunParams,
    ) -> CrackAttempt {
        self.runner
            .execute(&self.work_unit, capture, target, candidates, params)
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        *self.runner.lock_state() = RunState::Idle;
    }
}
