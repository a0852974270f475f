//! Types for plan resolution and execution.
//!
//! This module defines the error types, per-job states, the execution report,
//! and the configuration and progress-reporting surfaces of the scheduler.

use thiserror::Error;

use super::resolver::Job;

/// Errors raised while resolving targets into a build plan.
///
/// Resolution failures are fatal for the whole call and are raised before any
/// job runs.
#[derive(Debug, Error)]
pub enum ResolveError {
  /// The target matches no rule and does not exist as a file.
  #[error("no rule to make target '{0}'")]
  NoRule(String),

  /// The target is reachable from its own resolution.
  #[error("dependency cycle detected at target '{0}'")]
  Cycle(String),
}

/// Why a single job failed.
#[derive(Debug, Error)]
pub enum JobError {
  /// The rule's handler returned an error.
  #[error("{0}")]
  Handler(#[source] anyhow::Error),

  /// The rule's handler panicked on its worker thread.
  #[error("handler panicked: {0}")]
  Panic(String),

  /// Parent directories for the target could not be created.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),
}

/// Errors surfaced by [`execute`](super::execute).
///
/// At most one representative job failure is surfaced per call; concurrent
/// additional failures are logged by the scheduler.
#[derive(Debug, Error)]
pub enum ExecuteError {
  #[error(transparent)]
  Resolve(#[from] ResolveError),

  /// The first recorded handler failure, with its job's target.
  #[error("target '{target}': {source}")]
  JobFailed {
    target: String,
    #[source]
    source: JobError,
  },
}

/// Lifecycle of a job within one scheduler run.
///
/// `Pending → Ready → Running → {Done | Failed}`; jobs that never became
/// ready before cancellation finish as `Skipped`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
  Pending,
  Ready,
  Running,
  Done,
  Failed,
  Skipped,
}

impl JobState {
  pub fn is_terminal(self) -> bool {
    matches!(self, JobState::Done | JobState::Failed | JobState::Skipped)
  }
}

/// Outcome of one scheduler run over a build plan.
#[derive(Debug, Default)]
pub struct Report {
  /// Final state of every job, in plan order.
  pub jobs: Vec<(String, JobState)>,

  /// The first recorded failure, if any (subsequent failures are logged).
  pub failure: Option<(String, JobError)>,
}

impl Report {
  /// True when every job completed successfully.
  pub fn is_success(&self) -> bool {
    self.failure.is_none() && self.jobs.iter().all(|(_, s)| *s == JobState::Done)
  }

  /// Final state of the job for a target, if the plan contained one.
  pub fn state(&self, target: &str) -> Option<JobState> {
    self.jobs.iter().find(|(t, _)| t == target).map(|(_, s)| *s)
  }

  pub fn completed(&self) -> usize {
    self.jobs.iter().filter(|(_, s)| *s == JobState::Done).count()
  }

  pub fn skipped(&self) -> usize {
    self.jobs.iter().filter(|(_, s)| *s == JobState::Skipped).count()
  }
}

/// Configuration for plan execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Maximum number of handlers to run in parallel. 1 degenerates to
  /// strictly sequential, dependency-ordered execution.
  pub jobs: usize,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self { jobs: num_cpus() }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Observer for job dispatch and completion.
///
/// Called from the dispatch loop only, never from worker threads, so
/// implementations see dispatch order. The CLI uses this for `[i/n]`
/// progress lines; tests use it to instrument scheduling order.
pub trait Reporter: Send + Sync {
  /// A job was handed to a worker. `index` counts dispatches from zero;
  /// `total` is the plan size.
  fn job_started(&self, index: usize, total: usize, job: &Job) {
    let _ = (index, total, job);
  }

  /// A job's handler finished, successfully or not.
  fn job_finished(&self, job: &Job, error: Option<&JobError>) {
    let _ = (job, error);
  }
}

/// A reporter that only emits tracing events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

impl Reporter for LogReporter {
  fn job_started(&self, index: usize, total: usize, job: &Job) {
    tracing::info!(target = %job.target, index = index + 1, total, "job started");
  }

  fn job_finished(&self, job: &Job, error: Option<&JobError>) {
    match error {
      None => tracing::info!(target = %job.target, "job finished"),
      Some(e) => tracing::error!(target = %job.target, error = %e, "job failed"),
    }
  }
}
