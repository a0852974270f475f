//! Resolution and execution of build targets.
//!
//! [`execute`] is the library entry point: it resolves the requested targets
//! against a registry into a deduplicated job plan, then runs the plan with
//! bounded parallelism. Resolution and execution are separate passes; the
//! plan can also be built on its own via [`Resolver`] for dry-run style
//! inspection.

pub mod resolver;
pub mod scheduler;
pub mod types;

pub use resolver::{Job, JobId, Plan, Resolver, Stamp};
pub use types::{ExecuteConfig, ExecuteError, JobError, JobState, LogReporter, Report, Reporter, ResolveError};

use crate::fs::Filesystem;
use crate::rule::Registry;

/// Bring the requested targets up to date.
///
/// Resolves the targets into a plan, then runs every planned job in
/// dependency order with at most `config.jobs` handlers in flight. The first
/// job failure cancels dispatch of anything not yet running and is returned
/// as [`ExecuteError::JobFailed`]; a successful run returns the report with
/// every job `Done`.
pub async fn execute<F: Filesystem>(
  registry: &Registry,
  fs: &F,
  targets: &[&str],
  config: &ExecuteConfig,
  reporter: &dyn Reporter,
) -> Result<Report, ExecuteError> {
  let plan = Resolver::new(registry, fs).plan(targets)?;
  let mut report = scheduler::run(&plan, fs, config, reporter).await;

  if let Some((target, source)) = report.failure.take() {
    return Err(ExecuteError::JobFailed { target, source });
  }
  Ok(report)
}
