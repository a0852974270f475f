//! Staleness resolution: from requested targets to a deduplicated job DAG.
//!
//! The resolver walks targets recursively. For each target it asks the
//! timestamp provider for a baseline, picks the first matching rule, resolves
//! the rule's sources, and decides whether the target must be rebuilt. Stale
//! targets become [`Job`]s in the [`Plan`]; fresh ones contribute only their
//! timestamp to the comparison one level up.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tracing::{debug, trace};

use crate::fs::{Filesystem, Timestamp};
use crate::matcher::Binding;
use crate::rule::{Registry, Rule};

use super::types::ResolveError;

/// Index of a job within its plan.
pub type JobId = usize;

/// The effective timestamp a resolved target propagates to its dependents.
///
/// `Forced` means "this target's job is going to run, so it will be newer
/// than anything": it orders strictly greater than every `At` value, which
/// makes every dependent stale in turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stamp {
  At(Timestamp),
  Forced,
}

/// One resolved, schedulable unit of work.
#[derive(Debug, Clone)]
pub struct Job {
  pub target: String,
  pub binding: Binding,
  pub rule: Arc<Rule>,
  /// Jobs that must complete successfully before this one may start.
  pub deps: Vec<JobId>,
}

/// The deduplicated set of jobs for one resolution pass, in discovery order
/// (dependencies always precede their dependents).
///
/// Consumed exactly once by the scheduler; nothing is cached across passes.
#[derive(Debug, Default)]
pub struct Plan {
  jobs: Vec<Job>,
}

impl Plan {
  pub fn jobs(&self) -> &[Job] {
    &self.jobs
  }

  pub fn job(&self, id: JobId) -> &Job {
    &self.jobs[id]
  }

  pub fn len(&self) -> usize {
    self.jobs.len()
  }

  pub fn is_empty(&self) -> bool {
    self.jobs.is_empty()
  }

  /// The job for a target, if the plan contains one.
  pub fn find(&self, target: &str) -> Option<&Job> {
    self.jobs.iter().find(|j| j.target == target)
  }
}

/// What one `resolve` call concluded about a target. Memoized so a target
/// reached through several dependency paths resolves exactly once.
#[derive(Debug, Clone, Copy)]
struct Resolution {
  stamp: Stamp,
  job: Option<JobId>,
}

/// Builds a [`Plan`] from a registry and a timestamp provider.
///
/// Memoization is shared across all requested targets of one pass, so a
/// dependency common to two requested targets is still planned once.
pub struct Resolver<'a, F: Filesystem> {
  registry: &'a Registry,
  fs: &'a F,
  plan: Plan,
  memo: HashMap<String, Resolution>,
  in_progress: HashSet<String>,
}

impl<'a, F: Filesystem> Resolver<'a, F> {
  pub fn new(registry: &'a Registry, fs: &'a F) -> Self {
    Resolver {
      registry,
      fs,
      plan: Plan::default(),
      memo: HashMap::new(),
      in_progress: HashSet::new(),
    }
  }

  /// Resolve every requested target and return the resulting plan.
  pub fn plan(mut self, targets: &[&str]) -> Result<Plan, ResolveError> {
    for target in targets {
      self.resolve(target)?;
    }
    debug!(jobs = self.plan.len(), "resolution complete");
    Ok(self.plan)
  }

  fn resolve(&mut self, target: &str) -> Result<Resolution, ResolveError> {
    if let Some(resolution) = self.memo.get(target) {
      return Ok(*resolution);
    }
    if !self.in_progress.insert(target.to_string()) {
      return Err(ResolveError::Cycle(target.to_string()));
    }

    let result = self.resolve_fresh(target);

    self.in_progress.remove(target);
    if let Ok(resolution) = &result {
      self.memo.insert(target.to_string(), *resolution);
    }
    result
  }

  fn resolve_fresh(&mut self, target: &str) -> Result<Resolution, ResolveError> {
    let timestamp = self.fs.timestamp(target);
    let exists = timestamp.is_some();
    let baseline = Stamp::At(timestamp.unwrap_or(0));

    let Some((rule, binding)) = self.registry.first_match(target) else {
      if exists {
        // Source leaf: its real timestamp is what dependents compare against.
        trace!(target = %target, "source leaf");
        return Ok(Resolution {
          stamp: baseline,
          job: None,
        });
      }
      return Err(ResolveError::NoRule(target.to_string()));
    };

    // A rule with no inputs is always stale: this is how always-run steps
    // are expressed.
    let mut must_run = binding.sources.is_empty();
    let mut deps: Vec<JobId> = Vec::new();

    for source in &binding.sources {
      let resolved = self.resolve(source)?;
      // Forced orders above every At, so this covers both "source will be
      // rebuilt" and "source is newer than the target".
      if resolved.stamp > baseline {
        must_run = true;
      }
      if let Some(id) = resolved.job
        && !deps.contains(&id)
      {
        deps.push(id);
      }
    }

    if !must_run {
      trace!(target = %target, "up to date");
      return Ok(Resolution {
        stamp: baseline,
        job: None,
      });
    }

    let id = self.plan.jobs.len();
    debug!(target = %target, rule = %rule.name, deps = deps.len(), "job planned");
    self.plan.jobs.push(Job {
      target: target.to_string(),
      binding,
      rule,
      deps,
    });

    Ok(Resolution {
      stamp: Stamp::Forced,
      job: Some(id),
    })
  }
}
