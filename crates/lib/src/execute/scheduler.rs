//! Bounded-parallel execution of a build plan.
//!
//! Dispatch is gated on a per-job remaining-dependency count: a job enters
//! the ready queue only when its last dependency has completed successfully,
//! so a dependent can never start before its dependencies regardless of
//! worker count or discovery order. At most N handlers are in flight at a
//! time; handlers are opaque blocking units of work and run on worker
//! threads via `spawn_blocking`.
//!
//! All scheduling state (states, counts, ready queue) is owned by the single
//! dispatch loop, which also makes cancellation cooperative by construction:
//! the first failure is recorded between dispatch decisions and simply stops
//! further dispatch while in-flight handlers run to completion.

use std::collections::VecDeque;

use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::fs::Filesystem;

use super::resolver::{JobId, Plan};
use super::types::{ExecuteConfig, JobError, JobState, Report, Reporter};

/// Run every job in the plan, respecting dependency order, with at most
/// `config.jobs` handlers running concurrently.
///
/// Returns once the pool has drained: either every job is `Done`, or the
/// first failure has been recorded and everything that never became ready is
/// `Skipped`. Jobs already running when the failure occurs finish and have
/// their outcome recorded.
pub async fn run<F: Filesystem>(plan: &Plan, fs: &F, config: &ExecuteConfig, reporter: &dyn Reporter) -> Report {
  let total = plan.len();
  let workers = config.jobs.max(1);

  info!(jobs = total, workers, "executing plan");

  let mut states = vec![JobState::Pending; total];
  let mut remaining: Vec<usize> = plan.jobs().iter().map(|job| job.deps.len()).collect();

  // Reverse edges: who to promote when a job completes.
  let mut dependents: Vec<Vec<JobId>> = vec![Vec::new(); total];
  for (id, job) in plan.jobs().iter().enumerate() {
    for &dep in &job.deps {
      dependents[dep].push(id);
    }
  }

  let mut ready: VecDeque<JobId> = VecDeque::new();
  for id in 0..total {
    if remaining[id] == 0 {
      states[id] = JobState::Ready;
      ready.push_back(id);
    }
  }

  let mut join_set: JoinSet<(JobId, Result<(), JobError>)> = JoinSet::new();
  let mut running = 0usize;
  let mut dispatched = 0usize;
  let mut failure: Option<(String, JobError)> = None;

  loop {
    // Dispatch until the pool is full, the ready queue is empty, or the
    // plan has been cancelled.
    while failure.is_none() && running < workers {
      let Some(id) = ready.pop_front() else { break };
      let job = plan.job(id);

      if !job.rule.phony
        && let Err(e) = fs.ensure_parents(&job.target)
      {
        states[id] = JobState::Failed;
        record_failure(&mut failure, &job.target, JobError::Io(e));
        break;
      }

      reporter.job_started(dispatched, total, job);
      dispatched += 1;
      states[id] = JobState::Running;
      running += 1;
      debug!(target = %job.target, "dispatching job");

      let rule = job.rule.clone();
      let binding = job.binding.clone();
      join_set.spawn(async move {
        let outcome = match tokio::task::spawn_blocking(move || (rule.handler)(&binding)).await {
          Ok(Ok(())) => Ok(()),
          Ok(Err(e)) => Err(JobError::Handler(e)),
          Err(join_err) => Err(JobError::Panic(join_err.to_string())),
        };
        (id, outcome)
      });
    }

    if running == 0 {
      break;
    }

    match join_set.join_next().await {
      Some(Ok((id, outcome))) => {
        running -= 1;
        let job = plan.job(id);
        reporter.job_finished(job, outcome.as_ref().err());

        match outcome {
          Ok(()) => {
            debug!(target = %job.target, "job done");
            states[id] = JobState::Done;
            for &dependent in &dependents[id] {
              remaining[dependent] -= 1;
              if remaining[dependent] == 0 && states[dependent] == JobState::Pending {
                states[dependent] = JobState::Ready;
                ready.push_back(dependent);
              }
            }
          }
          Err(e) => {
            states[id] = JobState::Failed;
            record_failure(&mut failure, &job.target, e);
          }
        }
      }
      Some(Err(join_err)) => {
        // The wrapper task itself cannot panic; keep the pool consistent
        // regardless.
        error!(error = %join_err, "worker task failed");
        running = running.saturating_sub(1);
      }
      None => break,
    }
  }

  // Anything not terminal never ran.
  for state in &mut states {
    if !state.is_terminal() {
      *state = JobState::Skipped;
    }
  }

  let jobs = plan
    .jobs()
    .iter()
    .zip(states)
    .map(|(job, state)| (job.target.clone(), state))
    .collect();

  if let Some((target, _)) = &failure {
    info!(failed = %target, "plan cancelled after failure");
  } else {
    info!(completed = total, "plan complete");
  }

  Report { jobs, failure }
}

/// Record the first failure; later ones are logged only, never swallowed
/// silently but not surfaced to the caller.
fn record_failure(slot: &mut Option<(String, JobError)>, target: &str, error: JobError) {
  error!(target = %target, error = %error, "job failed");
  if slot.is_none() {
    *slot = Some((target.to_string(), error));
  }
}

#[cfg(test)]
mod tests {
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::sync::{Arc, Mutex};
  use std::time::Duration;

  use super::*;
  use crate::execute::resolver::Resolver;
  use crate::fs::{MemoryFilesystem, Timestamp};
  use crate::matcher::Matcher;
  use crate::rule::{Handler, Registry, Rule, noop_handler};
  use crate::execute::types::LogReporter;

  /// Shared log of handler start/finish events, in observed order.
  type EventLog = Arc<Mutex<Vec<String>>>;

  fn logging_handler(log: EventLog, name: &str, work: Duration) -> Handler {
    let name = name.to_string();
    Arc::new(move |_| {
      log.lock().unwrap().push(format!("start {}", name));
      std::thread::sleep(work);
      log.lock().unwrap().push(format!("finish {}", name));
      Ok(())
    })
  }

  fn failing_handler(log: EventLog, name: &str) -> Handler {
    let name = name.to_string();
    Arc::new(move |_| {
      log.lock().unwrap().push(format!("start {}", name));
      anyhow::bail!("{} failed on purpose", name)
    })
  }

  fn plan_for(registry: &Registry, fs: &MemoryFilesystem, targets: &[&str]) -> Plan {
    Resolver::new(registry, fs).plan(targets).unwrap()
  }

  async fn run_plan(plan: &Plan, fs: &MemoryFilesystem, jobs: usize) -> Report {
    run(plan, fs, &ExecuteConfig { jobs }, &LogReporter).await
  }

  #[tokio::test]
  async fn empty_plan_is_a_noop() {
    let fs = MemoryFilesystem::new();
    let report = run_plan(&Plan::default(), &fs, 4).await;

    assert!(report.is_success());
    assert!(report.jobs.is_empty());
  }

  #[tokio::test]
  async fn dependency_finishes_before_dependent_starts() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut registry = Registry::new();
    registry.register(
      Rule::new(
        Matcher::text("compile", &[]).unwrap(),
        "compile",
        logging_handler(log.clone(), "compile", Duration::from_millis(200)),
      )
      .phony(),
    );
    registry.register(
      Rule::new(
        Matcher::text("link", &["compile"]).unwrap(),
        "link",
        logging_handler(log.clone(), "link", Duration::ZERO),
      )
      .phony(),
    );

    let fs = MemoryFilesystem::new();
    let plan = plan_for(&registry, &fs, &["link"]);
    let report = run_plan(&plan, &fs, 4).await;

    assert!(report.is_success());
    let events = log.lock().unwrap().clone();
    let finish_compile = events.iter().position(|e| e == "finish compile").unwrap();
    let start_link = events.iter().position(|e| e == "start link").unwrap();
    assert!(
      finish_compile < start_link,
      "link started before compile finished: {:?}",
      events
    );
  }

  #[tokio::test]
  async fn independent_jobs_run_in_parallel() {
    // Each handler waits until the other has started; with two workers both
    // can be in flight at once and the plan completes.
    let started = Arc::new([AtomicUsize::new(0), AtomicUsize::new(0)]);

    let mut registry = Registry::new();
    for i in 0..2 {
      let started = started.clone();
      registry.register(
        Rule::new(
          Matcher::text(&format!("task{}", i), &[]).unwrap(),
          format!("task{}", i),
          Arc::new(move |_| {
            started[i].store(1, Ordering::SeqCst);
            let other = 1 - i;
            for _ in 0..500 {
              if started[other].load(Ordering::SeqCst) == 1 {
                return Ok(());
              }
              std::thread::sleep(Duration::from_millis(10));
            }
            anyhow::bail!("peer never started")
          }),
        )
        .phony(),
      );
    }
    registry.phony_task("all", &["task0", "task1"]).unwrap();

    let fs = MemoryFilesystem::new();
    let plan = plan_for(&registry, &fs, &["all"]);
    let report = run_plan(&plan, &fs, 2).await;

    assert!(report.is_success(), "failure: {:?}", report.failure);
  }

  #[tokio::test]
  async fn sequential_execution_with_one_worker() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut registry = Registry::new();
    for name in ["a", "b", "c"] {
      registry.register(
        Rule::new(
          Matcher::text(name, &[]).unwrap(),
          name,
          logging_handler(log.clone(), name, Duration::from_millis(10)),
        )
        .phony(),
      );
    }
    registry.phony_task("all", &["a", "b", "c"]).unwrap();

    let fs = MemoryFilesystem::new();
    let plan = plan_for(&registry, &fs, &["all"]);
    let report = run_plan(&plan, &fs, 1).await;

    assert!(report.is_success());
    // With one worker, starts and finishes never interleave.
    let events = log.lock().unwrap().clone();
    for pair in events.chunks(2) {
      assert_eq!(pair[0].replace("start", "finish"), pair[1]);
    }
  }

  #[tokio::test]
  async fn handler_runs_at_most_once_per_job() {
    let count = Arc::new(AtomicUsize::new(0));

    let mut registry = Registry::new();
    let counter = count.clone();
    registry.register(
      Rule::new(
        Matcher::regex("d", &[]).unwrap(),
        "make_d",
        Arc::new(move |_| {
          counter.fetch_add(1, Ordering::SeqCst);
          Ok(())
        }),
      )
      .phony(),
    );
    registry.rule_regex("b", &["d"], "make_b", noop_handler()).unwrap();
    registry.rule_regex("c", &["d"], "make_c", noop_handler()).unwrap();
    registry.rule_regex("a", &["b", "c"], "make_a", noop_handler()).unwrap();

    let fs = MemoryFilesystem::new();
    let plan = plan_for(&registry, &fs, &["a"]);
    let report = run_plan(&plan, &fs, 4).await;

    assert!(report.is_success());
    assert_eq!(count.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn first_failure_cancels_further_dispatch() {
    // Two kinds of independent jobs: slow ones that succeed and fast ones
    // that fail. With two workers, one of each is dispatched; the failure
    // must suppress every later sibling while the slow job finishes.
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut registry = Registry::new();
    let slow_log = log.clone();
    registry.register(
      Rule::new(
        Matcher::percent("slow%", &[]).unwrap(),
        "slow",
        Arc::new(move |binding| {
          slow_log.lock().unwrap().push(format!("start {}", binding.target));
          std::thread::sleep(Duration::from_millis(300));
          slow_log.lock().unwrap().push(format!("finish {}", binding.target));
          Ok(())
        }),
      )
      .phony(),
    );
    let fail_log = log.clone();
    registry.register(
      Rule::new(
        Matcher::percent("fail%", &[]).unwrap(),
        "fail",
        Arc::new(move |binding| {
          fail_log.lock().unwrap().push(format!("start {}", binding.target));
          anyhow::bail!("exception on purpose")
        }),
      )
      .phony(),
    );
    registry
      .phony_task("all", &["slow_1", "fail_1", "slow_2", "fail_2", "slow_3", "fail_3"])
      .unwrap();

    let fs = MemoryFilesystem::new();
    let plan = plan_for(&registry, &fs, &["all"]);
    let report = run_plan(&plan, &fs, 2).await;

    let (failed_target, _) = report.failure.as_ref().unwrap();
    assert_eq!(failed_target, "fail_1");

    let events = log.lock().unwrap().clone();
    let slow_starts = events.iter().filter(|e| e.starts_with("start slow")).count();
    let fail_starts = events.iter().filter(|e| e.starts_with("start fail")).count();
    assert_eq!(slow_starts, 1, "events: {:?}", events);
    assert_eq!(fail_starts, 1, "events: {:?}", events);

    // The in-flight slow job ran to completion.
    assert!(events.contains(&"finish slow_1".to_string()));

    assert_eq!(report.state("slow_1"), Some(JobState::Done));
    assert_eq!(report.state("fail_1"), Some(JobState::Failed));
    for target in ["slow_2", "fail_2", "slow_3", "fail_3", "all"] {
      assert_eq!(report.state(target), Some(JobState::Skipped), "target: {}", target);
    }
  }

  #[tokio::test]
  async fn dependent_of_failed_job_is_skipped() {
    let log: EventLog = Arc::new(Mutex::new(Vec::new()));

    let mut registry = Registry::new();
    registry.register(
      Rule::new(Matcher::text("broken", &[]).unwrap(), "broken", failing_handler(log.clone(), "broken")).phony(),
    );
    registry.phony_task("top", &["broken"]).unwrap();

    let fs = MemoryFilesystem::new();
    let plan = plan_for(&registry, &fs, &["top"]);
    let report = run_plan(&plan, &fs, 4).await;

    assert_eq!(report.state("broken"), Some(JobState::Failed));
    assert_eq!(report.state("top"), Some(JobState::Skipped));
    assert_eq!(report.completed(), 0);
  }

  #[tokio::test]
  async fn reporter_sees_dispatch_order_and_outcomes() {
    struct Recording {
      started: Mutex<Vec<(usize, usize, String)>>,
      finished: Mutex<Vec<(String, bool)>>,
    }

    impl Reporter for Recording {
      fn job_started(&self, index: usize, total: usize, job: &crate::execute::resolver::Job) {
        self.started.lock().unwrap().push((index, total, job.target.clone()));
      }

      fn job_finished(&self, job: &crate::execute::resolver::Job, error: Option<&JobError>) {
        self.finished.lock().unwrap().push((job.target.clone(), error.is_none()));
      }
    }

    let mut registry = Registry::new();
    registry.task("setup", noop_handler()).unwrap();
    registry.phony_task("all", &["setup"]).unwrap();

    let fs = MemoryFilesystem::new();
    let plan = plan_for(&registry, &fs, &["all"]);

    let reporter = Recording {
      started: Mutex::new(Vec::new()),
      finished: Mutex::new(Vec::new()),
    };
    let report = run(&plan, &fs, &ExecuteConfig { jobs: 1 }, &reporter).await;

    assert!(report.is_success());
    assert_eq!(
      *reporter.started.lock().unwrap(),
      vec![(0, 2, "setup".to_string()), (1, 2, "all".to_string())]
    );
    assert_eq!(
      *reporter.finished.lock().unwrap(),
      vec![("setup".to_string(), true), ("all".to_string(), true)]
    );
  }

  #[tokio::test]
  async fn parent_directories_are_ensured_for_real_targets_only() {
    #[derive(Default)]
    struct RecordingFs {
      inner: MemoryFilesystem,
      ensured: Mutex<Vec<String>>,
    }

    impl crate::fs::Filesystem for RecordingFs {
      fn timestamp(&self, path: &str) -> Option<Timestamp> {
        self.inner.timestamp(path)
      }

      fn ensure_parents(&self, path: &str) -> std::io::Result<()> {
        self.ensured.lock().unwrap().push(path.to_string());
        Ok(())
      }
    }

    let mut registry = Registry::new();
    registry.rule("build/%.o", &["%.c"], "compile", noop_handler()).unwrap();
    registry.phony_task("all", &["build/test.o"]).unwrap();

    let fs = RecordingFs::default();
    fs.inner.set("test.c", 100);

    let plan = Resolver::new(&registry, &fs).plan(&["all"]).unwrap();
    let report = run(&plan, &fs, &ExecuteConfig { jobs: 2 }, &LogReporter).await;

    assert!(report.is_success());
    // Only the real artifact got its parents created, not the phony target.
    assert_eq!(*fs.ensured.lock().unwrap(), vec!["build/test.o".to_string()]);
  }

  #[tokio::test]
  async fn panicking_handler_is_a_job_failure() {
    let mut registry = Registry::new();
    registry.register(
      Rule::new(
        Matcher::text("explode", &[]).unwrap(),
        "explode",
        Arc::new(|_| panic!("kaboom")),
      )
      .phony(),
    );

    let fs = MemoryFilesystem::new();
    let plan = plan_for(&registry, &fs, &["explode"]);
    let report = run_plan(&plan, &fs, 1).await;

    assert_eq!(report.state("explode"), Some(JobState::Failed));
    let (target, error) = report.failure.unwrap();
    assert_eq!(target, "explode");
    assert!(matches!(error, JobError::Panic(_)));
  }
}
