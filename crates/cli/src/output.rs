//! CLI output formatting utilities.
//!
//! Progress lines follow the `[i/n] name: files` convention: phony targets
//! are labeled by target name with their sources listed, real targets by rule
//! name with a `target <= sources` summary. Colors degrade gracefully when
//! the stream is not a terminal.

use owo_colors::{OwoColorize, Stream};

use lumake_lib::execute::{Job, JobError, Reporter};

pub mod symbols {
  pub const SUCCESS: &str = "✓";
  pub const ERROR: &str = "✗";
}

/// Prints one `[i/n]` line per dispatched job.
#[derive(Debug, Clone, Copy)]
pub struct ConsoleReporter {
  silent: bool,
}

impl ConsoleReporter {
  pub fn new(silent: bool) -> Self {
    ConsoleReporter { silent }
  }
}

impl Reporter for ConsoleReporter {
  fn job_started(&self, index: usize, total: usize, job: &Job) {
    if self.silent {
      return;
    }
    println!("[{}/{}] {}", index + 1, total, job_label(job));
  }

  fn job_finished(&self, job: &Job, error: Option<&JobError>) {
    if let Some(e) = error {
      print_error(&format!("{}: {}", job.target, e));
    }
  }
}

fn job_label(job: &Job) -> String {
  let sources = &job.binding.sources;
  if job.rule.phony {
    if sources.is_empty() {
      job.target.clone()
    } else {
      format!("{}: {}", job.target, sources.join(", "))
    }
  } else if sources.is_empty() {
    format!("{}: {}", job.rule.name, job.target)
  } else {
    format!("{}: {} <= {}", job.rule.name, job.target, sources.join(" "))
  }
}

pub fn print_success(message: &str) {
  println!(
    "{} {}",
    symbols::SUCCESS.if_supports_color(Stream::Stdout, |s| s.green()),
    message
  );
}

pub fn print_error(message: &str) {
  eprintln!(
    "{} {}",
    symbols::ERROR.if_supports_color(Stream::Stderr, |s| s.red()),
    message.if_supports_color(Stream::Stderr, |s| s.red())
  );
}
