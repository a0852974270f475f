//! lumake: a dependency-driven command runner scripted in Lua.
//!
//! Loads rule declarations from a `Makefile.lua`, resolves the requested
//! targets against file timestamps, and runs the stale jobs with bounded
//! parallelism.

mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use lumake_lib::execute::{ExecuteConfig, execute};
use lumake_lib::fs::OsFilesystem;
use lumake_lib::lua;

use output::ConsoleReporter;

#[derive(Parser)]
#[command(name = "lumake")]
#[command(author, version, about = "Dependency-driven command runner scripted in Lua", long_about = None)]
struct Cli {
  /// Targets to bring up to date
  #[arg(default_value = "all")]
  targets: Vec<String>,

  /// Maximum number of jobs to run in parallel (defaults to logical CPUs)
  #[arg(short, long)]
  jobs: Option<usize>,

  /// Rule script to load
  #[arg(short, long, default_value = "Makefile.lua")]
  file: PathBuf,

  /// Change to this directory before doing anything
  #[arg(short = 'C', long = "directory")]
  directory: Option<PathBuf>,

  /// Suppress per-job progress lines
  #[arg(short, long)]
  silent: bool,
}

// Lua errors are not Sync, so they cross into anyhow by message.
fn map_script_err<T>(result: std::result::Result<T, lumake_lib::ScriptError>) -> Result<T> {
  result.map_err(|e| anyhow::anyhow!("{}", e))
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .without_time()
    .init();

  let cli = Cli::parse();

  if let Some(dir) = &cli.directory {
    std::env::set_current_dir(dir).with_context(|| format!("cannot enter directory '{}'", dir.display()))?;
  }

  let registry = map_script_err(lua::load_rules(&cli.file))?;

  let mut config = ExecuteConfig::default();
  if let Some(jobs) = cli.jobs {
    config.jobs = jobs.max(1);
  }

  let targets: Vec<&str> = cli.targets.iter().map(String::as_str).collect();
  let reporter = ConsoleReporter::new(cli.silent);

  let rt = tokio::runtime::Runtime::new().context("failed to create async runtime")?;
  match rt.block_on(execute(&registry, &OsFilesystem, &targets, &config, &reporter)) {
    Ok(report) => {
      if cli.silent {
        return Ok(());
      }
      if report.jobs.is_empty() {
        println!("lumake: '{}' is up to date", cli.targets.join("', '"));
      } else {
        output::print_success(&format!("built {} target(s)", report.completed()));
      }
      Ok(())
    }
    Err(e) => {
      output::print_error(&format!("{e:#}"));
      std::process::exit(1);
    }
  }
}
