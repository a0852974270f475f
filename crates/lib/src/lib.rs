//! lumake-lib: Core types and logic for lumake
//!
//! This crate provides the building blocks of the build orchestrator:
//! - `Matcher`/`Binding`: the rule pattern language (exact text, `%` wildcard, regex)
//! - `Rule`/`Registry`: declarative build steps tried in first-match-wins order
//! - `Filesystem`: the timestamp-provider boundary the resolver builds on
//! - `execute`: staleness resolution into a job DAG and its bounded-parallel execution
//! - `lua`: loading rule declarations from a `Makefile.lua` script

pub mod command;
pub mod execute;
pub mod fs;
pub mod lua;
pub mod matcher;
pub mod rule;

pub use execute::{ExecuteConfig, ExecuteError, Job, JobState, Plan, Report, Reporter, Resolver, execute};
pub use fs::{Filesystem, MemoryFilesystem, OsFilesystem, Timestamp};
pub use lua::{ScriptError, load_rules};
pub use matcher::{Binding, Matcher, MatcherError};
pub use rule::{Handler, Registry, Rule};
