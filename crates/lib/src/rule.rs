//! Rules and the ordered rule registry.
//!
//! A rule binds a pattern matcher to an opaque unit of work. The registry is
//! an explicit ordered container owned by the caller (no process-wide
//! singleton): rule selection is strictly first-match-wins in registration
//! order, which gives declaration order semantic weight.

use std::fmt;
use std::sync::Arc;

use crate::matcher::{Binding, Matcher, MatcherError};

/// The opaque unit of work a rule runs for a matched target.
///
/// Handlers are blocking; the scheduler runs them on worker threads. An `Err`
/// marks the job as failed and cancels further dispatch.
pub type Handler = Arc<dyn Fn(&Binding) -> anyhow::Result<()> + Send + Sync>;

/// A handler that does nothing, for pure grouping targets.
pub fn noop_handler() -> Handler {
  Arc::new(|_| Ok(()))
}

/// A declarative build step: a matcher, a labeled handler, and whether the
/// target is phony (produces no persisted artifact).
///
/// Phony targets skip parent-directory creation before running and are
/// labeled by target name rather than handler name in progress output.
#[derive(Clone)]
pub struct Rule {
  pub matcher: Matcher,
  pub name: String,
  pub handler: Handler,
  pub phony: bool,
}

impl Rule {
  pub fn new(matcher: Matcher, name: impl Into<String>, handler: Handler) -> Self {
    Rule {
      matcher,
      name: name.into(),
      handler,
      phony: false,
    }
  }

  /// Mark the rule as producing no persisted artifact.
  pub fn phony(mut self) -> Self {
    self.phony = true;
    self
  }
}

impl fmt::Debug for Rule {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Rule")
      .field("name", &self.name)
      .field("pattern", &self.matcher.pattern())
      .field("phony", &self.phony)
      .finish_non_exhaustive()
  }
}

/// Ordered sequence of rules, populated once before resolution begins.
#[derive(Debug, Default, Clone)]
pub struct Registry {
  rules: Vec<Arc<Rule>>,
}

impl Registry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Append a rule. Registration order is selection order.
  pub fn register(&mut self, rule: Rule) {
    self.rules.push(Arc::new(rule));
  }

  /// All rules in registration order.
  pub fn rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
    self.rules.iter()
  }

  pub fn len(&self) -> usize {
    self.rules.len()
  }

  pub fn is_empty(&self) -> bool {
    self.rules.is_empty()
  }

  /// Try every rule in registration order and return the first whose matcher
  /// accepts the target, together with the binding it produced.
  pub fn first_match(&self, target: &str) -> Option<(Arc<Rule>, Binding)> {
    self
      .rules
      .iter()
      .find_map(|rule| rule.matcher.match_target(target).map(|binding| (rule.clone(), binding)))
  }

  /// Register a `%` wildcard rule.
  pub fn rule(
    &mut self,
    target: &str,
    sources: &[&str],
    name: impl Into<String>,
    handler: Handler,
  ) -> Result<(), MatcherError> {
    self.register(Rule::new(Matcher::percent(target, sources)?, name, handler));
    Ok(())
  }

  /// Register a full regular-expression rule.
  pub fn rule_regex(
    &mut self,
    target: &str,
    sources: &[&str],
    name: impl Into<String>,
    handler: Handler,
  ) -> Result<(), MatcherError> {
    self.register(Rule::new(Matcher::regex(target, sources)?, name, handler));
    Ok(())
  }

  /// Register an exact-text rule.
  pub fn rule_text(
    &mut self,
    target: &str,
    sources: &[&str],
    name: impl Into<String>,
    handler: Handler,
  ) -> Result<(), MatcherError> {
    self.register(Rule::new(Matcher::text(target, sources)?, name, handler));
    Ok(())
  }

  /// Register a phony task with no sources: always considered stale and
  /// re-run on every invocation that reaches it.
  pub fn task(&mut self, name: &str, handler: Handler) -> Result<(), MatcherError> {
    self.register(Rule::new(Matcher::text(name, &[])?, name, handler).phony());
    Ok(())
  }

  /// Register a phony grouping task: a no-op handler whose only purpose is
  /// to pull in its sources.
  pub fn phony_task(&mut self, name: &str, sources: &[&str]) -> Result<(), MatcherError> {
    self.register(Rule::new(Matcher::text(name, sources)?, name, noop_handler()).phony());
    Ok(())
  }
}
