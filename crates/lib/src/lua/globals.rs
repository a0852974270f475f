//! The `make` global table.
//!
//! This module registers the `make` global which provides:
//! - `make.rule{}` - Declare a pattern rule
//! - `make.task{}` - Declare a phony task
//! - `make.dir` - Directory of the loaded script (set at load time)
//!
//! `make.rule{}` accepts:
//! - `target` - The target pattern (required). `%` is the wildcard; with
//!   `regex = true` the pattern is a full regular expression and sources may
//!   use `{N}` capture-group placeholders.
//! - `sources` - A string, a list of strings, or absent.
//! - `cmd` - A shell command template (`$@`, `$<`, `$^`); absent means no-op.
//! - `phony` - The target is not a file (default false).
//! - `name` - Label for progress output; defaults to the first word of `cmd`,
//!   then to the target pattern.
//!
//! `make.task{}` is shorthand for a phony rule on an exact target name.

use std::cell::RefCell;
use std::rc::Rc;

use mlua::prelude::*;

use crate::command::shell_handler;
use crate::matcher::Matcher;
use crate::rule::{Handler, Registry, Rule, noop_handler};

/// Register the `make` global table in the Lua runtime.
///
/// Both declaration functions append to the shared registry in call order,
/// preserving first-match-wins semantics across the whole script.
pub fn register_globals(lua: &Lua, registry: Rc<RefCell<Registry>>) -> LuaResult<()> {
  let make = lua.create_table()?;

  let rule_registry = registry.clone();
  let rule = lua.create_function(move |_, spec: LuaTable| {
    let target: String = spec
      .get::<Option<String>>("target")?
      .ok_or_else(|| LuaError::external("make.rule: 'target' is required"))?;
    let sources = parse_sources(spec.get("sources")?)?;
    let cmd: Option<String> = spec.get("cmd")?;
    let regex: bool = spec.get::<Option<bool>>("regex")?.unwrap_or(false);
    let phony: bool = spec.get::<Option<bool>>("phony")?.unwrap_or(false);
    let name = rule_name(spec.get("name")?, cmd.as_deref(), &target);

    let source_refs: Vec<&str> = sources.iter().map(String::as_str).collect();
    let matcher = if regex {
      Matcher::regex(&target, &source_refs)
    } else {
      Matcher::percent(&target, &source_refs)
    }
    .map_err(LuaError::external)?;

    let mut rule = Rule::new(matcher, name, handler_for(cmd));
    if phony {
      rule = rule.phony();
    }
    rule_registry.borrow_mut().register(rule);
    Ok(())
  })?;
  make.set("rule", rule)?;

  let task_registry = registry;
  let task = lua.create_function(move |_, spec: LuaTable| {
    let name: String = spec
      .get::<Option<String>>("name")?
      .ok_or_else(|| LuaError::external("make.task: 'name' is required"))?;
    let sources = parse_sources(spec.get("sources")?)?;
    let cmd: Option<String> = spec.get("cmd")?;

    let source_refs: Vec<&str> = sources.iter().map(String::as_str).collect();
    let matcher = Matcher::text(&name, &source_refs).map_err(LuaError::external)?;

    task_registry
      .borrow_mut()
      .register(Rule::new(matcher, name, handler_for(cmd)).phony());
    Ok(())
  })?;
  make.set("task", task)?;

  lua.globals().set("make", make)?;

  Ok(())
}

/// Accept a source list given as nothing, a single string, or a sequence.
fn parse_sources(value: LuaValue) -> LuaResult<Vec<String>> {
  match value {
    LuaValue::Nil => Ok(Vec::new()),
    LuaValue::String(s) => Ok(vec![s.to_str()?.to_string()]),
    LuaValue::Table(t) => {
      let mut sources = Vec::with_capacity(t.raw_len());
      for entry in t.sequence_values::<String>() {
        sources.push(entry?);
      }
      Ok(sources)
    }
    other => Err(LuaError::external(format!(
      "'sources' must be a string or a list of strings, got {}",
      other.type_name()
    ))),
  }
}

fn rule_name(explicit: Option<String>, cmd: Option<&str>, target: &str) -> String {
  if let Some(name) = explicit {
    return name;
  }
  if let Some(word) = cmd.and_then(|c| c.split_whitespace().next()) {
    return word.to_string();
  }
  target.to_string()
}

fn handler_for(cmd: Option<String>) -> Handler {
  match cmd {
    Some(cmd) => shell_handler(cmd),
    None => noop_handler(),
  }
}
