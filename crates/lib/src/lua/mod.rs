//! Lua runtime and rule loading.
//!
//! This module provides the Lua execution environment for `Makefile.lua`
//! scripts. It manages the VM lifecycle, registers the `make` global table,
//! and evaluates the user's script into a populated [`Registry`].
//!
//! # Submodules
//!
//! - [`globals`] - The `make` global table (`make.rule{}`, `make.task{}`)
//! - [`runtime`] - Low-level Lua VM management

pub mod globals;
pub mod runtime;

use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use thiserror::Error;
use tracing::debug;

use crate::rule::Registry;

/// Errors raised while loading a rule script.
#[derive(Debug, Error)]
pub enum ScriptError {
  #[error(transparent)]
  Lua(#[from] mlua::Error),
}

/// Evaluate a `Makefile.lua` script and return the registry it populated.
///
/// The script declares rules through the `make` global; declaration order in
/// the script is registration order in the registry. The VM is dropped before
/// returning, so the registry has no remaining ties to Lua.
pub fn load_rules(path: &Path) -> Result<Registry, ScriptError> {
  let registry = Rc::new(RefCell::new(Registry::new()));

  let lua = runtime::create_runtime(registry.clone())?;
  runtime::load_file(&lua, path)?;
  drop(lua);

  let registry = Rc::try_unwrap(registry)
    .map(RefCell::into_inner)
    .unwrap_or_else(|shared| shared.borrow().clone());
  debug!(rules = registry.len(), script = %path.display(), "script loaded");
  Ok(registry)
}

#[cfg(test)]
mod tests {
  use super::*;
  use tempfile::TempDir;

  fn write_script(dir: &TempDir, content: &str) -> std::path::PathBuf {
    let path = dir.path().join("Makefile.lua");
    std::fs::write(&path, content).unwrap();
    path
  }

  #[test]
  fn loads_rules_in_declaration_order() {
    let dir = TempDir::new().unwrap();
    let path = write_script(
      &dir,
      r#"
        make.rule { target = "%.o", sources = "%.c", cmd = "cc -c $< -o $@" }
        make.rule { target = "app", sources = { "main.o", "util.o" }, cmd = "cc $^ -o $@" }
        make.task { name = "all", sources = "app" }
      "#,
    );

    let registry = load_rules(&path).unwrap();

    let names: Vec<String> = registry.rules().map(|r| r.name.clone()).collect();
    assert_eq!(names, vec!["cc", "cc", "all"]);

    let (_, binding) = registry.first_match("main.o").unwrap();
    assert_eq!(binding.sources, vec!["main.c"]);
  }

  #[test]
  fn missing_script_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("absent.lua");

    assert!(load_rules(&path).is_err());
  }

  #[test]
  fn script_error_carries_chunk_name() {
    let dir = TempDir::new().unwrap();
    let path = write_script(&dir, "make.rule { }");

    let err = load_rules(&path).unwrap_err();
    assert!(err.to_string().contains("target"), "{err}");
  }
}
