use std::cell::RefCell;
use std::path::Path;
use std::rc::Rc;

use mlua::prelude::*;

use crate::lua::globals;
use crate::rule::Registry;

/// Create a new Lua runtime environment with standard settings.
/// Registers the `make` global table bound to the given registry.
/// Returns the initialized Lua instance.
pub fn create_runtime(registry: Rc<RefCell<Registry>>) -> LuaResult<Lua> {
  let lua = Lua::new();
  globals::register_globals(&lua, registry)?;
  Ok(lua)
}

/// Load and execute a Lua file at the given path.
/// Sets the `make.dir` global to the directory of the loaded file.
pub fn load_file(lua: &Lua, path: &Path) -> LuaResult<()> {
  let canonical_path = path
    .canonicalize()
    .map_err(|e| LuaError::external(format!("cannot open '{}': {}", path.display(), e)))?;
  let content = std::fs::read_to_string(&canonical_path)
    .map_err(|e| LuaError::external(format!("cannot read '{}': {}", canonical_path.display(), e)))?;

  let make_globals = lua.globals().get::<LuaTable>("make")?;
  make_globals.set(
    "dir",
    canonical_path
      .parent()
      .unwrap_or(Path::new(""))
      .to_string_lossy()
      .to_string(),
  )?;

  lua
    .load(&content)
    .set_name(format!("@{}", canonical_path.display()))
    .exec()
}
