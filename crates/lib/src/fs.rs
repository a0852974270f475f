//! The timestamp-provider boundary.
//!
//! The resolver and scheduler never touch the filesystem directly; they go
//! through [`Filesystem`], which answers two questions: does a path exist
//! (and when was it last modified), and can the parent directories of a path
//! be created before a rule writes to it. Implementations must be safe for
//! concurrent use; workers query timestamps in parallel.

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::UNIX_EPOCH;

/// Last-modified time. For the real filesystem this is nanoseconds since the
/// Unix epoch; tests and embedders may use any monotonic scale.
pub type Timestamp = u64;

/// Timestamp provider and parent-directory creator.
pub trait Filesystem: Send + Sync {
  /// The path's last-modified time, or `None` if it does not exist.
  fn timestamp(&self, path: &str) -> Option<Timestamp>;

  /// Create the path's parent directories if they are missing.
  fn ensure_parents(&self, path: &str) -> io::Result<()>;
}

/// The real filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct OsFilesystem;

impl Filesystem for OsFilesystem {
  fn timestamp(&self, path: &str) -> Option<Timestamp> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.duration_since(UNIX_EPOCH).ok().map(|d| d.as_nanos() as Timestamp)
  }

  fn ensure_parents(&self, path: &str) -> io::Result<()> {
    if let Some(parent) = Path::new(path).parent()
      && !parent.as_os_str().is_empty()
    {
      std::fs::create_dir_all(parent)?;
    }
    Ok(())
  }
}

/// An in-memory timestamp map, for tests and embedders.
///
/// Clones share the same underlying map, so a handler can hold a clone and
/// record the artifacts it "writes" while the resolver reads through another.
#[derive(Debug, Default, Clone)]
pub struct MemoryFilesystem {
  entries: Arc<Mutex<HashMap<String, Timestamp>>>,
}

impl MemoryFilesystem {
  pub fn new() -> Self {
    Self::default()
  }

  /// Build a filesystem pre-populated with the given paths and timestamps.
  pub fn with(entries: &[(&str, Timestamp)]) -> Self {
    let fs = Self::new();
    for (path, ts) in entries {
      fs.set(path, *ts);
    }
    fs
  }

  /// Create or update a path's timestamp.
  pub fn set(&self, path: &str, timestamp: Timestamp) {
    self.entries.lock().unwrap().insert(path.to_string(), timestamp);
  }

  /// Remove a path.
  pub fn remove(&self, path: &str) {
    self.entries.lock().unwrap().remove(path);
  }
}

impl Filesystem for MemoryFilesystem {
  fn timestamp(&self, path: &str) -> Option<Timestamp> {
    self.entries.lock().unwrap().get(path).copied()
  }

  fn ensure_parents(&self, _path: &str) -> io::Result<()> {
    Ok(())
  }
}
