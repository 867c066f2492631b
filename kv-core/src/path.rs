//! Path mapping: `(bus, ns, key) -> <base>/<bus>/<ns>/<HEXKEY>`, grounded in `get_path_str` (`kv_utils.c`). Directories are created
//! on demand on write-side calls only, never on read paths.

use std::path::{Path, PathBuf};

use crate::key::Key;

/// Maps `(bus, ns, key)` coordinates onto filesystem paths under a single
/// base directory.
#[derive(Debug, Clone)]
pub struct PathMapper {
    base_dir: PathBuf,
}

impl PathMapper {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        PathMapper {
            base_dir: base_dir.into(),
        }
    }

    /// Namespace directory `<base>/<bus>/<ns>`, without creating it.
    pub fn namespace_dir(&self, bus: u32, ns: u32) -> PathBuf {
        self.base_dir.join(bus.to_string()).join(ns.to_string())
    }

    /// Object path `<base>/<bus>/<ns>/<HEXKEY>` for a non-empty key, without
    /// creating any directory. `key` must be non-empty; use
    /// [`PathMapper::namespace_dir`] for the key-less (LIST) form.
    pub fn object_path(&self, bus: u32, ns: u32, key: &Key) -> PathBuf {
        self.namespace_dir(bus, ns).join(key.to_hex())
    }

    /// Like [`PathMapper::object_path`], but creates the namespace
    /// directory (and its parents) first. Used by every write-side
    /// operation (STORE, DELETE-adjacent existence checks are read-only and
    /// do not call this).
    pub fn object_path_create(
        &self,
        bus: u32,
        ns: u32,
        key: &Key,
    ) -> std::io::Result<PathBuf> {
        let dir = self.namespace_dir(bus, ns);
        std::fs::create_dir_all(&dir)?;
        Ok(dir.join(key.to_hex()))
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }
}
