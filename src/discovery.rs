//! Unit discovery.
//!
//! Directories are scanned non-recursively for the target's unit extensions; explicit files
//! are taken as given. Either way a unit's identity is its path relative to the test tree,
//! so skip entries and recorded failures look the same no matter how a unit was found.

use std::path::{Path, PathBuf};

use crossrun_core::UnitTrait;
use crossrun_core::unit::{derive_traits, is_special, normalize_id, unit_name};

use crate::config::HarnessConfig;
use crate::error::{HarnessError, HarnessResult};

/// One discovered test script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestUnit {
    pub path: PathBuf,
    /// Normalized path relative to the test tree (`basics/list1.py`).
    pub id: String,
    /// File stem, used in summary lines.
    pub name: String,
    /// Features the unit depends on; a skip set removes units whose traits the target lacks.
    pub traits: Vec<UnitTrait>,
    pub is_special: bool,
}

impl TestUnit {
    pub fn new(path: PathBuf, base_dir: &Path, native_emit: bool) -> Self {
        let id = identity(&path, base_dir);
        let name = unit_name(&id).to_string();
        TestUnit {
            traits: derive_traits(&name, native_emit),
            is_special: is_special(&id),
            path,
            id,
            name,
        }
    }

    /// Path as written to the failure record; rerunning passes it back as an explicit file.
    pub fn display_path(&self) -> String {
        normalize_id(&self.path.to_string_lossy())
    }
}

/// Identity of the unit at `path`.
///
/// ## Examples
/// ```rust
/// use std::path::Path;
/// use crossrun::discovery::identity;
/// assert_eq!(identity(Path::new("/src/tests/basics/list1.py"), Path::new("/src/tests")), "basics/list1.py");
/// assert_eq!(identity(Path::new("./basics/list1.py"), Path::new(".")), "basics/list1.py");
/// assert_eq!(identity(Path::new("misc/x.py"), Path::new("/elsewhere")), "misc/x.py");
/// ```
pub fn identity(path: &Path, base_dir: &Path) -> String {
    match path.strip_prefix(base_dir) {
        Ok(rel) if !rel.as_os_str().is_empty() => normalize_id(&rel.to_string_lossy()),
        _ => normalize_id(&path.to_string_lossy()),
    }
}

/// Scan `dirs` (relative to the test tree) for units.
///
/// Units are sorted within each directory; directories keep their given order.
///
/// ## Errors
/// - [`HarnessError::Discovery`] when a directory name does not form a valid scan pattern.
#[tracing::instrument(skip_all, fields(dirs = dirs.len()))]
pub fn scan_dirs(config: &HarnessConfig, dirs: &[String]) -> HarnessResult<Vec<TestUnit>> {
    let native = config.emit.is_native();
    let mut units = Vec::new();
    for dir in dirs {
        let root = config.base_dir.join(dir);
        let mut found = Vec::new();
        for ext in config.target.unit_extensions() {
            let pattern = format!("{}/*.{ext}", glob::Pattern::escape(&root.to_string_lossy()));
            let paths = glob::glob(&pattern).map_err(|e| HarnessError::Discovery(format!("{pattern}: {e}")))?;
            for entry in paths {
                match entry {
                    Ok(path) => found.push(path),
                    Err(err) => tracing::warn!(error = %err, "skipping unreadable directory entry"),
                }
            }
        }
        if found.is_empty() {
            tracing::debug!(dir = %root.display(), "no units found");
        }
        found.sort();
        units.extend(found.into_iter().map(|p| TestUnit::new(p, &config.base_dir, native)));
    }
    Ok(units)
}

/// Units for explicitly named files.
pub fn from_files(config: &HarnessConfig, files: &[PathBuf]) -> Vec<TestUnit> {
    let native = config.emit.is_native();
    files
        .iter()
        .map(|p| TestUnit::new(p.clone(), &config.base_dir, native))
        .collect()
}
