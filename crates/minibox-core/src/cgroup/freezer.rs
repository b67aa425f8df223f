//! cgroup v2 freezer (`cgroup.freeze`).

use std::path::Path;

use minibox_common::error::{MiniboxError, Result};

const FREEZE: &str = "cgroup.freeze";

/// Reads the freeze flag of a cgroup.
///
/// # Errors
///
/// Returns an error if `cgroup.freeze` cannot be read.
pub fn is_frozen(cgroup_path: &Path) -> Result<bool> {
    let path = cgroup_path.join(FREEZE);
    let value = std::fs::read_to_string(&path).map_err(|e| MiniboxError::io(path, e))?;
    Ok(value.trim() == "1")
}

/// Sets the freeze flag, skipping the write when it already holds the
/// requested value. Returns whether a write happened.
///
/// A missing `cgroup.freeze` is treated as thawed.
///
/// # Errors
///
/// Returns an error if `cgroup.freeze` cannot be written.
pub fn set_frozen(cgroup_path: &Path, frozen: bool) -> Result<bool> {
    let current = match is_frozen(cgroup_path) {
        Ok(value) => value,
        Err(e) if e.is_not_found() => false,
        Err(e) => return Err(e),
    };
    if current == frozen {
        return Ok(false);
    }
    super::write_control(cgroup_path, FREEZE, if frozen { "1" } else { "0" })?;
    Ok(true)
}
