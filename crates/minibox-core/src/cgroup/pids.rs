//! Process-count control via cgroups v2.

use std::path::Path;

use minibox_common::error::Result;

/// Process-count limit control file.
pub const PIDS_MAX: &str = "pids.max";

/// Caps the number of tasks that may exist in the cgroup at once.
///
/// # Errors
///
/// Returns an error if writing to `pids.max` fails.
pub fn set_pids_max(cgroup_path: &Path, max: u64) -> Result<()> {
    super::write_control(cgroup_path, PIDS_MAX, &max.to_string())?;
    tracing::debug!(max, "pids max set");
    Ok(())
}
