//! Memory and swap control via cgroups v2.

use std::path::Path;

use minibox_common::error::Result;

/// Hard memory limit control file.
pub const MEMORY_MAX: &str = "memory.max";

/// Swap limit control file.
pub const SWAP_MAX: &str = "memory.swap.max";

/// Sets the hard memory limit for a cgroup.
///
/// # Errors
///
/// Returns an error if writing to `memory.max` fails.
pub fn set_memory_max(cgroup_path: &Path, bytes: u64) -> Result<()> {
    super::write_control(cgroup_path, MEMORY_MAX, &bytes.to_string())?;
    tracing::debug!(bytes, "memory max set");
    Ok(())
}

/// Forbids the cgroup from using swap.
///
/// # Errors
///
/// Returns an error if writing to `memory.swap.max` fails, e.g. when the
/// kernel was booted without swap accounting.
pub fn disable_swap(cgroup_path: &Path) -> Result<()> {
    super::write_control(cgroup_path, SWAP_MAX, "0")?;
    tracing::debug!("swap disabled");
    Ok(())
}
