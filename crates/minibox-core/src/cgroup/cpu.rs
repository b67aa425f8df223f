//! CPU bandwidth control via cgroups v2.

use std::path::Path;

use minibox_common::error::Result;

/// Control file holding the `quota period` pair.
pub const CPU_MAX: &str = "cpu.max";

/// Caps the node at `quota_us` of CPU time in every `period_us` window.
///
/// # Errors
///
/// Returns an error if `cpu.max` cannot be written.
pub fn set_cpu_max(cgroup_path: &Path, quota_us: u64, period_us: u64) -> Result<()> {
    super::write_control(cgroup_path, CPU_MAX, &format!("{quota_us} {period_us}"))?;
    tracing::debug!(quota_us, period_us, "cpu.max written");
    Ok(())
}
