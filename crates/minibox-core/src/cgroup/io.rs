//! I/O bandwidth control via cgroups v2.
//!
//! `io.max` only accepts per-device entries, so the read/write caps are
//! written once for every whole-disk block device on the host.

use std::fmt;
use std::path::Path;

use minibox_common::error::Result;

/// I/O bandwidth control file.
pub const IO_MAX: &str = "io.max";

/// Where the kernel lists block devices.
pub const SYS_BLOCK: &str = "/sys/block";

/// A block device identified by its `MAJ:MIN` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockDevice {
    /// Major device number.
    pub major: u32,
    /// Minor device number.
    pub minor: u32,
}

impl BlockDevice {
    /// Parses the contents of a `/sys/block/<dev>/dev` file (`"8:0\n"`).
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.trim().split_once(':')?;
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }
}

impl fmt::Display for BlockDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.major, self.minor)
    }
}

/// Lists throttleable block devices under `sys_block`, skipping loop and
/// RAM disks.
#[must_use]
pub fn discover_block_devices(sys_block: &Path) -> Vec<BlockDevice> {
    let Ok(entries) = std::fs::read_dir(sys_block) else {
        return Vec::new();
    };
    let mut devices: Vec<_> = entries
        .filter_map(std::result::Result::ok)
        .filter(|e| {
            let name = e.file_name();
            let name = name.to_string_lossy();
            !(name.starts_with("loop") || name.starts_with("ram") || name.starts_with("zram"))
        })
        .filter_map(|e| std::fs::read_to_string(e.path().join("dev")).ok())
        .filter_map(|s| BlockDevice::parse(&s))
        .collect();
    devices.sort_by_key(|d| (d.major, d.minor));
    devices
}

/// Formats one `io.max` entry.
#[must_use]
pub fn io_max_line(device: BlockDevice, read_bps: u64, write_bps: u64) -> String {
    format!("{device} rbps={read_bps} wbps={write_bps}")
}

/// Caps read and write bandwidth on every device in `devices`.
///
/// Each entry is a separate write because the kernel parses one device
/// per write. Stops at the first rejected entry.
///
/// # Errors
///
/// Returns an error if writing to `io.max` fails.
pub fn set_io_max(
    cgroup_path: &Path,
    devices: &[BlockDevice],
    read_bps: u64,
    write_bps: u64,
) -> Result<()> {
    if devices.is_empty() {
        tracing::debug!("no block devices to throttle");
        return Ok(());
    }
    for device in devices {
        super::write_control(cgroup_path, IO_MAX, &io_max_line(*device, read_bps, write_bps))?;
    }
    tracing::debug!(devices = devices.len(), read_bps, write_bps, "I/O max set");
    Ok(())
}
