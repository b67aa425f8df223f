//! Domain primitive types used across the minibox workspace.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::MiniboxError;

/// Identity of a container: the host-visible PID of its init process.
///
/// Only unique while the process is alive. A stale ledger entry may refer
/// to a PID the kernel has since handed to an unrelated process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContainerId(u32);

impl ContainerId {
    /// Wraps a host PID.
    #[must_use]
    pub const fn new(pid: u32) -> Self {
        Self(pid)
    }

    /// Returns the host PID.
    #[must_use]
    pub const fn pid(self) -> u32 {
        self.0
    }

    /// Returns the PID as the signed type the kernel APIs expect.
    #[must_use]
    #[allow(clippy::cast_possible_wrap)]
    pub const fn as_raw(self) -> i32 {
        self.0 as i32
    }
}

impl fmt::Display for ContainerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ContainerId {
    type Err = MiniboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().parse::<u32>() {
            Ok(pid) if pid > 0 => Ok(Self(pid)),
            _ => Err(MiniboxError::Config {
                message: format!("invalid PID: {s}"),
            }),
        }
    }
}

/// Resource limits programmed into a container's cgroup node.
///
/// Swap is not configurable: containers never swap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Hard memory cap written to `memory.max`.
    pub memory_limit_bytes: u64,
    /// CPU time allowed per period, in microseconds.
    pub cpu_quota_micros: u64,
    /// CPU accounting period, in microseconds.
    pub cpu_period_micros: u64,
    /// Read bandwidth cap per block device, in bytes per second.
    pub io_read_bps: u64,
    /// Write bandwidth cap per block device, in bytes per second.
    pub io_write_bps: u64,
    /// Maximum number of processes written to `pids.max`.
    pub max_processes: u64,
}

impl ResourceLimits {
    /// CPU quota as a whole percentage of one CPU.
    #[must_use]
    pub const fn cpu_percent(&self) -> u64 {
        if self.cpu_period_micros == 0 {
            return 0;
        }
        self.cpu_quota_micros.saturating_mul(100) / self.cpu_period_micros
    }
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            memory_limit_bytes: constants::DEFAULT_MEMORY_LIMIT_BYTES,
            cpu_quota_micros: constants::DEFAULT_CPU_QUOTA_MICROS,
            cpu_period_micros: constants::DEFAULT_CPU_PERIOD_MICROS,
            io_read_bps: constants::DEFAULT_IO_BPS,
            io_write_bps: constants::DEFAULT_IO_BPS,
            max_processes: constants::DEFAULT_MAX_PROCESSES,
        }
    }
}

/// Everything `start` needs to know about one container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Read-only lower layer of the overlay.
    pub rootfs: PathBuf,
    /// Entry point and arguments, executed inside the new root.
    pub command: Vec<String>,
    /// Limits programmed into the cgroup node.
    pub limits: ResourceLimits,
    /// Stay in the caller's IPC namespace.
    pub share_ipc: bool,
    /// Create a user namespace and map container root to the caller.
    pub user_namespace: bool,
}

impl ContainerConfig {
    /// Creates a configuration with default limits and entry point.
    #[must_use]
    pub fn new(rootfs: impl Into<PathBuf>) -> Self {
        Self {
            rootfs: rootfs.into(),
            command: vec![constants::DEFAULT_ENTRYPOINT.to_string()],
            limits: ResourceLimits::default(),
            share_ipc: false,
            user_namespace: true,
        }
    }
}

/// Lifecycle state of a container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContainerState {
    /// Init process cloned, not yet released.
    Created,
    /// Container is actively running.
    Running,
    /// All processes in the cgroup are suspended.
    Frozen,
    /// Init process has exited or was killed.
    Stopped,
    /// Bookkeeping has been removed.
    Removed,
}

impl fmt::Display for ContainerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Created => write!(f, "created"),
            Self::Running => write!(f, "running"),
            Self::Frozen => write!(f, "frozen"),
            Self::Stopped => write!(f, "stopped"),
            Self::Removed => write!(f, "removed"),
        }
    }
}

/// Mount propagation mode of a mount point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Propagation {
    /// Events propagate both ways within the peer group.
    Shared,
    /// Events propagate in from the master only.
    Slave,
    /// No propagation.
    Private,
}

impl fmt::Display for Propagation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shared => write!(f, "shared"),
            Self::Slave => write!(f, "slave"),
            Self::Private => write!(f, "private"),
        }
    }
}

impl FromStr for Propagation {
    type Err = MiniboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "shared" => Ok(Self::Shared),
            "slave" => Ok(Self::Slave),
            "private" => Ok(Self::Private),
            other => Err(MiniboxError::Config {
                message: format!("unknown mount propagation: {other}"),
            }),
        }
    }
}
