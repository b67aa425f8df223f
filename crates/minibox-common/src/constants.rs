//! System-wide constants and default paths.

/// Default directory for the PID ledger, metadata and registry lock.
pub const DEFAULT_STATE_DIR: &str = "/run/minibox";

/// File name of the PID ledger inside the state directory.
pub const LEDGER_FILE_NAME: &str = "containers.pids";

/// Directory name for per-container metadata inside the state directory.
pub const METADATA_DIR_NAME: &str = "metadata";

/// Extension of a per-container metadata file.
pub const METADATA_EXTENSION: &str = "meta";

/// File name of the registry lock inside the state directory.
pub const LOCK_FILE_NAME: &str = "registry.lock";

/// Default parent cgroup for all containers.
pub const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup/minibox";

/// Prefix of a per-container cgroup directory name.
pub const CGROUP_NODE_PREFIX: &str = "container_";

/// Default directory holding per-container overlay scratch directories.
pub const DEFAULT_OVERLAY_DIR: &str = "/var/lib/minibox/overlay";

/// Well-known host location where a device is bind-mounted once before
/// being injected into containers.
pub const DEFAULT_SHARED_DEVICE_DIR: &str = "/mnt/shared_dev";

/// Hostname set inside every container's UTS namespace.
pub const CONTAINER_HOSTNAME: &str = "minibox";

/// Entry point executed when `start` is given no command.
pub const DEFAULT_ENTRYPOINT: &str = "/bin/bash";

/// Size of the stack handed to the cloned init process.
pub const CHILD_STACK_SIZE: usize = 1024 * 1024;

/// Round-robin real-time priority requested for container init processes.
pub const DEFAULT_RT_PRIORITY: i32 = 10;

/// Default memory cap (100 MiB).
pub const DEFAULT_MEMORY_LIMIT_BYTES: u64 = 100 * 1024 * 1024;

/// Default CPU quota per period, in microseconds (50% of one CPU).
pub const DEFAULT_CPU_QUOTA_MICROS: u64 = 50_000;

/// Default CPU accounting period, in microseconds.
pub const DEFAULT_CPU_PERIOD_MICROS: u64 = 100_000;

/// Default read and write bandwidth cap per block device (50 MiB/s).
pub const DEFAULT_IO_BPS: u64 = 50 * 1024 * 1024;

/// Default maximum number of processes inside a container.
pub const DEFAULT_MAX_PROCESSES: u64 = 32;
