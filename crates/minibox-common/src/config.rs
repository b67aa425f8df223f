//! Global configuration model for the minibox runtime.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::constants;

/// Host-side settings shared by every container operation.
///
/// Per-container settings live in [`crate::types::ContainerConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Directory holding the PID ledger, metadata and registry lock.
    pub state_dir: PathBuf,
    /// Parent cgroup under which one node per container is created.
    pub cgroup_root: PathBuf,
    /// Directory holding per-container overlay scratch directories.
    pub overlay_dir: PathBuf,
    /// Host location a device is bind-mounted to before injection.
    pub shared_device_dir: PathBuf,
    /// Hostname set inside each container.
    pub hostname: String,
    /// Stack size for the cloned init process, in bytes.
    pub stack_size: usize,
    /// `SCHED_RR` priority requested for each container.
    pub rt_priority: i32,
}

impl RuntimeConfig {
    /// Returns a configuration rooted at `state_dir`, with every other
    /// path left at its default.
    #[must_use]
    pub fn with_state_dir(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            ..Self::default()
        }
    }

    /// Path of the newline-delimited PID ledger.
    #[must_use]
    pub fn ledger_file(&self) -> PathBuf {
        self.state_dir.join(constants::LEDGER_FILE_NAME)
    }

    /// Directory containing one metadata file per container.
    #[must_use]
    pub fn metadata_dir(&self) -> PathBuf {
        self.state_dir.join(constants::METADATA_DIR_NAME)
    }

    /// Lock file serializing registry writers.
    #[must_use]
    pub fn lock_file(&self) -> PathBuf {
        self.state_dir.join(constants::LOCK_FILE_NAME)
    }
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            state_dir: PathBuf::from(constants::DEFAULT_STATE_DIR),
            cgroup_root: PathBuf::from(constants::DEFAULT_CGROUP_ROOT),
            overlay_dir: PathBuf::from(constants::DEFAULT_OVERLAY_DIR),
            shared_device_dir: PathBuf::from(constants::DEFAULT_SHARED_DEVICE_DIR),
            hostname: constants::CONTAINER_HOSTNAME.to_string(),
            stack_size: constants::CHILD_STACK_SIZE,
            rt_priority: constants::DEFAULT_RT_PRIORITY,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_files_live_under_state_dir() {
        let cfg = RuntimeConfig::with_state_dir("/tmp/mb");
        assert_eq!(cfg.ledger_file(), PathBuf::from("/tmp/mb/containers.pids"));
        assert_eq!(cfg.metadata_dir(), PathBuf::from("/tmp/mb/metadata"));
        assert_eq!(cfg.lock_file(), PathBuf::from("/tmp/mb/registry.lock"));
        assert_eq!(cfg.cgroup_root, PathBuf::from(constants::DEFAULT_CGROUP_ROOT));
    }

    #[test]
    fn config_serializes_to_json() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).expect("serialize");
        assert!(json.contains("\"hostname\":\"minibox\""));
    }
}
