//! Cgroups v2 resource management.
//!
//! One node per container is created under a fixed root (by default
//! `/sys/fs/cgroup/minibox/container_<pid>`). Limits are written before
//! the process is migrated in, so they are already enforced when the
//! container starts forking.

pub mod cpu;
pub mod freezer;
pub mod io;
pub mod memory;
pub mod pids;

use std::path::{Path, PathBuf};

use minibox_common::constants::CGROUP_NODE_PREFIX;
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::{ContainerId, ResourceLimits};

use self::io::BlockDevice;

/// Controllers delegated from the root to container nodes.
const CONTROLLERS: [&str; 4] = ["cpu", "memory", "io", "pids"];

/// Writes `value` to the control file `file` inside `cgroup_path`.
pub(crate) fn write_control(cgroup_path: &Path, file: &str, value: &str) -> Result<()> {
    let path = cgroup_path.join(file);
    std::fs::write(&path, value).map_err(|e| MiniboxError::io(path, e))
}

/// A container's cgroup node after [`CgroupController::create`].
#[derive(Debug, Clone)]
pub struct CgroupNode {
    path: PathBuf,
    unapplied: Vec<&'static str>,
}

impl CgroupNode {
    /// Directory of this node.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Control files whose write failed; the container runs without them.
    #[must_use]
    pub fn unapplied(&self) -> &[&'static str] {
        &self.unapplied
    }
}

/// Creates, programs, freezes and removes per-container cgroup nodes.
#[derive(Debug, Clone)]
pub struct CgroupController {
    root: PathBuf,
    devices: Option<Vec<BlockDevice>>,
}

impl CgroupController {
    /// Creates a controller rooted at `root`. Block devices for `io.max`
    /// are discovered from `/sys/block` when a node is created.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            devices: None,
        }
    }

    /// Uses a fixed device list for `io.max` instead of discovery.
    #[must_use]
    pub fn with_block_devices(mut self, devices: Vec<BlockDevice>) -> Self {
        self.devices = Some(devices);
        self
    }

    /// Root directory under which nodes are created.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the node belonging to `id`.
    #[must_use]
    pub fn node_path(&self, id: ContainerId) -> PathBuf {
        self.root.join(format!("{CGROUP_NODE_PREFIX}{id}"))
    }

    /// Returns whether a node exists for `id`.
    #[must_use]
    pub fn exists(&self, id: ContainerId) -> bool {
        self.node_path(id).is_dir()
    }

    /// Creates the node for `id`, writes every limit, then migrates `id`
    /// into it.
    ///
    /// Limit writes are applied in order memory, swap, CPU, I/O, pids. A
    /// failed limit write is logged and recorded in
    /// [`CgroupNode::unapplied`]; the remaining limits are still written.
    ///
    /// # Errors
    ///
    /// Returns an error if the root or node directory cannot be created, or
    /// if the process cannot be written to `cgroup.procs`.
    pub fn create(&self, id: ContainerId, limits: &ResourceLimits) -> Result<CgroupNode> {
        std::fs::create_dir_all(&self.root).map_err(|e| MiniboxError::io(&self.root, e))?;
        self.enable_controllers();

        let path = self.node_path(id);
        match std::fs::create_dir(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                tracing::debug!(path = %path.display(), "reusing existing cgroup node");
            }
            Err(e) => return Err(MiniboxError::io(path, e)),
        }
        tracing::info!(path = %path.display(), "cgroup created");

        let devices = self
            .devices
            .clone()
            .unwrap_or_else(|| io::discover_block_devices(Path::new(io::SYS_BLOCK)));

        let mut unapplied = Vec::new();
        let mut apply = |file: &'static str, result: Result<()>| {
            if let Err(e) = result {
                tracing::warn!(%id, file, error = %e, "cgroup limit not applied");
                unapplied.push(file);
            }
        };
        apply(
            memory::MEMORY_MAX,
            memory::set_memory_max(&path, limits.memory_limit_bytes),
        );
        apply(memory::SWAP_MAX, memory::disable_swap(&path));
        apply(
            cpu::CPU_MAX,
            cpu::set_cpu_max(&path, limits.cpu_quota_micros, limits.cpu_period_micros),
        );
        apply(
            io::IO_MAX,
            io::set_io_max(&path, &devices, limits.io_read_bps, limits.io_write_bps),
        );
        apply(pids::PIDS_MAX, pids::set_pids_max(&path, limits.max_processes));

        self.add_process(id)?;
        Ok(CgroupNode { path, unapplied })
    }

    /// Delegates the limit controllers to children of the root. Each
    /// controller is enabled separately so one missing controller does not
    /// block the others.
    fn enable_controllers(&self) {
        for controller in CONTROLLERS {
            if let Err(e) = write_control(
                &self.root,
                "cgroup.subtree_control",
                &format!("+{controller}"),
            ) {
                tracing::debug!(controller, error = %e, "controller not delegated");
            }
        }
    }

    /// Adds a process to the node by writing its PID to `cgroup.procs`.
    ///
    /// # Errors
    ///
    /// Returns an error if writing to `cgroup.procs` fails.
    pub fn add_process(&self, id: ContainerId) -> Result<()> {
        write_control(&self.node_path(id), "cgroup.procs", &id.to_string())?;
        tracing::debug!(%id, "added process to cgroup");
        Ok(())
    }

    /// Suspends every process in the node. Freezing a frozen node is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotFound`] if the node does not exist, or an
    /// I/O error if `cgroup.freeze` cannot be written.
    pub fn freeze(&self, id: ContainerId) -> Result<()> {
        let path = self.existing_node(id)?;
        if freezer::set_frozen(&path, true)? {
            tracing::info!(%id, "cgroup frozen");
        }
        Ok(())
    }

    /// Resumes every process in the node. Thawing a thawed node is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotFound`] if the node does not exist, or an
    /// I/O error if `cgroup.freeze` cannot be written.
    pub fn thaw(&self, id: ContainerId) -> Result<()> {
        let path = self.existing_node(id)?;
        if freezer::set_frozen(&path, false)? {
            tracing::info!(%id, "cgroup thawed");
        }
        Ok(())
    }

    /// Returns whether the node's freeze flag is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the node does not exist or cannot be read.
    pub fn is_frozen(&self, id: ContainerId) -> Result<bool> {
        freezer::is_frozen(&self.existing_node(id)?)
    }

    /// Removes the node. A node that is already gone counts as removed.
    ///
    /// Uses `rmdir` semantics: the kernel refuses while any process is
    /// still a member, so the container must have exited first.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory exists but cannot be removed.
    pub fn destroy(&self, id: ContainerId) -> Result<()> {
        let path = self.node_path(id);
        match std::fs::remove_dir(&path) {
            Ok(()) => {
                tracing::info!(path = %path.display(), "cgroup destroyed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MiniboxError::io(path, e)),
        }
    }

    fn existing_node(&self, id: ContainerId) -> Result<PathBuf> {
        let path = self.node_path(id);
        if path.is_dir() {
            Ok(path)
        } else {
            Err(MiniboxError::NotFound {
                kind: "cgroup",
                id: id.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn read(path: &Path, file: &str) -> String {
        std::fs::read_to_string(path.join(file)).expect("control file")
    }

    fn controller(root: &Path) -> CgroupController {
        CgroupController::new(root.join("minibox"))
            .with_block_devices(vec![BlockDevice { major: 8, minor: 0 }])
    }

    #[test]
    fn node_path_is_keyed_by_pid() {
        let ctl = CgroupController::new("/sys/fs/cgroup/minibox");
        assert_eq!(
            ctl.node_path(ContainerId::new(77)),
            PathBuf::from("/sys/fs/cgroup/minibox/container_77")
        );
    }

    #[test]
    fn create_writes_limits_and_membership() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new(4321);

        let node = ctl.create(id, &ResourceLimits::default()).expect("create");
        let path = node.path();
        assert!(node.unapplied().is_empty());
        assert_eq!(read(path, "memory.max"), "104857600");
        assert_eq!(read(path, "memory.swap.max"), "0");
        assert_eq!(read(path, "cpu.max"), "50000 100000");
        assert_eq!(read(path, "io.max"), "8:0 rbps=52428800 wbps=52428800");
        assert_eq!(read(path, "pids.max"), "32");
        assert_eq!(read(path, "cgroup.procs"), "4321");
    }

    #[test]
    fn create_reuses_existing_node() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new(9);
        std::fs::create_dir_all(ctl.node_path(id)).expect("pre-create");
        assert!(ctl.create(id, &ResourceLimits::default()).is_ok());
    }

    #[test]
    fn freeze_then_thaw_restores_flag() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new(55);
        let node = ctl.create(id, &ResourceLimits::default()).expect("create");
        std::fs::write(node.path().join("cgroup.freeze"), "0\n").expect("seed");

        ctl.freeze(id).expect("freeze");
        assert!(ctl.is_frozen(id).expect("read"));
        ctl.freeze(id).expect("second freeze is a no-op");
        ctl.thaw(id).expect("thaw");
        assert!(!ctl.is_frozen(id).expect("read"));
        assert_eq!(read(node.path(), "cgroup.freeze"), "0");
    }

    #[test]
    fn freeze_missing_node_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let err = ctl.freeze(ContainerId::new(3)).expect_err("no node");
        assert!(err.is_not_found());
    }

    #[test]
    fn destroy_is_idempotent() {
        let dir = tempfile::tempdir().expect("tempdir");
        let ctl = controller(dir.path());
        let id = ContainerId::new(12);
        std::fs::create_dir_all(ctl.node_path(id)).expect("node");

        ctl.destroy(id).expect("first destroy");
        assert!(!ctl.exists(id));
        ctl.destroy(id).expect("second destroy");
    }
}
