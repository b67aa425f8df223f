//! Runtime engine that orchestrates container lifecycle.
//!
//! `start` clones the init, configures it from the outside while it waits,
//! and releases it. Everything after that (supervision, stop, removal)
//! funnels its cleanup through [`Engine::teardown`], which never fails but
//! reports every step that did not complete.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use minibox_common::config::RuntimeConfig;
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::{ContainerConfig, ContainerId, ContainerState};
use minibox_core::cgroup::{CgroupController, CgroupNode};
use minibox_core::filesystem::OverlayMount;
use minibox_core::namespace::{NamespaceKind, namespace_id, user};
use minibox_core::sched;

use crate::device::DeviceInjector;
use crate::process::{self, ChildExit, ContainerHandle, NamespaceLauncher};
use crate::registry::{ContainerMetadata, Registry};

/// How long `stop` and `rm` wait for a killed container that is not our
/// child to disappear.
const EXIT_TIMEOUT: Duration = Duration::from_secs(2);

/// One cleanup action performed by [`Engine::teardown`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TeardownStep {
    /// Remove the cgroup node.
    Cgroup,
    /// Detach the overlay and delete its scratch directories.
    Overlay,
    /// Drop the PID from the ledger.
    Ledger,
    /// Delete the metadata file.
    Metadata,
}

impl TeardownStep {
    /// Every step, in the order `rm` runs them.
    pub const ALL: [Self; 4] = [Self::Cgroup, Self::Overlay, Self::Ledger, Self::Metadata];
}

impl fmt::Display for TeardownStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cgroup => write!(f, "cgroup"),
            Self::Overlay => write!(f, "overlay"),
            Self::Ledger => write!(f, "ledger"),
            Self::Metadata => write!(f, "metadata"),
        }
    }
}

/// A teardown step that did not complete.
#[derive(Debug)]
pub struct TeardownFailure {
    /// Which step failed.
    pub step: TeardownStep,
    /// Why.
    pub error: MiniboxError,
}

/// Outcome of [`Engine::teardown`].
#[derive(Debug)]
pub struct TeardownReport {
    id: ContainerId,
    failures: Vec<TeardownFailure>,
}

impl TeardownReport {
    /// Container the report is about.
    #[must_use]
    pub const fn id(&self) -> ContainerId {
        self.id
    }

    /// Returns `true` when every step completed.
    #[must_use]
    pub const fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Steps that did not complete, in execution order.
    #[must_use]
    pub fn failures(&self) -> &[TeardownFailure] {
        &self.failures
    }
}

/// A container that has been started by this process.
#[derive(Debug)]
pub struct RunningContainer {
    handle: ContainerHandle,
    cgroup: Option<CgroupNode>,
}

impl RunningContainer {
    /// Host PID of the container init.
    #[must_use]
    pub const fn id(&self) -> ContainerId {
        self.handle.id()
    }

    /// The cgroup node, if one could be created.
    #[must_use]
    pub const fn cgroup(&self) -> Option<&CgroupNode> {
        self.cgroup.as_ref()
    }
}

/// Point-in-time view of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerStatus {
    /// Host PID of the container init.
    pub id: ContainerId,
    /// `Running`, `Frozen` or `Stopped`.
    pub state: ContainerState,
    /// Whether the PID is in the ledger.
    pub in_ledger: bool,
    /// Kernel identifier of the container's IPC namespace, when alive.
    pub ipc_namespace: Option<String>,
    /// Whether that namespace is the caller's, when both are known.
    pub shares_host_ipc: Option<bool>,
}

/// The runtime engine that coordinates all container operations.
#[derive(Debug, Clone)]
pub struct Engine {
    config: RuntimeConfig,
    cgroups: CgroupController,
    registry: Registry,
    launcher: NamespaceLauncher,
    devices: DeviceInjector,
}

impl Engine {
    /// Creates an engine for the given host configuration.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        Self {
            cgroups: CgroupController::new(&config.cgroup_root),
            registry: Registry::new(&config),
            launcher: NamespaceLauncher::new(&config),
            devices: DeviceInjector::new(&config),
            config,
        }
    }

    /// Replaces the cgroup controller, e.g. to pin the `io.max` device list.
    #[must_use]
    pub fn with_cgroup_controller(mut self, cgroups: CgroupController) -> Self {
        self.cgroups = cgroups;
        self
    }

    /// Host configuration in use.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The ledger and metadata store.
    #[must_use]
    pub const fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Launches a container and returns once its entry point is running.
    ///
    /// While the child waits on its handshake the parent maps its IDs,
    /// pins and prioritises it, creates its cgroup, and records it. ID
    /// mapping, registration and release are fatal: the child is killed
    /// and whatever was created is removed. Scheduling, cgroup and
    /// metadata failures only degrade the container. If the child itself
    /// cannot build its root filesystem or exec, it is reaped and every
    /// trace of it, metadata included, is removed.
    ///
    /// # Errors
    ///
    /// Returns an error if the launch or any fatal step fails, or
    /// [`MiniboxError::ChildSetup`] with the child's reason if its own
    /// setup fails.
    pub fn start(&self, container: &ContainerConfig) -> Result<RunningContainer> {
        let mut handle = self.launcher.launch(container)?;
        let id = handle.id();

        if container.user_namespace {
            if let Err(e) = user::map_root_to_caller(id) {
                handle.abort();
                return Err(MiniboxError::ChildSetup {
                    pid: id.pid(),
                    message: format!("user namespace mapping failed: {e}"),
                });
            }
        }

        self.apply_scheduling(id);

        let cgroup = match self.cgroups.create(id, &container.limits) {
            Ok(node) => Some(node),
            Err(e) => {
                tracing::warn!(%id, error = %e, "running without cgroup limits");
                None
            }
        };

        if let Err(e) = self.registry.insert(id) {
            handle.abort();
            let _ = self.teardown(id, &[TeardownStep::Cgroup]);
            return Err(e);
        }

        let metadata = ContainerMetadata::new(id, container, &self.config.overlay_dir);
        if let Err(e) = self.registry.write_metadata(&metadata) {
            tracing::warn!(%id, error = %e, "metadata not recorded");
        }

        if let Err(e) = handle.release() {
            handle.abort();
            let _ = self.teardown(id, &TeardownStep::ALL);
            return Err(MiniboxError::ChildSetup {
                pid: id.pid(),
                message: format!("could not release container init: {e}"),
            });
        }

        if let Err(e) = handle.await_exec() {
            match handle.wait() {
                Ok(exit) => tracing::warn!(%id, %exit, "container init gave up"),
                Err(wait_err) => tracing::warn!(%id, error = %wait_err, "container init not reaped"),
            }
            let _ = self.teardown(id, &TeardownStep::ALL);
            return Err(e);
        }

        tracing::info!(%id, rootfs = %container.rootfs.display(), "container started");
        Ok(RunningContainer { handle, cgroup })
    }

    fn apply_scheduling(&self, id: ContainerId) {
        let cpu = sched::target_cpu(id, sched::online_cpus());
        if let Err(e) = sched::pin(id, cpu) {
            tracing::warn!(%id, cpu, error = %e, "CPU pinning skipped");
        }
        if let Err(e) = sched::set_realtime(id, self.config.rt_priority) {
            tracing::warn!(%id, error = %e, "real-time scheduling skipped");
        }
    }

    /// Waits for a started container to exit, then removes its cgroup,
    /// overlay and ledger entry. The metadata stays until `rm`.
    ///
    /// # Errors
    ///
    /// Returns an error if waiting on the child fails; nothing is torn
    /// down in that case.
    pub fn supervise(&self, running: RunningContainer) -> Result<(ChildExit, TeardownReport)> {
        let id = running.id();
        let exit = running.handle.wait()?;
        tracing::info!(%id, %exit, "container exited");
        let report = self.teardown(
            id,
            &[
                TeardownStep::Cgroup,
                TeardownStep::Overlay,
                TeardownStep::Ledger,
            ],
        );
        Ok((exit, report))
    }

    fn is_known(&self, id: ContainerId) -> Result<bool> {
        Ok(!self.registry.get(id)?.is_unknown() || self.cgroups.exists(id))
    }

    fn ensure_known(&self, id: ContainerId) -> Result<()> {
        if self.is_known(id)? {
            Ok(())
        } else {
            Err(MiniboxError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
        }
    }

    fn reap_or_wait(id: ContainerId) {
        if process::reap(id).is_none() && !process::wait_for_exit(id, EXIT_TIMEOUT) {
            tracing::warn!(%id, "container still present after SIGKILL");
        }
    }

    /// Kills a container and removes its cgroup, ledger entry and
    /// metadata.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotFound`] for a PID minibox does not know,
    /// or an error if the kill signal cannot be sent.
    pub fn stop(&self, id: ContainerId) -> Result<TeardownReport> {
        self.ensure_known(id)?;
        if process::terminate(id)? {
            Self::reap_or_wait(id);
        }
        Ok(self.teardown(
            id,
            &[
                TeardownStep::Cgroup,
                TeardownStep::Ledger,
                TeardownStep::Metadata,
            ],
        ))
    }

    /// Kills a container if it is still alive and removes everything minibox
    /// holds for it. Removing an already removed container succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the registry cannot be read or a live container
    /// cannot be signalled.
    pub fn rm(&self, id: ContainerId) -> Result<TeardownReport> {
        if self.is_known(id)? && process::is_alive(id) && process::terminate(id)? {
            Self::reap_or_wait(id);
        }
        Ok(self.teardown(id, &TeardownStep::ALL))
    }

    /// Suspends every process of a container.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotFound`] if the container has no cgroup.
    pub fn freeze(&self, id: ContainerId) -> Result<()> {
        self.cgroups.freeze(id)
    }

    /// Resumes a frozen container.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotFound`] if the container has no cgroup.
    pub fn thaw(&self, id: ContainerId) -> Result<()> {
        self.cgroups.thaw(id)
    }

    /// Returns the recorded metadata of a container.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotFound`] if no metadata exists.
    pub fn inspect(&self, id: ContainerId) -> Result<ContainerMetadata> {
        self.registry
            .read_metadata(id)?
            .ok_or_else(|| MiniboxError::NotFound {
                kind: "container",
                id: id.to_string(),
            })
    }

    /// Reports whether a container is running, frozen or gone.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotFound`] for a PID minibox does not know.
    pub fn status(&self, id: ContainerId) -> Result<ContainerStatus> {
        let record = self.registry.get(id)?;
        if record.is_unknown() && !self.cgroups.exists(id) {
            return Err(MiniboxError::NotFound {
                kind: "container",
                id: id.to_string(),
            });
        }

        let alive = process::is_alive(id);
        let state = if !alive {
            ContainerState::Stopped
        } else if self.cgroups.is_frozen(id).unwrap_or(false) {
            ContainerState::Frozen
        } else {
            ContainerState::Running
        };

        let ipc_namespace = if alive {
            namespace_id(Some(id), NamespaceKind::Ipc).ok()
        } else {
            None
        };
        let shares_host_ipc = ipc_namespace.as_ref().and_then(|theirs| {
            namespace_id(None, NamespaceKind::Ipc)
                .ok()
                .map(|ours| ours == *theirs)
        });

        Ok(ContainerStatus {
            id,
            state,
            in_ledger: record.running,
            ipc_namespace,
            shares_host_ipc,
        })
    }

    /// Status of every ledger entry. Entries whose process is gone are
    /// included only when `all` is set.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger cannot be read.
    pub fn list(&self, all: bool) -> Result<Vec<ContainerStatus>> {
        let mut statuses = Vec::new();
        for id in self.registry.list()? {
            let status = self.status(id)?;
            if all || status.state != ContainerState::Stopped {
                statuses.push(status);
            }
        }
        Ok(statuses)
    }

    /// Makes `device` appear at `container_target` in each container.
    ///
    /// Every target is validated before anything is mounted. Returns the
    /// host-side destination for each container, in order.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotRunning`] if any target is gone or is not
    /// a container minibox started, or the first sharing or injection
    /// failure. Containers injected before a
    /// failure keep their mount.
    pub fn mountdev(
        &self,
        device: &Path,
        container_target: &Path,
        ids: &[ContainerId],
    ) -> Result<Vec<PathBuf>> {
        if ids.is_empty() {
            return Err(MiniboxError::Config {
                message: "mountdev needs at least one container PID".into(),
            });
        }
        self.devices.validate_targets(&self.registry, ids)?;
        self.devices.share(device)?;
        ids.iter()
            .map(|&id| self.devices.inject(id, container_target))
            .collect()
    }

    /// Runs `steps` for container `id` in order, continuing past failures.
    pub fn teardown(&self, id: ContainerId, steps: &[TeardownStep]) -> TeardownReport {
        let mut failures = Vec::new();
        for &step in steps {
            match step {
                TeardownStep::Cgroup => {
                    if let Err(error) = self.cgroups.destroy(id) {
                        failures.push(TeardownFailure { step, error });
                    }
                }
                TeardownStep::Overlay => {
                    // Teardown never touches the lower layer.
                    let overlay =
                        OverlayMount::for_container(id, Path::new("/"), &self.config.overlay_dir);
                    failures.extend(
                        overlay
                            .teardown()
                            .into_iter()
                            .map(|error| TeardownFailure { step, error }),
                    );
                }
                TeardownStep::Ledger => {
                    if let Err(error) = self.registry.remove_ledger_entry(id) {
                        failures.push(TeardownFailure { step, error });
                    }
                }
                TeardownStep::Metadata => {
                    if let Err(error) = self.registry.remove_metadata(id) {
                        failures.push(TeardownFailure { step, error });
                    }
                }
            }
        }
        let report = TeardownReport { id, failures };
        log_report(&report);
        report
    }
}

fn log_report(report: &TeardownReport) {
    for failure in report.failures() {
        tracing::warn!(
            id = %report.id,
            step = %failure.step,
            error = %failure.error,
            "teardown step incomplete"
        );
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(RuntimeConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine(dir: &Path) -> Engine {
        Engine::new(RuntimeConfig {
            state_dir: dir.join("state"),
            cgroup_root: dir.join("cgroup"),
            overlay_dir: dir.join("overlay"),
            ..RuntimeConfig::default()
        })
    }

    #[test]
    fn unknown_container_cannot_be_stopped() {
        let dir = tempfile::tempdir().expect("tempdir");
        let me = ContainerId::new(std::process::id());
        let err = engine(dir.path()).stop(me).expect_err("unknown");
        assert!(matches!(err, MiniboxError::NotFound { .. }));
        assert!(process::is_alive(me));
    }

    #[test]
    fn rm_of_unknown_live_pid_does_not_signal_it() {
        let dir = tempfile::tempdir().expect("tempdir");
        let me = ContainerId::new(std::process::id());
        let report = engine(dir.path()).rm(me).expect("rm");
        assert!(report.is_clean());
        assert!(process::is_alive(me));
    }

    #[test]
    fn teardown_reports_each_failed_step() {
        let dir = tempfile::tempdir().expect("tempdir");
        let eng = engine(dir.path());
        let id = ContainerId::new(4242);
        let node = eng.cgroups.node_path(id);
        std::fs::create_dir_all(&node).expect("node");
        std::fs::write(node.join("cgroup.procs"), "").expect("busy node");

        let report = eng.teardown(id, &[TeardownStep::Cgroup, TeardownStep::Ledger]);
        assert_eq!(report.failures().len(), 1);
        assert_eq!(report.failures()[0].step, TeardownStep::Cgroup);
        assert_eq!(report.id(), id);
    }

    #[test]
    fn inspect_of_unknown_container_is_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = engine(dir.path())
            .inspect(ContainerId::new(31337))
            .expect_err("missing");
        assert!(matches!(err, MiniboxError::NotFound { .. }));
    }

    #[test]
    fn mountdev_without_targets_is_rejected() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = engine(dir.path())
            .mountdev(Path::new("/dev/null"), Path::new("/dev/x"), &[])
            .expect_err("no targets");
        assert!(matches!(err, MiniboxError::Config { .. }));
    }

    #[test]
    fn step_names() {
        let names: Vec<String> = TeardownStep::ALL.iter().map(ToString::to_string).collect();
        assert_eq!(names, ["cgroup", "overlay", "ledger", "metadata"]);
    }
}
