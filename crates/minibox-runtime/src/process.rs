//! Process spawning inside isolated namespaces.
//!
//! The container init is cloned into fresh namespaces and immediately
//! blocks on a pipe. The parent configures it from the outside (ID maps,
//! cgroup, registry) and then writes the child's host PID into the pipe,
//! which releases it to build its root filesystem and exec the entry point.
//!
//! A second close-on-exec pipe carries setup failures back. The child
//! writes its error there before exiting; end-of-file with nothing read
//! means `exec` succeeded.

use std::ffi::CString;
use std::fmt;
use std::fs::File;
use std::io::{Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use minibox_common::config::RuntimeConfig;
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::{ContainerConfig, ContainerId, Propagation};
use minibox_core::capability::drop_capabilities;
use minibox_core::filesystem::OverlayMount;
use minibox_core::filesystem::mount::{mount_proc, set_propagation};
use minibox_core::filesystem::root::switch_root;
use minibox_core::namespace::NamespaceConfig;
use minibox_core::namespace::uts::set_hostname;
use nix::errno::Errno;
use nix::fcntl::OFlag;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{WaitStatus, waitpid};
use nix::unistd::{Pid, execvp, pipe2};

/// Exit status reported by the child when setup fails before `exec`.
const CHILD_SETUP_FAILED: isize = 1;

const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// How a container init process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChildExit {
    /// Exited normally with the given status.
    Exited(i32),
    /// Killed by a signal.
    Signaled(Signal),
}

impl ChildExit {
    /// Status in shell convention: the exit code, or 128 + signal number.
    #[must_use]
    pub const fn code(self) -> i32 {
        match self {
            Self::Exited(code) => code,
            Self::Signaled(signal) => 128 + signal as i32,
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exited(code) => write!(f, "exited with status {code}"),
            Self::Signaled(signal) => write!(f, "killed by signal {signal}"),
        }
    }
}

/// Everything the cloned child needs, prepared before `clone(2)` so the
/// child never allocates or fails on conversion.
struct ChildPlan {
    rootfs: PathBuf,
    overlay_dir: PathBuf,
    hostname: String,
    argv: Vec<CString>,
}

fn to_argv(command: &[String]) -> Result<Vec<CString>> {
    if command.is_empty() {
        return Err(MiniboxError::Config {
            message: "container command is empty".into(),
        });
    }
    command
        .iter()
        .map(|arg| {
            CString::new(arg.as_bytes()).map_err(|_| MiniboxError::Config {
                message: format!("command argument contains a NUL byte: {arg:?}"),
            })
        })
        .collect()
}

/// Spawns container init processes.
#[derive(Debug, Clone)]
pub struct NamespaceLauncher {
    overlay_dir: PathBuf,
    hostname: String,
    stack_size: usize,
}

impl NamespaceLauncher {
    /// Creates a launcher using the paths and limits in `config`.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            overlay_dir: config.overlay_dir.clone(),
            hostname: config.hostname.clone(),
            stack_size: config.stack_size,
        }
    }

    /// Clones the container init into new namespaces. The child is left
    /// blocked until [`ContainerHandle::release`].
    ///
    /// # Errors
    ///
    /// Returns an error if the command is invalid, the handshake pipe
    /// cannot be created, or `clone(2)` fails.
    pub fn launch(&self, container: &ContainerConfig) -> Result<ContainerHandle> {
        let plan = ChildPlan {
            rootfs: container.rootfs.clone(),
            overlay_dir: self.overlay_dir.clone(),
            hostname: self.hostname.clone(),
            argv: to_argv(&container.command)?,
        };
        let flags =
            NamespaceConfig::for_container(container.share_ipc, container.user_namespace)
                .clone_flags();

        let (read_end, write_end) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| MiniboxError::syscall("pipe2", e))?;
        let reader = File::from(read_end);
        let writer = File::from(write_end);
        let writer_fd = writer.as_raw_fd();

        let (status_read, status_write) =
            pipe2(OFlag::O_CLOEXEC).map_err(|e| MiniboxError::syscall("pipe2", e))?;
        let status_reader = File::from(status_read);
        let status_writer = File::from(status_write);
        let status_reader_fd = status_reader.as_raw_fd();

        let mut stack = vec![0u8; self.stack_size];
        let callback = Box::new(|| {
            child_main(
                &reader,
                writer_fd,
                &status_writer,
                status_reader_fd,
                &plan,
            )
        });

        // SAFETY: without CLONE_VM the child runs in a copy of this address
        // space on its own stack; the callback only reads data owned by this
        // frame, which the copy preserves, and leaves via exec or exit.
        let pid = unsafe {
            nix::sched::clone(callback, &mut stack, flags, Some(Signal::SIGCHLD as i32))
        }
        .map_err(|e| match e {
            Errno::EPERM => MiniboxError::PermissionDenied {
                message: "creating namespaces requires root or CAP_SYS_ADMIN".into(),
            },
            other => MiniboxError::syscall("clone", other),
        })?;
        drop(reader);
        drop(status_writer);

        let id = ContainerId::new(pid.as_raw().unsigned_abs());
        tracing::info!(%id, ?flags, rootfs = %container.rootfs.display(), "container init cloned");
        Ok(ContainerHandle {
            id,
            release: Some(writer),
            status: Some(status_reader),
        })
    }
}

/// Body of the cloned child. Returns only on failure.
fn child_main(
    reader: &File,
    writer_fd: RawFd,
    status: &File,
    status_reader_fd: RawFd,
    plan: &ChildPlan,
) -> isize {
    // SAFETY: closes this process's copies of the parent-side ends so that
    // the parent dropping its copy is seen here as end-of-file. The `File`
    // values owning them belong to the parent's frame and are never
    // dropped in the child.
    let _ = unsafe { libc::close(writer_fd) };
    let _ = unsafe { libc::close(status_reader_fd) };

    let mut pid_bytes = [0u8; 4];
    let mut reader = reader;
    if let Err(e) = reader.read_exact(&mut pid_bytes) {
        tracing::debug!(error = %e, "start handshake aborted");
        return CHILD_SETUP_FAILED;
    }
    let id = ContainerId::new(i32::from_ne_bytes(pid_bytes).unsigned_abs());

    match prepare_and_exec(id, plan) {
        Ok(never) => match never {},
        Err(e) => {
            tracing::error!(%id, error = %e, "container setup failed");
            let mut status = status;
            let _ = status.write_all(e.to_string().as_bytes());
            CHILD_SETUP_FAILED
        }
    }
}

fn prepare_and_exec(id: ContainerId, plan: &ChildPlan) -> Result<std::convert::Infallible> {
    set_propagation(Path::new("/"), Propagation::Slave, true)?;
    let overlay = OverlayMount::setup(id, &plan.rootfs, &plan.overlay_dir)?;
    switch_root(&overlay.merged_dir)?;
    mount_proc(Path::new("/proc"))?;
    set_hostname(&plan.hostname)?;
    drop_capabilities(&[])?;

    let program = plan.argv.first().ok_or_else(|| MiniboxError::Config {
        message: "container command is empty".into(),
    })?;
    execvp(program, &plan.argv).map_err(|e| MiniboxError::syscall("execvp", e))
}

/// A cloned container init that the parent still controls.
///
/// Dropping an unreleased handle closes the pipe, which makes the child
/// exit with status 1 without running anything.
#[derive(Debug)]
pub struct ContainerHandle {
    id: ContainerId,
    release: Option<File>,
    status: Option<File>,
}

impl ContainerHandle {
    /// Host PID of the container init.
    #[must_use]
    pub const fn id(&self) -> ContainerId {
        self.id
    }

    /// Lets the child continue with root filesystem setup and `exec`.
    ///
    /// # Errors
    ///
    /// Returns an error if the handshake write fails, usually because the
    /// child already died.
    pub fn release(&mut self) -> Result<()> {
        let Some(mut writer) = self.release.take() else {
            return Ok(());
        };
        writer
            .write_all(&self.id.as_raw().to_ne_bytes())
            .map_err(|e| MiniboxError::syscall("handshake write", e))?;
        tracing::debug!(id = %self.id, "container init released");
        Ok(())
    }

    /// Blocks until the released child has either exec'd its entry point
    /// or given up.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::ChildSetup`] carrying the child's own error
    /// message if root filesystem setup or `exec` failed, or an error if
    /// the status pipe cannot be read.
    pub fn await_exec(&mut self) -> Result<()> {
        let Some(mut status) = self.status.take() else {
            return Ok(());
        };
        let mut message = String::new();
        let _ = status
            .read_to_string(&mut message)
            .map_err(|e| MiniboxError::syscall("status read", e))?;
        if message.is_empty() {
            tracing::debug!(id = %self.id, "container entry point running");
            Ok(())
        } else {
            Err(MiniboxError::ChildSetup {
                pid: self.id.pid(),
                message,
            })
        }
    }

    /// Kills and reaps a child that must not run.
    pub fn abort(mut self) {
        drop(self.release.take());
        let _ = terminate(self.id);
        let _ = reap(self.id);
        tracing::warn!(id = %self.id, "container launch aborted");
    }

    /// Blocks until the container init exits.
    ///
    /// # Errors
    ///
    /// Returns an error if `waitpid(2)` fails.
    pub fn wait(&self) -> Result<ChildExit> {
        loop {
            match waitpid(Pid::from_raw(self.id.as_raw()), None) {
                Ok(WaitStatus::Exited(_, code)) => return Ok(ChildExit::Exited(code)),
                Ok(WaitStatus::Signaled(_, signal, _)) => return Ok(ChildExit::Signaled(signal)),
                Ok(_) | Err(Errno::EINTR) => {}
                Err(e) => return Err(MiniboxError::syscall("waitpid", e)),
            }
        }
    }
}

/// Returns whether a process with this PID exists.
#[must_use]
pub fn is_alive(id: ContainerId) -> bool {
    match kill(Pid::from_raw(id.as_raw()), None) {
        Ok(()) | Err(Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// Sends `SIGKILL`. Returns `false` if the process was already gone.
///
/// # Errors
///
/// Returns an error if the signal cannot be delivered for any other reason.
pub fn terminate(id: ContainerId) -> Result<bool> {
    match kill(Pid::from_raw(id.as_raw()), Signal::SIGKILL) {
        Ok(()) => {
            tracing::info!(%id, "sent SIGKILL");
            Ok(true)
        }
        Err(Errno::ESRCH) => {
            tracing::warn!(%id, "process already gone");
            Ok(false)
        }
        Err(e) => Err(MiniboxError::syscall("kill", e)),
    }
}

/// Collects the exit status if `id` is a child of this process.
///
/// Returns `None` when it is not (for example a container started by
/// another `minibox start`), or when nothing could be collected.
pub fn reap(id: ContainerId) -> Option<ChildExit> {
    loop {
        match waitpid(Pid::from_raw(id.as_raw()), None) {
            Ok(WaitStatus::Exited(_, code)) => return Some(ChildExit::Exited(code)),
            Ok(WaitStatus::Signaled(_, signal, _)) => return Some(ChildExit::Signaled(signal)),
            Ok(_) | Err(Errno::EINTR) => {}
            Err(Errno::ECHILD) => return None,
            Err(e) => {
                tracing::debug!(%id, error = %e, "waitpid failed");
                return None;
            }
        }
    }
}

/// Polls until `id` disappears or `timeout` elapses. Returns whether it
/// disappeared.
pub fn wait_for_exit(id: ContainerId, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while is_alive(id) {
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(EXIT_POLL_INTERVAL);
    }
    true
}
