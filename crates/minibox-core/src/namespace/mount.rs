//! Scoped entry into another process's mount namespace.
//!
//! [`MountNamespaceGuard`] switches the calling thread into a container's
//! mount table and always switches back, either explicitly through
//! [`MountNamespaceGuard::leave`] or on drop.

use std::fs::File;
use std::path::PathBuf;

use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::ContainerId;
use nix::sched::{CloneFlags, setns};

use super::{NamespaceKind, ns_path};

/// Holds the caller's original mount namespace while it is inside a
/// container's.
#[derive(Debug)]
pub struct MountNamespaceGuard {
    target: ContainerId,
    original: Option<File>,
    original_cwd: Option<PathBuf>,
}

impl MountNamespaceGuard {
    /// Opens the mount namespace of `pid`.
    ///
    /// Succeeds only if the process is alive and its namespace handle can
    /// be opened; nothing is switched yet.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotRunning`] if the process is gone, or an
    /// I/O error if the handle cannot be opened.
    pub fn open_target(pid: ContainerId) -> Result<File> {
        let path = ns_path(Some(pid), NamespaceKind::Mount);
        File::open(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                MiniboxError::NotRunning { pid: pid.pid() }
            } else {
                MiniboxError::io(path, e)
            }
        })
    }

    /// Switches into the mount namespace of `pid`.
    ///
    /// # Errors
    ///
    /// Returns an error if either namespace handle cannot be opened or
    /// `setns(2)` fails. The caller's namespace is unchanged on error.
    pub fn enter(pid: ContainerId) -> Result<Self> {
        let original_path = ns_path(None, NamespaceKind::Mount);
        let original =
            File::open(&original_path).map_err(|e| MiniboxError::io(original_path, e))?;
        let target = Self::open_target(pid)?;
        let original_cwd = std::env::current_dir().ok();

        setns(&target, CloneFlags::CLONE_NEWNS)
            .map_err(|e| MiniboxError::syscall("setns(mnt)", e))?;
        tracing::debug!(%pid, "entered mount namespace");

        Ok(Self {
            target: pid,
            original: Some(original),
            original_cwd,
        })
    }

    /// Returns to the original mount namespace and working directory.
    ///
    /// # Errors
    ///
    /// Returns an error if `setns(2)` back into the original namespace
    /// fails.
    pub fn leave(mut self) -> Result<()> {
        self.restore()
    }

    fn restore(&mut self) -> Result<()> {
        let Some(original) = self.original.take() else {
            return Ok(());
        };
        setns(&original, CloneFlags::CLONE_NEWNS)
            .map_err(|e| MiniboxError::syscall("setns(mnt restore)", e))?;
        if let Some(cwd) = self.original_cwd.take() {
            if let Err(e) = std::env::set_current_dir(&cwd) {
                tracing::warn!(cwd = %cwd.display(), error = %e, "could not restore working directory");
            }
        }
        tracing::debug!(pid = %self.target, "left mount namespace");
        Ok(())
    }
}

impl Drop for MountNamespaceGuard {
    fn drop(&mut self) {
        if let Err(e) = self.restore() {
            tracing::error!(pid = %self.target, error = %e, "failed to restore mount namespace");
        }
    }
}

/// Runs `f` inside the mount namespace of `pid`, returning to the caller's
/// namespace afterwards whether `f` succeeded or not.
///
/// # Errors
///
/// Returns the first error from entering, from `f`, or from leaving.
pub fn with_mount_namespace<T>(pid: ContainerId, f: impl FnOnce() -> Result<T>) -> Result<T> {
    let guard = MountNamespaceGuard::enter(pid)?;
    let outcome = f();
    let left = guard.leave();
    let value = outcome?;
    left?;
    Ok(value)
}
