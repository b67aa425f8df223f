//! Linux namespace management for container isolation.
//!
//! Translates a container's isolation settings into `clone(2)` flags and
//! provides helpers for inspecting and entering existing namespaces.

pub mod mount;
pub mod user;
pub mod uts;

use std::path::PathBuf;

use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::ContainerId;
use nix::sched::CloneFlags;

/// Which namespaces a new container gets.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NamespaceConfig {
    /// Isolate PID namespace.
    pub pid: bool,
    /// Isolate mount namespace.
    pub mount: bool,
    /// Isolate network namespace.
    pub network: bool,
    /// Isolate user namespace.
    pub user: bool,
    /// Isolate IPC namespace.
    pub ipc: bool,
    /// Isolate UTS (hostname) namespace.
    pub uts: bool,
}

impl NamespaceConfig {
    /// Full isolation, except that IPC is shared with the caller when
    /// `share_ipc` is set and the user namespace is optional.
    #[must_use]
    pub const fn for_container(share_ipc: bool, user_namespace: bool) -> Self {
        Self {
            pid: true,
            mount: true,
            network: true,
            user: user_namespace,
            ipc: !share_ipc,
            uts: true,
        }
    }

    /// `clone(2)` flags creating every enabled namespace.
    #[must_use]
    pub fn clone_flags(&self) -> CloneFlags {
        [
            (self.uts, CloneFlags::CLONE_NEWUTS),
            (self.pid, CloneFlags::CLONE_NEWPID),
            (self.mount, CloneFlags::CLONE_NEWNS),
            (self.network, CloneFlags::CLONE_NEWNET),
            (self.ipc, CloneFlags::CLONE_NEWIPC),
            (self.user, CloneFlags::CLONE_NEWUSER),
        ]
        .into_iter()
        .filter(|(enabled, _)| *enabled)
        .fold(CloneFlags::empty(), |acc, (_, flag)| acc | flag)
    }
}

impl Default for NamespaceConfig {
    fn default() -> Self {
        Self::for_container(false, true)
    }
}

/// A namespace type as named under `/proc/<pid>/ns/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NamespaceKind {
    /// Mount table.
    Mount,
    /// System V IPC and POSIX message queues.
    Ipc,
    /// Hostname and domain name.
    Uts,
    /// Network stack.
    Net,
    /// Process IDs.
    Pid,
    /// User and group IDs.
    User,
}

impl NamespaceKind {
    /// Entry name under `/proc/<pid>/ns/`.
    #[must_use]
    pub const fn proc_name(self) -> &'static str {
        match self {
            Self::Mount => "mnt",
            Self::Ipc => "ipc",
            Self::Uts => "uts",
            Self::Net => "net",
            Self::Pid => "pid",
            Self::User => "user",
        }
    }
}

/// Path of a namespace handle. `None` means the calling process.
#[must_use]
pub fn ns_path(pid: Option<ContainerId>, kind: NamespaceKind) -> PathBuf {
    let owner = pid.map_or_else(|| "self".to_string(), |id| id.to_string());
    PathBuf::from("/proc")
        .join(owner)
        .join("ns")
        .join(kind.proc_name())
}

/// Returns the kernel's identifier for a namespace, e.g. `ipc:[4026531839]`.
///
/// Two processes are in the same namespace exactly when these match.
///
/// # Errors
///
/// Returns an error if the process does not exist or the link cannot be
/// read.
pub fn namespace_id(pid: Option<ContainerId>, kind: NamespaceKind) -> Result<String> {
    let path = ns_path(pid, kind);
    std::fs::read_link(&path)
        .map(|target| target.to_string_lossy().into_owned())
        .map_err(|e| MiniboxError::io(path, e))
}
