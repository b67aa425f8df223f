//! Unified error types for the minibox workspace.
//!
//! Every fallible operation in the workspace returns [`Result`]. The CLI
//! wraps these in `anyhow` at the outermost layer only.

use std::path::PathBuf;

use thiserror::Error;

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum MiniboxError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A system call failed.
    #[error("{call} failed: {source}")]
    Syscall {
        /// Name of the failing call, e.g. `clone` or `setns`.
        call: &'static str,
        /// Underlying OS error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// The target container process is not alive.
    #[error("container {pid} is not running")]
    NotRunning {
        /// Host PID of the container init process.
        pid: u32,
    },

    /// A permission or capability error.
    #[error("permission denied: {message}")]
    PermissionDenied {
        /// Description of the denied operation.
        message: String,
    },

    /// A freshly cloned child could not be prepared, either by the parent
    /// or by the child itself before `exec`.
    #[error("container {pid} setup failed: {message}")]
    ChildSetup {
        /// Host PID of the child that was aborted.
        pid: u32,
        /// What went wrong.
        message: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },
}

impl MiniboxError {
    /// Builds an [`MiniboxError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Builds a [`MiniboxError::Syscall`] from any error convertible to
    /// `std::io::Error` (including `nix::Error`).
    pub fn syscall(call: &'static str, source: impl Into<std::io::Error>) -> Self {
        Self::Syscall {
            call,
            source: source.into(),
        }
    }

    /// Returns `true` when the underlying OS error is `ENOENT`.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        match self {
            Self::NotFound { .. } => true,
            Self::Io { source, .. } | Self::Syscall { source, .. } => {
                source.kind() == std::io::ErrorKind::NotFound
            }
            _ => false,
        }
    }
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MiniboxError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syscall_error_names_the_call() {
        let err = MiniboxError::syscall("setns", std::io::Error::from_raw_os_error(1));
        assert!(err.to_string().starts_with("setns failed"));
    }

    #[test]
    fn not_running_mentions_pid() {
        let err = MiniboxError::NotRunning { pid: 4242 };
        assert_eq!(err.to_string(), "container 4242 is not running");
    }

    #[test]
    fn io_not_found_is_detected() {
        let err = MiniboxError::io(
            "/nope",
            std::io::Error::new(std::io::ErrorKind::NotFound, "missing"),
        );
        assert!(err.is_not_found());
        assert!(!MiniboxError::NotRunning { pid: 1 }.is_not_found());
    }
}
