//! Root filesystem switching.
//!
//! Uses `chroot(2)`: the merged overlay stays reachable at its host path
//! in the container's mount namespace, which is where device injection
//! bind-mounts into.

use std::path::Path;

use minibox_common::error::{MiniboxError, Result};
use nix::unistd::{chdir, chroot};

/// Makes `new_root` the process root and moves the working directory into
/// it.
///
/// Only call this from a process that is about to drop its capabilities:
/// `chroot` alone is escapable by a process that keeps `CAP_SYS_CHROOT`.
///
/// # Errors
///
/// Returns an error if `chroot(2)` or `chdir(2)` fails.
pub fn switch_root(new_root: &Path) -> Result<()> {
    chroot(new_root).map_err(|e| MiniboxError::syscall("chroot", e))?;
    chdir("/").map_err(|e| MiniboxError::syscall("chdir", e))?;
    tracing::info!(new_root = %new_root.display(), "root switched");
    Ok(())
}
