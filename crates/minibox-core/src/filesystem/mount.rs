//! Mount utilities for container filesystem setup.
//!
//! Handles `/proc`, bind mounts, propagation changes, and lookups in the
//! caller's mount table.

use std::path::{Path, PathBuf};

use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::Propagation;
use nix::mount::{MntFlags, MsFlags, mount, umount2};

const SELF_MOUNTINFO: &str = "/proc/self/mountinfo";

/// Mounts a fresh `proc` filesystem at `target`, creating the directory if
/// needed. Called from inside the new PID namespace so the mount reflects
/// it.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the mount fails.
pub fn mount_proc(target: &Path) -> Result<()> {
    std::fs::create_dir_all(target).map_err(|e| MiniboxError::io(target, e))?;
    mount(
        Some("proc"),
        target,
        Some("proc"),
        MsFlags::empty(),
        None::<&str>,
    )
    .map_err(|e| MiniboxError::syscall("mount proc", e))?;
    tracing::debug!(target = %target.display(), "proc mounted");
    Ok(())
}

/// Creates a bind mount from `source` onto `target`.
///
/// # Errors
///
/// Returns an error if the `mount(2)` syscall fails.
pub fn bind_mount(source: &Path, target: &Path) -> Result<()> {
    mount(
        Some(source),
        target,
        None::<&str>,
        MsFlags::MS_BIND,
        None::<&str>,
    )
    .map_err(|e| MiniboxError::syscall("bind mount", e))?;
    tracing::debug!(
        source = %source.display(),
        target = %target.display(),
        "bind mount created"
    );
    Ok(())
}

/// Creates whatever `target` must be for `source` to be bind-mounted onto
/// it: a directory for a directory source, an empty file otherwise.
/// Existing targets are left alone.
///
/// # Errors
///
/// Returns an error if the target cannot be created.
pub fn prepare_bind_target(source: &Path, target: &Path) -> Result<()> {
    if target.exists() {
        return Ok(());
    }
    if source.is_dir() {
        std::fs::create_dir_all(target).map_err(|e| MiniboxError::io(target, e))
    } else {
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).map_err(|e| MiniboxError::io(parent, e))?;
        }
        std::fs::File::create(target)
            .map(drop)
            .map_err(|e| MiniboxError::io(target, e))
    }
}

/// Lazily detaches the mount at `target` (`MNT_DETACH`). Existing users
/// keep their view until they let go of it.
///
/// # Errors
///
/// Returns an error if `target` is not a mount point or the call fails.
pub fn detach(target: &Path) -> Result<()> {
    umount2(target, MntFlags::MNT_DETACH).map_err(|e| MiniboxError::syscall("umount", e))?;
    tracing::debug!(target = %target.display(), "mount detached");
    Ok(())
}

fn propagation_flags(propagation: Propagation, recursive: bool) -> MsFlags {
    let base = match propagation {
        Propagation::Shared => MsFlags::MS_SHARED,
        Propagation::Slave => MsFlags::MS_SLAVE,
        Propagation::Private => MsFlags::MS_PRIVATE,
    };
    if recursive { base | MsFlags::MS_REC } else { base }
}

/// Changes the propagation type of the mount at `target`.
///
/// # Errors
///
/// Returns an error if `target` is not a mount point or the call fails.
pub fn set_propagation(target: &Path, propagation: Propagation, recursive: bool) -> Result<()> {
    mount(
        None::<&str>,
        target,
        None::<&str>,
        propagation_flags(propagation, recursive),
        None::<&str>,
    )
    .map_err(|e| MiniboxError::syscall("mount propagation", e))?;
    tracing::debug!(target = %target.display(), %propagation, recursive, "propagation set");
    Ok(())
}

/// Decodes the octal escapes (`\040` for a space) used in mountinfo.
fn unescape_mount_path(raw: &str) -> PathBuf {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 3 < bytes.len() {
            let decoded = std::str::from_utf8(&bytes[i + 1..i + 4])
                .ok()
                .and_then(|code| u8::from_str_radix(code, 8).ok());
            if let Some(b) = decoded {
                out.push(b);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    PathBuf::from(String::from_utf8_lossy(&out).into_owned())
}

/// Extracts the mount points (fifth field) from mountinfo text.
#[must_use]
pub fn parse_mount_points(mountinfo: &str) -> Vec<PathBuf> {
    mountinfo
        .lines()
        .filter_map(|line| line.split_whitespace().nth(4))
        .map(unescape_mount_path)
        .collect()
}

/// Returns whether `path` is a mount point in the caller's mount namespace.
///
/// Unreadable mountinfo is treated as "not mounted".
#[must_use]
pub fn is_mount_point(path: &Path) -> bool {
    std::fs::read_to_string(SELF_MOUNTINFO)
        .map(|info| parse_mount_points(&info).iter().any(|p| p == path))
        .unwrap_or(false)
}
