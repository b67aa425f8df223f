//! User namespace ID mapping.
//!
//! Maps root inside the container to a single unprivileged identity on
//! the host. Written by the parent while the child is still blocked on
//! its start handshake.

use std::path::Path;

use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::ContainerId;

/// Formats one `uid_map`/`gid_map` line.
#[must_use]
pub fn id_map_line(inside: u32, outside: u32, range: u32) -> String {
    format!("{inside} {outside} {range}\n")
}

/// Maps container id 0 to `host_uid`/`host_gid` for process `id`.
///
/// # Errors
///
/// Returns an error if `/proc/<pid>/uid_map` or `gid_map` cannot be
/// written.
pub fn map_root(id: ContainerId, host_uid: u32, host_gid: u32) -> Result<()> {
    write_id_maps(&Path::new("/proc").join(id.to_string()), host_uid, host_gid)?;
    tracing::debug!(%id, host_uid, host_gid, "wrote UID/GID map");
    Ok(())
}

/// Maps container root to the calling user's real uid and gid.
///
/// # Errors
///
/// See [`map_root`].
pub fn map_root_to_caller(id: ContainerId) -> Result<()> {
    map_root(
        id,
        nix::unistd::getuid().as_raw(),
        nix::unistd::getgid().as_raw(),
    )
}

/// Denies `setgroups`, then writes single-id uid and gid maps under
/// `proc_dir`. Denying `setgroups` comes first: the kernel refuses an
/// unprivileged `gid_map` write otherwise, and it keeps the container from
/// ever picking up supplementary groups.
fn write_id_maps(proc_dir: &Path, host_uid: u32, host_gid: u32) -> Result<()> {
    let setgroups = proc_dir.join("setgroups");
    if setgroups.exists() {
        std::fs::write(&setgroups, "deny").map_err(|e| MiniboxError::io(setgroups, e))?;
    }

    let uid_map = proc_dir.join("uid_map");
    std::fs::write(&uid_map, id_map_line(0, host_uid, 1))
        .map_err(|e| MiniboxError::io(uid_map, e))?;

    let gid_map = proc_dir.join("gid_map");
    std::fs::write(&gid_map, id_map_line(0, host_gid, 1))
        .map_err(|e| MiniboxError::io(gid_map, e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_line_is_single_id() {
        assert_eq!(id_map_line(0, 1000, 1), "0 1000 1\n");
    }

    #[test]
    fn maps_are_written_after_denying_setgroups() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::fs::write(dir.path().join("setgroups"), "allow").expect("seed");

        write_id_maps(dir.path(), 1000, 100).expect("write maps");

        let read = |f: &str| std::fs::read_to_string(dir.path().join(f)).expect("read");
        assert_eq!(read("setgroups"), "deny");
        assert_eq!(read("uid_map"), "0 1000 1\n");
        assert_eq!(read("gid_map"), "0 100 1\n");
    }

    #[test]
    fn missing_process_fails() {
        let err = map_root(ContainerId::new(u32::MAX - 1), 0, 0).expect_err("no such pid");
        assert!(err.is_not_found());
    }
}
