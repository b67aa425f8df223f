//! `OverlayFS` management for per-container root filesystems.
//!
//! The shared image is the read-only lower layer; every container gets
//! its own upper and work directories, named after its host PID, so
//! concurrently started containers never collide.

use std::path::{Path, PathBuf};

use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::{ContainerId, Propagation};
use nix::mount::{MsFlags, mount};

use super::mount::{detach, is_mount_point, set_propagation};

/// Propagation applied to a container's merged mount.
pub const MERGED_PROPAGATION: Propagation = Propagation::Private;

/// Layout of one container's overlay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayMount {
    /// Read-only lower layer, shared between containers.
    pub lower_dir: PathBuf,
    /// Writable upper layer.
    pub upper_dir: PathBuf,
    /// Work directory required by `OverlayFS`.
    pub work_dir: PathBuf,
    /// Merged mount point the container is rooted at.
    pub merged_dir: PathBuf,
}

impl OverlayMount {
    /// Computes the overlay layout of container `id`:
    /// `<overlay_dir>/<pid>/{upper,work,merged}`.
    #[must_use]
    pub fn for_container(id: ContainerId, lower_dir: &Path, overlay_dir: &Path) -> Self {
        let base = overlay_dir.join(id.to_string());
        Self {
            lower_dir: lower_dir.to_path_buf(),
            upper_dir: base.join("upper"),
            work_dir: base.join("work"),
            merged_dir: base.join("merged"),
        }
    }

    /// Merged mount point of container `id`, without needing its lower
    /// layer.
    #[must_use]
    pub fn merged_dir_for(id: ContainerId, overlay_dir: &Path) -> PathBuf {
        overlay_dir.join(id.to_string()).join("merged")
    }

    /// Builds the overlay for `id` on top of `lower_dir` and mounts it.
    ///
    /// # Errors
    ///
    /// Returns an error if a directory cannot be created or the mount
    /// fails.
    pub fn setup(id: ContainerId, lower_dir: &Path, overlay_dir: &Path) -> Result<Self> {
        let overlay = Self::for_container(id, lower_dir, overlay_dir);
        overlay.prepare_dirs()?;
        overlay.mount()?;
        Ok(overlay)
    }

    /// Per-container directory holding upper, work and merged.
    #[must_use]
    pub fn container_dir(&self) -> Option<&Path> {
        self.upper_dir.parent()
    }

    /// Mount options passed to the kernel.
    #[must_use]
    pub fn options(&self) -> String {
        format!(
            "lowerdir={},upperdir={},workdir={}",
            self.lower_dir.display(),
            self.upper_dir.display(),
            self.work_dir.display()
        )
    }

    /// Creates upper, work and merged. Existing directories are reused.
    ///
    /// # Errors
    ///
    /// Returns an error if any directory cannot be created.
    pub fn prepare_dirs(&self) -> Result<()> {
        for dir in [&self.upper_dir, &self.work_dir, &self.merged_dir] {
            std::fs::create_dir_all(dir).map_err(|e| MiniboxError::io(dir, e))?;
        }
        Ok(())
    }

    /// Mounts the overlay at the merged directory and gives it its own
    /// propagation group.
    ///
    /// # Errors
    ///
    /// Returns an error if the mount or propagation change fails.
    pub fn mount(&self) -> Result<()> {
        let opts = self.options();
        mount(
            Some("overlay"),
            &self.merged_dir,
            Some("overlay"),
            MsFlags::empty(),
            Some(opts.as_str()),
        )
        .map_err(|e| MiniboxError::syscall("overlay mount", e))?;
        set_propagation(&self.merged_dir, MERGED_PROPAGATION, true)?;

        tracing::info!(merged = %self.merged_dir.display(), "overlayfs mounted");
        Ok(())
    }

    /// Lazily detaches the merged mount (if mounted in this namespace) and
    /// removes the scratch directories.
    ///
    /// Never fails: every problem is logged and returned so the caller can
    /// report it. Directories that are already gone are not failures.
    #[must_use]
    pub fn teardown(&self) -> Vec<MiniboxError> {
        let mut failures = Vec::new();

        if is_mount_point(&self.merged_dir) {
            match detach(&self.merged_dir) {
                Ok(()) => tracing::info!(path = %self.merged_dir.display(), "overlayfs unmounted"),
                Err(e) => failures.push(e),
            }
        }

        for dir in [&self.upper_dir, &self.work_dir] {
            if let Err(e) = remove_tree(dir) {
                failures.push(e);
            }
        }
        for dir in [Some(self.merged_dir.as_path()), self.container_dir()]
            .into_iter()
            .flatten()
        {
            if let Err(e) = remove_empty_dir(dir) {
                failures.push(e);
            }
        }

        for failure in &failures {
            tracing::warn!(error = %failure, "overlay teardown incomplete");
        }
        failures
    }
}

fn remove_tree(dir: &Path) -> Result<()> {
    match std::fs::remove_dir_all(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(MiniboxError::io(dir, e)),
        _ => Ok(()),
    }
}

fn remove_empty_dir(dir: &Path) -> Result<()> {
    match std::fs::remove_dir(dir) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(MiniboxError::io(dir, e)),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_is_derived_from_pid() {
        let overlay = OverlayMount::for_container(
            ContainerId::new(812),
            Path::new("/srv/images/alpine-rootfs"),
            Path::new("/var/lib/minibox/overlay"),
        );
        assert_eq!(
            overlay.upper_dir,
            PathBuf::from("/var/lib/minibox/overlay/812/upper")
        );
        assert_eq!(
            overlay.work_dir,
            PathBuf::from("/var/lib/minibox/overlay/812/work")
        );
        assert_eq!(
            overlay.options(),
            "lowerdir=/srv/images/alpine-rootfs,\
             upperdir=/var/lib/minibox/overlay/812/upper,\
             workdir=/var/lib/minibox/overlay/812/work"
        );
    }

    #[test]
    fn distinct_pids_never_share_scratch_dirs() {
        let lower = Path::new("/img");
        let root = Path::new("/ov");
        let a = OverlayMount::for_container(ContainerId::new(1), lower, root);
        let b = OverlayMount::for_container(ContainerId::new(11), lower, root);
        assert_ne!(a.upper_dir, b.upper_dir);
        assert_ne!(a.work_dir, b.work_dir);
        assert_eq!(
            OverlayMount::merged_dir_for(ContainerId::new(11), root),
            b.merged_dir
        );
    }

    #[test]
    fn teardown_removes_unmounted_scratch_dirs() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overlay =
            OverlayMount::for_container(ContainerId::new(5), Path::new("/img"), dir.path());
        overlay.prepare_dirs().expect("prepare");
        overlay.prepare_dirs().expect("prepare is idempotent");
        std::fs::write(overlay.upper_dir.join("written-by-container"), b"x").expect("write");

        let failures = overlay.teardown();
        assert!(failures.is_empty(), "{failures:?}");
        assert!(!overlay.upper_dir.exists());
        assert!(!overlay.work_dir.exists());
        assert!(!dir.path().join("5").exists());
    }

    #[test]
    fn teardown_of_missing_dirs_is_clean() {
        let dir = tempfile::tempdir().expect("tempdir");
        let overlay =
            OverlayMount::for_container(ContainerId::new(6), Path::new("/img"), dir.path());
        assert!(overlay.teardown().is_empty());
    }
}
