//! Hot-plugging host devices into running containers.
//!
//! A device is first bind-mounted once at a shared host location. Each
//! target container then gets a bind of that location inside its merged
//! root, made from within the container's own mount namespace.

use std::path::{Path, PathBuf};

use minibox_common::config::RuntimeConfig;
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::{ContainerId, Propagation};
use minibox_core::filesystem::OverlayMount;
use minibox_core::filesystem::mount::{
    bind_mount, detach, is_mount_point, prepare_bind_target, set_propagation,
};
use minibox_core::namespace::mount::with_mount_namespace;

use crate::process::is_alive;
use crate::registry::Registry;

/// Injects a shared host location into container mount namespaces.
#[derive(Debug, Clone)]
pub struct DeviceInjector {
    shared_dir: PathBuf,
    overlay_dir: PathBuf,
}

impl DeviceInjector {
    /// Creates an injector using the shared location and overlay layout in
    /// `config`.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            shared_dir: config.shared_device_dir.clone(),
            overlay_dir: config.overlay_dir.clone(),
        }
    }

    /// Host location devices are shared from.
    #[must_use]
    pub fn shared_dir(&self) -> &Path {
        &self.shared_dir
    }

    /// Where `container_target` lands in the host-side view of the
    /// container's mount namespace.
    #[must_use]
    pub fn destination(&self, id: ContainerId, container_target: &Path) -> PathBuf {
        let relative = container_target
            .strip_prefix("/")
            .unwrap_or(container_target);
        OverlayMount::merged_dir_for(id, &self.overlay_dir).join(relative)
    }

    /// Checks that every target is a live container minibox tracks, with its
    /// merged root mounted in its own mount namespace.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotRunning`] for the first target that is
    /// gone, not in the ledger, or has no mounted root. Returns an I/O or
    /// syscall error if its namespace cannot be entered.
    pub fn validate_targets(&self, registry: &Registry, ids: &[ContainerId]) -> Result<()> {
        for &id in ids {
            let not_running = || MiniboxError::NotRunning { pid: id.pid() };
            if !is_alive(id) || !registry.get(id)?.running {
                return Err(not_running());
            }
            let merged = OverlayMount::merged_dir_for(id, &self.overlay_dir);
            if !merged.is_dir() {
                return Err(not_running());
            }
            if !with_mount_namespace(id, || Ok(is_mount_point(&merged)))? {
                return Err(not_running());
            }
        }
        Ok(())
    }

    /// Bind-mounts `device` at the shared location and marks it shared.
    /// Whatever was shared there before is detached first, so the location
    /// always holds the latest device.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::NotFound`] if `device` does not exist, or an
    /// error from creating the target or mounting.
    pub fn share(&self, device: &Path) -> Result<()> {
        if !device.exists() {
            return Err(MiniboxError::NotFound {
                kind: "device",
                id: device.display().to_string(),
            });
        }
        prepare_bind_target(device, &self.shared_dir)?;
        if is_mount_point(&self.shared_dir) {
            detach(&self.shared_dir)?;
            tracing::debug!(shared = %self.shared_dir.display(), "previous device detached");
        }
        bind_mount(device, &self.shared_dir)?;
        set_propagation(&self.shared_dir, Propagation::Shared, false)?;
        tracing::info!(
            device = %device.display(),
            shared = %self.shared_dir.display(),
            "device shared"
        );
        Ok(())
    }

    /// Binds the shared location onto `container_target` inside container
    /// `id`. Returns the destination as seen from the container's mount
    /// namespace.
    ///
    /// # Errors
    ///
    /// Returns an error if the namespace cannot be entered or left, or if
    /// the target cannot be created or mounted.
    pub fn inject(&self, id: ContainerId, container_target: &Path) -> Result<PathBuf> {
        let destination = self.destination(id, container_target);
        with_mount_namespace(id, || {
            prepare_bind_target(&self.shared_dir, &destination)?;
            bind_mount(&self.shared_dir, &destination)
        })?;
        tracing::info!(%id, target = %container_target.display(), "device injected");
        Ok(destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn injector(overlay_dir: &Path) -> DeviceInjector {
        DeviceInjector::new(&RuntimeConfig {
            overlay_dir: overlay_dir.to_path_buf(),
            ..RuntimeConfig::default()
        })
    }

    #[test]
    fn destination_is_inside_merged_root() {
        let inj = injector(Path::new("/var/lib/minibox/overlay"));
        assert_eq!(
            inj.destination(ContainerId::new(812), Path::new("/dev/sdb1")),
            PathBuf::from("/var/lib/minibox/overlay/812/merged/dev/sdb1")
        );
        assert_eq!(
            inj.destination(ContainerId::new(812), Path::new("mnt/data")),
            PathBuf::from("/var/lib/minibox/overlay/812/merged/mnt/data")
        );
    }

    fn registry(dir: &Path) -> Registry {
        Registry::new(&RuntimeConfig::with_state_dir(dir))
    }

    #[test]
    fn dead_target_fails_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut child = std::process::Command::new("true").spawn().expect("spawn");
        let _ = child.wait().expect("wait");
        let dead = ContainerId::new(child.id());
        let reg = registry(dir.path());
        reg.insert(dead).expect("insert");

        let err = injector(dir.path())
            .validate_targets(&reg, &[dead])
            .expect_err("dead pid");
        assert!(matches!(err, MiniboxError::NotRunning { pid } if pid == dead.pid()));
    }

    #[test]
    fn untracked_live_process_fails_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let me = ContainerId::new(std::process::id());

        let err = injector(dir.path())
            .validate_targets(&registry(dir.path()), &[me])
            .expect_err("not a container");
        assert!(matches!(err, MiniboxError::NotRunning { pid } if pid == me.pid()));
    }

    #[test]
    fn tracked_process_without_root_fails_validation() {
        let dir = tempfile::tempdir().expect("tempdir");
        let me = ContainerId::new(std::process::id());
        let reg = registry(dir.path());
        reg.insert(me).expect("insert");

        let err = injector(&dir.path().join("overlay"))
            .validate_targets(&reg, &[me])
            .expect_err("no merged root");
        assert!(matches!(err, MiniboxError::NotRunning { pid } if pid == me.pid()));
    }

    #[test]
    fn missing_device_is_not_found() {
        let err = injector(Path::new("/tmp"))
            .share(Path::new("/nonexistent/device"))
            .expect_err("missing");
        assert!(matches!(err, MiniboxError::NotFound { kind: "device", .. }));
    }

    #[test]
    #[ignore = "requires root"]
    fn sharing_a_new_device_replaces_the_old_one() {
        let dir = tempfile::tempdir().expect("tempdir");
        let inj = DeviceInjector::new(&RuntimeConfig {
            shared_device_dir: dir.path().join("shared"),
            ..RuntimeConfig::default()
        });
        let first = dir.path().join("sdb");
        let second = dir.path().join("sdc");
        std::fs::write(&first, "sdb").expect("first device");
        std::fs::write(&second, "sdc").expect("second device");

        inj.share(&first).expect("share sdb");
        inj.share(&second).expect("share sdc");
        let seen = std::fs::read_to_string(inj.shared_dir()).expect("read shared");
        assert_eq!(seen, "sdc");

        detach(inj.shared_dir()).expect("cleanup");
    }
}
