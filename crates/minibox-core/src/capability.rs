//! Linux capability management for least-privilege execution.
//!
//! Drops every capability from all five sets except those explicitly
//! retained. Runs in the container init right before `exec`, after which
//! the process can never regain what was dropped.

use caps::{CapSet, CapsHashSet};
use minibox_common::error::{MiniboxError, Result};

/// Capabilities a container may be allowed to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// Allow binding to privileged ports (< 1024).
    NetBindService,
    /// Allow setting file ownership.
    Chown,
    /// Allow sending signals to arbitrary processes.
    Kill,
    /// Allow setting user IDs.
    Setuid,
    /// Allow setting group IDs.
    Setgid,
}

impl Capability {
    const fn as_caps(self) -> caps::Capability {
        match self {
            Self::NetBindService => caps::Capability::CAP_NET_BIND_SERVICE,
            Self::Chown => caps::Capability::CAP_CHOWN,
            Self::Kill => caps::Capability::CAP_KILL,
            Self::Setuid => caps::Capability::CAP_SETUID,
            Self::Setgid => caps::Capability::CAP_SETGID,
        }
    }
}

fn retained_set(keep: &[Capability]) -> CapsHashSet {
    keep.iter().map(|c| c.as_caps()).collect()
}

fn denied(what: &str, err: &caps::errors::CapsError) -> MiniboxError {
    MiniboxError::PermissionDenied {
        message: format!("{what}: {err}"),
    }
}

/// Drops all Linux capabilities except those in the allowlist.
///
/// The bounding set goes first, while `CAP_SETPCAP` is still effective;
/// then ambient, inheritable, effective and permitted. Clearing the bounding
/// set is what stops a uid-0 process from regaining everything on `exec`.
///
/// # Errors
///
/// Returns an error if any capability syscall fails.
pub fn drop_capabilities(keep: &[Capability]) -> Result<()> {
    let retained = retained_set(keep);

    for cap in caps::runtime::thread_all_supported() {
        if !retained.contains(&cap) {
            caps::drop(None, CapSet::Bounding, cap)
                .map_err(|e| denied("dropping bounding capability", &e))?;
        }
    }

    if caps::runtime::ambient_set_supported().is_ok() {
        caps::clear(None, CapSet::Ambient).map_err(|e| denied("clearing ambient set", &e))?;
    }

    for set in [CapSet::Inheritable, CapSet::Effective, CapSet::Permitted] {
        caps::set(None, set, &retained).map_err(|e| denied("narrowing capability set", &e))?;
    }

    tracing::debug!(retained = keep.len(), "capabilities dropped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retained_set_maps_every_variant() {
        let set = retained_set(&[Capability::Chown, Capability::Kill]);
        assert_eq!(set.len(), 2);
        assert!(set.contains(&caps::Capability::CAP_CHOWN));
        assert!(set.contains(&caps::Capability::CAP_KILL));
    }

    #[test]
    fn empty_allowlist_retains_nothing() {
        assert!(retained_set(&[]).is_empty());
    }
}
