//! UTS namespace: the container's hostname.

use minibox_common::error::{MiniboxError, Result};

/// Sets the hostname of the calling process's UTS namespace.
///
/// # Errors
///
/// Returns an error if `sethostname(2)` fails.
pub fn set_hostname(hostname: &str) -> Result<()> {
    nix::unistd::sethostname(hostname).map_err(|e| MiniboxError::syscall("sethostname", e))?;
    tracing::debug!(hostname, "hostname set");
    Ok(())
}
