//! `minibox mountdev`: Inject a host device into running containers.

use std::path::PathBuf;

use clap::Args;
use minibox_common::types::ContainerId;
use minibox_runtime::engine::Engine;

/// Arguments for the `mountdev` command.
#[derive(Args, Debug)]
pub struct MountdevArgs {
    /// Host device (or any file or directory) to share.
    pub device: PathBuf,

    /// Path inside the containers where the device appears.
    pub target: PathBuf,

    /// Host PIDs of the target containers.
    #[arg(required = true, num_args = 1..)]
    pub pids: Vec<ContainerId>,
}

/// Executes the `mountdev` command.
///
/// # Errors
///
/// Returns an error if any container is not running or a mount fails.
pub fn execute(engine: &Engine, args: &MountdevArgs) -> anyhow::Result<()> {
    let _ = engine.mountdev(&args.device, &args.target, &args.pids)?;
    for pid in &args.pids {
        println!(
            "Mounted {} at {} in container {pid}",
            args.device.display(),
            args.target.display()
        );
    }
    Ok(())
}
