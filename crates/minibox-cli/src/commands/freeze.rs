//! `minibox freeze`: Suspend a container.

use clap::Args;
use minibox_common::types::ContainerId;
use minibox_runtime::engine::Engine;

/// Arguments for the `freeze` command.
#[derive(Args, Debug)]
pub struct FreezeArgs {
    /// Host PID of the container.
    pub pid: ContainerId,
}

/// Executes the `freeze` command.
///
/// # Errors
///
/// Returns an error if the container has no cgroup or it cannot be frozen.
pub fn execute(engine: &Engine, args: &FreezeArgs) -> anyhow::Result<()> {
    engine.freeze(args.pid)?;
    println!("Container {} frozen", args.pid);
    Ok(())
}
