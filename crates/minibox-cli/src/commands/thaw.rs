//! `minibox thaw`: Resume a frozen container.

use clap::Args;
use minibox_common::types::ContainerId;
use minibox_runtime::engine::Engine;

/// Arguments for the `thaw` command.
#[derive(Args, Debug)]
pub struct ThawArgs {
    /// Host PID of the container.
    pub pid: ContainerId,
}

/// Executes the `thaw` command.
///
/// # Errors
///
/// Returns an error if the container has no cgroup or it cannot be thawed.
pub fn execute(engine: &Engine, args: &ThawArgs) -> anyhow::Result<()> {
    engine.thaw(args.pid)?;
    println!("Container {} thawed", args.pid);
    Ok(())
}
