//! `minibox rm`: Remove a container.

use clap::Args;
use minibox_common::types::ContainerId;
use minibox_runtime::engine::Engine;

use crate::output;

/// Arguments for the `rm` command.
#[derive(Args, Debug)]
pub struct RmArgs {
    /// Host PID of the container.
    pub pid: ContainerId,
}

/// Executes the `rm` command.
///
/// # Errors
///
/// Returns an error if the registry cannot be read or a live container
/// cannot be signalled.
pub fn execute(engine: &Engine, args: &RmArgs) -> anyhow::Result<()> {
    let report = engine.rm(args.pid)?;
    output::warn_incomplete(&report);
    println!("Container {} removed", args.pid);
    Ok(())
}
