//! `minibox stop`: Kill a container and clean up its resources.

use clap::Args;
use minibox_common::types::ContainerId;
use minibox_runtime::engine::Engine;

use crate::output;

/// Arguments for the `stop` command.
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Host PID of the container.
    pub pid: ContainerId,
}

/// Executes the `stop` command.
///
/// # Errors
///
/// Returns an error if the container is unknown or cannot be signalled.
pub fn execute(engine: &Engine, args: &StopArgs) -> anyhow::Result<()> {
    let report = engine.stop(args.pid)?;
    output::warn_incomplete(&report);
    println!("Container {} stopped", args.pid);
    Ok(())
}
