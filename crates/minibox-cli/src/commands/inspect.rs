//! `minibox inspect`: Show a container's recorded metadata.

use clap::Args;
use minibox_common::types::ContainerId;
use minibox_runtime::engine::Engine;

/// Arguments for the `inspect` command.
#[derive(Args, Debug)]
pub struct InspectArgs {
    /// Print JSON instead of `key=value` lines.
    #[arg(long)]
    pub json: bool,

    /// Host PID of the container.
    pub pid: ContainerId,
}

/// Executes the `inspect` command.
///
/// # Errors
///
/// Returns an error if the container has no metadata.
pub fn execute(engine: &Engine, args: &InspectArgs) -> anyhow::Result<()> {
    let metadata = engine.inspect(args.pid)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&metadata)?);
    } else {
        print!("{}", metadata.to_kv());
    }
    Ok(())
}
