//! `minibox list`: List containers recorded in the ledger.

use clap::Args;
use minibox_runtime::engine::Engine;

use crate::output::format_bytes;

/// Arguments for the `list` command.
#[derive(Args, Debug)]
pub struct ListArgs {
    /// Include entries whose process has exited.
    #[arg(short, long)]
    pub all: bool,
}

/// Executes the `list` command.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read.
pub fn execute(engine: &Engine, args: &ListArgs) -> anyhow::Result<()> {
    let statuses = engine.list(args.all)?;
    if statuses.is_empty() {
        println!("No containers found.");
        return Ok(());
    }

    println!("{:<8} {:<10} {:<12} {:<30}", "PID", "STATE", "MEMORY", "ROOTFS");
    for status in &statuses {
        let meta = engine.inspect(status.id).ok();
        println!(
            "{:<8} {:<10} {:<12} {:<30}",
            status.id,
            status.state,
            meta.as_ref()
                .map_or_else(|| "-".to_string(), |m| format_bytes(m.memory_limit_bytes)),
            meta.as_ref()
                .map_or_else(|| "-".to_string(), |m| m.rootfs.display().to_string()),
        );
    }
    Ok(())
}
