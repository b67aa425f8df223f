//! `minibox status`: Show whether a container is running.

use clap::Args;
use minibox_common::types::{ContainerId, ContainerState};
use minibox_runtime::engine::Engine;

/// Arguments for the `status` command.
#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Host PID of the container.
    pub pid: ContainerId,
}

/// Executes the `status` command.
///
/// # Errors
///
/// Returns an error if minibox does not know the container.
pub fn execute(engine: &Engine, args: &StatusArgs) -> anyhow::Result<()> {
    let status = engine.status(args.pid)?;
    let state = match status.state {
        ContainerState::Stopped => "not running".to_string(),
        other => other.to_string(),
    };
    println!("Container {} is {state}", status.id);
    if let Some(ns) = &status.ipc_namespace {
        let sharing = match status.shares_host_ipc {
            Some(true) => " (shared with host)",
            Some(false) => " (isolated)",
            None => "",
        };
        println!("IPC namespace: {ns}{sharing}");
    }
    Ok(())
}
