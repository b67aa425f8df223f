//! CLI command definitions and dispatch.

pub mod freeze;
pub mod inspect;
pub mod list;
pub mod mountdev;
pub mod rm;
pub mod start;
pub mod status;
pub mod stop;
pub mod thaw;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use minibox_common::config::RuntimeConfig;
use minibox_common::constants;
use minibox_runtime::engine::Engine;

/// minibox: a minimal container runtime.
#[derive(Parser, Debug)]
#[command(name = "minibox", version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute.
    #[command(subcommand)]
    pub command: Command,

    /// Directory holding the PID ledger and container metadata.
    #[arg(long, global = true, env = "MINIBOX_STATE_DIR", default_value = constants::DEFAULT_STATE_DIR)]
    pub state_dir: PathBuf,

    /// Parent cgroup under which container nodes are created.
    #[arg(long, global = true, env = "MINIBOX_CGROUP_ROOT", default_value = constants::DEFAULT_CGROUP_ROOT)]
    pub cgroup_root: PathBuf,

    /// Directory holding per-container overlay layers.
    #[arg(long, global = true, env = "MINIBOX_OVERLAY_DIR", default_value = constants::DEFAULT_OVERLAY_DIR)]
    pub overlay_dir: PathBuf,

    /// Host location devices are shared from by `mountdev`.
    #[arg(long, global = true, env = "MINIBOX_SHARED_DEV_DIR", default_value = constants::DEFAULT_SHARED_DEVICE_DIR)]
    pub shared_dev_dir: PathBuf,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    pub log_json: bool,
}

impl Cli {
    /// Host configuration assembled from the global options.
    pub fn runtime_config(&self) -> RuntimeConfig {
        RuntimeConfig {
            state_dir: self.state_dir.clone(),
            cgroup_root: self.cgroup_root.clone(),
            overlay_dir: self.overlay_dir.clone(),
            shared_device_dir: self.shared_dev_dir.clone(),
            ..RuntimeConfig::default()
        }
    }
}

/// Available CLI subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Start a container and wait for it to exit.
    Start(start::StartArgs),
    /// List containers recorded in the ledger.
    List(list::ListArgs),
    /// Show whether a container is running, frozen or gone.
    Status(status::StatusArgs),
    /// Kill a container and remove its bookkeeping.
    Stop(stop::StopArgs),
    /// Show a container's recorded metadata.
    Inspect(inspect::InspectArgs),
    /// Suspend every process in a container.
    Freeze(freeze::FreezeArgs),
    /// Resume a frozen container.
    Thaw(thaw::ThawArgs),
    /// Remove a container, killing it first if needed.
    Rm(rm::RmArgs),
    /// Make a host device visible inside running containers.
    Mountdev(mountdev::MountdevArgs),
}

/// Dispatches the parsed CLI command to its handler.
///
/// # Errors
///
/// Returns an error if the command execution fails.
pub fn execute(cli: Cli) -> anyhow::Result<()> {
    let engine = Engine::new(cli.runtime_config());
    match cli.command {
        Command::Start(args) => start::execute(&engine, args),
        Command::List(args) => list::execute(&engine, &args),
        Command::Status(args) => status::execute(&engine, &args),
        Command::Stop(args) => stop::execute(&engine, &args),
        Command::Inspect(args) => inspect::execute(&engine, &args),
        Command::Freeze(args) => freeze::execute(&engine, &args),
        Command::Thaw(args) => thaw::execute(&engine, &args),
        Command::Rm(args) => rm::execute(&engine, &args),
        Command::Mountdev(args) => mountdev::execute(&engine, &args),
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn start_takes_command_after_separator() {
        let cli = Cli::try_parse_from([
            "minibox",
            "start",
            "--share-ipc",
            "--memory",
            "64MiB",
            "/srv/images/alpine-rootfs",
            "--",
            "/bin/sh",
            "-c",
            "echo hi",
        ])
        .expect("parse");
        let Command::Start(args) = cli.command else {
            panic!("expected start");
        };
        assert!(args.share_ipc);
        assert_eq!(args.memory, Some(64 * 1024 * 1024));
        assert_eq!(args.command, ["/bin/sh", "-c", "echo hi"]);
    }

    #[test]
    fn mountdev_accepts_several_pids() {
        let cli = Cli::try_parse_from(["minibox", "mountdev", "/dev/sdb1", "/dev/sdb1", "10", "11"])
            .expect("parse");
        let Command::Mountdev(args) = cli.command else {
            panic!("expected mountdev");
        };
        assert_eq!(args.pids.len(), 2);
    }

    #[test]
    fn invalid_pid_is_a_usage_error() {
        assert!(Cli::try_parse_from(["minibox", "stop", "abc"]).is_err());
        assert!(Cli::try_parse_from(["minibox", "rm", "0"]).is_err());
        assert!(Cli::try_parse_from(["minibox", "mountdev", "/dev/sdb1", "/dev/x"]).is_err());
    }

    #[test]
    fn global_paths_reach_runtime_config() {
        let cli = Cli::try_parse_from(["minibox", "list", "--state-dir", "/tmp/mb"]).expect("parse");
        let config = cli.runtime_config();
        assert_eq!(config.state_dir, PathBuf::from("/tmp/mb"));
        assert_eq!(config.ledger_file(), PathBuf::from("/tmp/mb/containers.pids"));
    }
}
