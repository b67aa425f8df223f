//! `minibox start`: Launch a container and supervise it until it exits.

use std::path::PathBuf;

use anyhow::{Context, bail};
use clap::Args;
use minibox_common::types::ContainerConfig;
use minibox_runtime::engine::Engine;

use crate::output;

/// Arguments for the `start` command.
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Stay in the host IPC namespace.
    #[arg(long)]
    pub share_ipc: bool,

    /// Do not create a user namespace (container root is host root).
    #[arg(long)]
    pub no_user_ns: bool,

    /// Memory limit, e.g. `100MB` (mebibytes), `1GiB` or a byte count.
    #[arg(long, value_parser = memory_size)]
    pub memory: Option<u64>,

    /// CPU time per 100 ms period, in microseconds.
    #[arg(long, value_name = "MICROS")]
    pub cpu_quota: Option<u64>,

    /// Maximum number of processes.
    #[arg(long)]
    pub pids_max: Option<u64>,

    /// Root filesystem used as the read-only lower layer.
    pub rootfs: PathBuf,

    /// Entry point and arguments (default `/bin/bash`).
    #[arg(last = true)]
    pub command: Vec<String>,
}

impl StartArgs {
    fn container_config(self) -> ContainerConfig {
        let mut config = ContainerConfig::new(self.rootfs);
        if !self.command.is_empty() {
            config.command = self.command;
        }
        if let Some(bytes) = self.memory {
            config.limits.memory_limit_bytes = bytes;
        }
        if let Some(quota) = self.cpu_quota {
            config.limits.cpu_quota_micros = quota;
        }
        if let Some(max) = self.pids_max {
            config.limits.max_processes = max;
        }
        config.share_ipc = self.share_ipc;
        config.user_namespace = !self.no_user_ns;
        config
    }
}

/// Parses memory strings like "128MiB", "256MB", "1GiB" into bytes.
///
/// `KB`, `MB` and `GB` are binary units, the same convention the metadata
/// file uses for `memory_limit`.
fn parse_memory(s: &str) -> Option<u64> {
    const UNITS: [(&str, u64); 6] = [
        ("GiB", 1 << 30),
        ("GB", 1 << 30),
        ("MiB", 1 << 20),
        ("MB", 1 << 20),
        ("KiB", 1 << 10),
        ("KB", 1 << 10),
    ];
    let s = s.trim();
    let (num_str, multiplier) = UNITS
        .iter()
        .find_map(|&(suffix, unit)| s.strip_suffix(suffix).map(|n| (n, unit)))
        .unwrap_or((s, 1));
    num_str
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

fn memory_size(s: &str) -> Result<u64, String> {
    match parse_memory(s) {
        Some(0) | None => Err(format!("invalid memory size: {s}")),
        Some(bytes) => Ok(bytes),
    }
}

/// Executes the `start` command.
///
/// Prints the container PID once it is running, then blocks until it
/// exits and reports its status.
///
/// # Errors
///
/// Returns an error if the root filesystem is missing, the container
/// cannot be started, or it cannot be waited on.
pub fn execute(engine: &Engine, args: StartArgs) -> anyhow::Result<()> {
    if !args.rootfs.is_dir() {
        bail!("root filesystem {} is not a directory", args.rootfs.display());
    }
    let config = args.container_config();

    let running = engine.start(&config).context("failed to start container")?;
    let id = running.id();
    println!("Container started with PID {id}");
    if running.cgroup().is_none() {
        eprintln!("Warning: container {id} runs without resource limits");
    }

    let (exit, report) = engine
        .supervise(running)
        .with_context(|| format!("failed to wait for container {id}"))?;
    println!("Container {id} {exit}");
    output::warn_incomplete(&report);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_memory_mib() {
        assert_eq!(parse_memory("128MiB"), Some(128 * 1024 * 1024));
    }

    #[test]
    fn parse_memory_gib() {
        assert_eq!(parse_memory("1GiB"), Some(1024 * 1024 * 1024));
    }

    #[test]
    fn decimal_looking_units_are_binary() {
        assert_eq!(parse_memory("256MB"), parse_memory("256MiB"));
        assert_eq!(parse_memory("2GB"), Some(2 * 1024 * 1024 * 1024));
        assert_eq!(parse_memory("4KB"), Some(4096));
    }

    #[test]
    fn parse_memory_plain_bytes() {
        assert_eq!(parse_memory("1048576"), Some(1_048_576));
    }

    #[test]
    fn parse_memory_invalid() {
        assert_eq!(parse_memory("abc"), None);
        assert!(memory_size("0").is_err());
    }

    #[test]
    fn flags_override_default_limits() {
        let args = StartArgs {
            share_ipc: true,
            no_user_ns: true,
            memory: None,
            cpu_quota: Some(20_000),
            pids_max: Some(8),
            rootfs: PathBuf::from("/img"),
            command: Vec::new(),
        };
        let config = args.container_config();
        assert_eq!(config.command, ["/bin/bash"]);
        assert_eq!(config.limits.memory_limit_bytes, 100 * 1024 * 1024);
        assert_eq!(config.limits.cpu_percent(), 20);
        assert_eq!(config.limits.max_processes, 8);
        assert!(config.share_ipc);
        assert!(!config.user_namespace);
    }
}
