//! Persistent container bookkeeping.
//!
//! Two independent stores live under the state directory:
//!
//! - the PID ledger, `containers.pids`, one decimal PID per line;
//! - one `metadata/<pid>.meta` file per container, `key=value` lines.
//!
//! Either can exist without the other after a crash. Every writer holds an
//! exclusive `flock` on `registry.lock`, and the ledger is replaced through
//! a temporary file in the same directory so readers never see it torn.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs::{File, OpenOptions};
use std::io::Write as _;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use minibox_common::config::RuntimeConfig;
use minibox_common::constants::METADATA_EXTENSION;
use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::{ContainerConfig, ContainerId, Propagation};
use minibox_core::filesystem::OverlayMount;
use minibox_core::filesystem::overlayfs::MERGED_PROPAGATION;
use nix::fcntl::{Flock, FlockArg};
use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;

/// Descriptive record of one container, written at start.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerMetadata {
    /// Host PID of the init process.
    pub pid: ContainerId,
    /// Lower layer the container was started from.
    pub rootfs: PathBuf,
    /// Value written to `memory.max`.
    pub memory_limit_bytes: u64,
    /// CPU quota as a percentage of one CPU.
    pub cpu_quota_percent: u64,
    /// Writable overlay layer.
    pub overlay_upper: PathBuf,
    /// Overlay work directory.
    pub overlay_work: PathBuf,
    /// Propagation of the merged mount.
    pub mount_propagation: Propagation,
    /// Value written to `pids.max`.
    pub pids_max: u64,
    /// Whether the container shares the host IPC namespace.
    pub share_ipc: bool,
    /// Entry point and arguments.
    pub command: Vec<String>,
    /// When the container was started.
    pub created_at: DateTime<Utc>,
}

impl ContainerMetadata {
    /// Describes container `id` started from `config`.
    #[must_use]
    pub fn new(id: ContainerId, config: &ContainerConfig, overlay_dir: &Path) -> Self {
        let overlay = OverlayMount::for_container(id, &config.rootfs, overlay_dir);
        Self {
            pid: id,
            rootfs: config.rootfs.clone(),
            memory_limit_bytes: config.limits.memory_limit_bytes,
            cpu_quota_percent: config.limits.cpu_percent(),
            overlay_upper: overlay.upper_dir,
            overlay_work: overlay.work_dir,
            mount_propagation: MERGED_PROPAGATION,
            pids_max: config.limits.max_processes,
            share_ipc: config.share_ipc,
            command: config.command.clone(),
            created_at: Utc::now(),
        }
    }

    /// Renders the `key=value` file format.
    #[must_use]
    pub fn to_kv(&self) -> String {
        let mut out = String::new();
        for (key, value) in self.fields() {
            let _ = writeln!(out, "{key}={value}");
        }
        out
    }

    fn fields(&self) -> [(&'static str, String); 11] {
        [
            ("pid", self.pid.to_string()),
            ("rootfs", self.rootfs.display().to_string()),
            ("memory_limit", format_memory(self.memory_limit_bytes)),
            ("cpu_quota", format!("{}%", self.cpu_quota_percent)),
            ("overlay_upper", self.overlay_upper.display().to_string()),
            ("overlay_work", self.overlay_work.display().to_string()),
            ("mount_propagation", self.mount_propagation.to_string()),
            ("pids_max", self.pids_max.to_string()),
            ("share_ipc", self.share_ipc.to_string()),
            ("command", serde_json::to_string(&self.command).unwrap_or_default()),
            ("created_at", self.created_at.to_rfc3339()),
        ]
    }

    /// Parses the `key=value` file format. Unknown keys are ignored, and
    /// keys added after the first release fall back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`MiniboxError::Config`] if a required key is missing or a
    /// value is malformed.
    pub fn parse(text: &str) -> Result<Self> {
        let map: HashMap<&str, &str> = text
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim(), v.trim()))
            .collect();
        let required = |key: &str| {
            map.get(key).copied().ok_or_else(|| MiniboxError::Config {
                message: format!("metadata is missing `{key}`"),
            })
        };
        let invalid = |key: &str, value: &str| MiniboxError::Config {
            message: format!("metadata has invalid `{key}`: {value}"),
        };

        let memory = required("memory_limit")?;
        let cpu = required("cpu_quota")?;
        let pids_max = match map.get("pids_max") {
            Some(v) => v.parse().map_err(|_| invalid("pids_max", v))?,
            None => minibox_common::constants::DEFAULT_MAX_PROCESSES,
        };
        let created_at = match map.get("created_at") {
            Some(v) => DateTime::parse_from_rfc3339(v)
                .map_err(|_| invalid("created_at", v))?
                .with_timezone(&Utc),
            None => DateTime::<Utc>::UNIX_EPOCH,
        };

        Ok(Self {
            pid: required("pid")?.parse()?,
            rootfs: PathBuf::from(required("rootfs")?),
            memory_limit_bytes: parse_memory(memory).ok_or_else(|| invalid("memory_limit", memory))?,
            cpu_quota_percent: cpu
                .trim_end_matches('%')
                .parse()
                .map_err(|_| invalid("cpu_quota", cpu))?,
            overlay_upper: PathBuf::from(required("overlay_upper")?),
            overlay_work: PathBuf::from(required("overlay_work")?),
            mount_propagation: required("mount_propagation")?.parse()?,
            pids_max,
            share_ipc: map.get("share_ipc").is_some_and(|v| *v == "true"),
            command: match map.get("command") {
                Some(v) => parse_command(v).ok_or_else(|| invalid("command", v))?,
                None => Vec::new(),
            },
            created_at,
        })
    }
}

/// Decodes the `command` value: a JSON array of arguments. Files written
/// before arguments were quoted hold a space-separated line instead.
fn parse_command(value: &str) -> Option<Vec<String>> {
    if value.starts_with('[') {
        serde_json::from_str(value).ok()
    } else {
        Some(value.split_whitespace().map(str::to_string).collect())
    }
}

/// Formats a byte count the way the metadata file records it: whole
/// mebibytes as `<n>MB`, anything else in bytes.
fn format_memory(bytes: u64) -> String {
    if bytes % MIB == 0 {
        format!("{}MB", bytes / MIB)
    } else {
        bytes.to_string()
    }
}

fn parse_memory(s: &str) -> Option<u64> {
    s.strip_suffix("MB").map_or_else(
        || s.parse().ok(),
        |n| n.parse::<u64>().ok().and_then(|n| n.checked_mul(MIB)),
    )
}

/// What the registry knows about one PID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerRecord {
    /// The PID that was looked up.
    pub pid: ContainerId,
    /// Whether the PID is in the ledger.
    pub running: bool,
    /// The metadata file, if there is one.
    pub metadata: Option<ContainerMetadata>,
}

impl ContainerRecord {
    /// Returns `true` when neither store knows the PID.
    #[must_use]
    pub const fn is_unknown(&self) -> bool {
        !self.running && self.metadata.is_none()
    }
}

/// File-backed ledger and metadata store.
#[derive(Debug, Clone)]
pub struct Registry {
    state_dir: PathBuf,
    ledger: PathBuf,
    metadata_dir: PathBuf,
    lock: PathBuf,
}

impl Registry {
    /// Opens the registry described by `config`. Nothing is created until
    /// the first write.
    #[must_use]
    pub fn new(config: &RuntimeConfig) -> Self {
        Self {
            state_dir: config.state_dir.clone(),
            ledger: config.ledger_file(),
            metadata_dir: config.metadata_dir(),
            lock: config.lock_file(),
        }
    }

    fn lock(&self) -> Result<Flock<File>> {
        std::fs::create_dir_all(&self.state_dir)
            .map_err(|e| MiniboxError::io(&self.state_dir, e))?;
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&self.lock)
            .map_err(|e| MiniboxError::io(&self.lock, e))?;
        Flock::lock(file, FlockArg::LockExclusive)
            .map_err(|(_, e)| MiniboxError::syscall("flock", e))
    }

    fn metadata_path(&self, id: ContainerId) -> PathBuf {
        self.metadata_dir.join(format!("{id}.{METADATA_EXTENSION}"))
    }

    fn read_ledger(&self) -> Result<Vec<ContainerId>> {
        let text = match std::fs::read_to_string(&self.ledger) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(MiniboxError::io(&self.ledger, e)),
        };
        Ok(text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match line.parse() {
                Ok(id) => Some(id),
                Err(e) => {
                    tracing::warn!(line, error = %e, "skipping malformed ledger line");
                    None
                }
            })
            .collect())
    }

    fn write_ledger(&self, ids: &[ContainerId]) -> Result<()> {
        let tmp = self.ledger.with_extension("pids.tmp");
        let mut contents = String::new();
        for id in ids {
            let _ = writeln!(contents, "{id}");
        }
        let mut file = File::create(&tmp).map_err(|e| MiniboxError::io(&tmp, e))?;
        file.write_all(contents.as_bytes())
            .and_then(|()| file.sync_all())
            .map_err(|e| MiniboxError::io(&tmp, e))?;
        std::fs::rename(&tmp, &self.ledger).map_err(|e| MiniboxError::io(&self.ledger, e))
    }

    /// Adds `id` to the ledger. Adding a PID twice keeps one entry.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock or the ledger cannot be written.
    pub fn insert(&self, id: ContainerId) -> Result<()> {
        let _lock = self.lock()?;
        let mut ids = self.read_ledger()?;
        if !ids.contains(&id) {
            ids.push(id);
            self.write_ledger(&ids)?;
        }
        tracing::debug!(%id, "ledger entry added");
        Ok(())
    }

    /// Removes `id` from the ledger. Removing an absent PID succeeds.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock or the ledger cannot be written.
    pub fn remove_ledger_entry(&self, id: ContainerId) -> Result<()> {
        let _lock = self.lock()?;
        let mut ids = self.read_ledger()?;
        let before = ids.len();
        ids.retain(|entry| *entry != id);
        if ids.len() != before {
            self.write_ledger(&ids)?;
            tracing::debug!(%id, "ledger entry removed");
        }
        Ok(())
    }

    /// Writes the metadata file of `metadata.pid`, replacing any old one.
    ///
    /// # Errors
    ///
    /// Returns an error if the lock or the file cannot be written.
    pub fn write_metadata(&self, metadata: &ContainerMetadata) -> Result<()> {
        let _lock = self.lock()?;
        std::fs::create_dir_all(&self.metadata_dir)
            .map_err(|e| MiniboxError::io(&self.metadata_dir, e))?;
        let path = self.metadata_path(metadata.pid);
        std::fs::write(&path, metadata.to_kv()).map_err(|e| MiniboxError::io(path, e))?;
        tracing::debug!(id = %metadata.pid, "metadata written");
        Ok(())
    }

    /// Reads the metadata of `id`, or `None` if there is none.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn read_metadata(&self, id: ContainerId) -> Result<Option<ContainerMetadata>> {
        let path = self.metadata_path(id);
        match std::fs::read_to_string(&path) {
            Ok(text) => ContainerMetadata::parse(&text).map(Some),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(MiniboxError::io(path, e)),
        }
    }

    /// Deletes the metadata of `id`. A missing file counts as deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be removed.
    pub fn remove_metadata(&self, id: ContainerId) -> Result<()> {
        let _lock = self.lock()?;
        let path = self.metadata_path(id);
        match std::fs::remove_file(&path) {
            Ok(()) => {
                tracing::debug!(%id, "metadata removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(MiniboxError::io(path, e)),
        }
    }

    /// Removes `id` from both stores.
    ///
    /// # Errors
    ///
    /// Returns the first failure; the metadata is still attempted if the
    /// ledger update fails.
    pub fn remove(&self, id: ContainerId) -> Result<()> {
        let ledger = self.remove_ledger_entry(id);
        let metadata = self.remove_metadata(id);
        ledger.and(metadata)
    }

    /// PIDs in the ledger, in insertion order.
    ///
    /// # Errors
    ///
    /// Returns an error if the ledger exists but cannot be read.
    pub fn list(&self) -> Result<Vec<ContainerId>> {
        self.read_ledger()
    }

    /// Looks `id` up in both stores.
    ///
    /// # Errors
    ///
    /// Returns an error if either store exists but cannot be read.
    pub fn get(&self, id: ContainerId) -> Result<ContainerRecord> {
        Ok(ContainerRecord {
            pid: id,
            running: self.read_ledger()?.contains(&id),
            metadata: self.read_metadata(id)?,
        })
    }
}
