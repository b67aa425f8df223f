//! # minibox-core
//!
//! Low-level Linux isolation primitives for the minibox runtime.
//!
//! This crate provides safe abstractions over:
//! - **Namespaces**: clone flags, UID/GID mapping, hostname, and scoped
//!   entry into another process's mount namespace.
//! - **Cgroups v2**: memory, swap, CPU, I/O and pid limits plus the freezer.
//! - **Filesystem**: `OverlayFS` assembly and teardown, bind mounts,
//!   propagation, and the root switch.
//! - **Scheduling**: CPU pinning and real-time class assignment.
//! - **Capabilities**: irreversible capability dropping before `exec`.
//!
//! All unsafe system calls are encapsulated in safe wrappers with
//! `// SAFETY:` documentation.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

#[cfg(not(target_os = "linux"))]
compile_error!("minibox-core requires Linux namespaces and cgroups v2");

pub mod capability;
pub mod cgroup;
pub mod filesystem;
pub mod namespace;
pub mod sched;
