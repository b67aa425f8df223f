//! CPU placement and scheduling class for container init processes.
//!
//! Containers are spread over online CPUs by PID and run under the
//! round-robin real-time class. Both steps are best-effort from the
//! caller's point of view: a container that cannot be pinned still runs.

use minibox_common::error::{MiniboxError, Result};
use minibox_common::types::ContainerId;
use nix::sched::{CpuSet, sched_setaffinity};
use nix::unistd::{Pid, SysconfVar, sysconf};

/// Number of online CPUs, or `None` if the kernel does not say.
#[must_use]
pub fn online_cpus() -> Option<usize> {
    sysconf(SysconfVar::_NPROCESSORS_ONLN)
        .ok()
        .flatten()
        .and_then(|n| usize::try_from(n).ok())
        .filter(|&n| n > 0)
}

/// CPU a container is pinned to: its PID modulo the online CPU count,
/// or CPU 0 when the count is unknown.
#[must_use]
pub fn target_cpu(id: ContainerId, online: Option<usize>) -> usize {
    match (online, usize::try_from(id.pid())) {
        (Some(n), Ok(pid)) => pid % n,
        _ => 0,
    }
}

/// Restricts process `id` to `cpu`.
///
/// # Errors
///
/// Returns an error if `cpu` is out of range for a CPU set or
/// `sched_setaffinity(2)` fails.
pub fn pin(id: ContainerId, cpu: usize) -> Result<()> {
    let mut set = CpuSet::new();
    set.set(cpu)
        .map_err(|e| MiniboxError::syscall("cpu_set", e))?;
    sched_setaffinity(Pid::from_raw(id.as_raw()), &set)
        .map_err(|e| MiniboxError::syscall("sched_setaffinity", e))?;
    tracing::debug!(%id, cpu, "CPU affinity set");
    Ok(())
}

/// Moves process `id` to `SCHED_RR` with the given static priority.
///
/// # Errors
///
/// Returns an error if `sched_setscheduler(2)` fails, typically for lack
/// of `CAP_SYS_NICE`.
pub fn set_realtime(id: ContainerId, priority: i32) -> Result<()> {
    let param = libc::sched_param {
        sched_priority: priority,
    };
    // SAFETY: `param` is a valid, initialized `sched_param` that outlives
    // the call; the kernel only reads from it.
    #[allow(unsafe_code)]
    let rc = unsafe { libc::sched_setscheduler(id.as_raw(), libc::SCHED_RR, &raw const param) };
    if rc != 0 {
        return Err(MiniboxError::syscall(
            "sched_setscheduler",
            std::io::Error::last_os_error(),
        ));
    }
    tracing::debug!(%id, priority, "real-time scheduling set");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_cpu_wraps_by_pid() {
        assert_eq!(target_cpu(ContainerId::new(13), Some(4)), 1);
        assert_eq!(target_cpu(ContainerId::new(8), Some(4)), 0);
    }

    #[test]
    fn unknown_cpu_count_falls_back_to_zero() {
        assert_eq!(target_cpu(ContainerId::new(4711), None), 0);
    }

    #[test]
    fn at_least_one_cpu_is_online() {
        assert!(online_cpus().is_some_and(|n| n >= 1));
    }

    #[test]
    fn out_of_range_cpu_is_rejected() {
        let me = ContainerId::new(std::process::id());
        assert!(pin(me, CpuSet::count()).is_err());
    }
}
