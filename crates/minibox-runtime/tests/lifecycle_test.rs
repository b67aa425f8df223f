//! Lifecycle integration tests for the minibox runtime.
//!
//! Unprivileged tests stand in for container inits with ordinary child
//! processes and point the cgroup root at a scratch directory. Tests that
//! really clone containers need root and an unpacked root filesystem:
//!
//! ```text
//! MINIBOX_TEST_ROOTFS=/srv/images/alpine-rootfs cargo test -- --ignored
//! ```

#![allow(clippy::expect_used, clippy::unwrap_used, clippy::panic)]

use std::path::{Path, PathBuf};
use std::process::{Child, Command};

use minibox_common::config::RuntimeConfig;
use minibox_common::error::MiniboxError;
use minibox_common::types::{ContainerConfig, ContainerId, ContainerState};
use minibox_core::cgroup::CgroupController;
use minibox_runtime::engine::Engine;
use minibox_runtime::process;
use minibox_runtime::registry::ContainerMetadata;

fn scratch_engine(dir: &Path) -> Engine {
    Engine::new(RuntimeConfig {
        state_dir: dir.join("state"),
        cgroup_root: dir.join("cgroup"),
        overlay_dir: dir.join("overlay"),
        shared_device_dir: dir.join("shared_dev"),
        ..RuntimeConfig::default()
    })
}

fn register(engine: &Engine, id: ContainerId) {
    let config = ContainerConfig::new("/srv/images/alpine-rootfs");
    engine.registry().insert(id).expect("insert");
    engine
        .registry()
        .write_metadata(&ContainerMetadata::new(id, &config, &engine.config().overlay_dir))
        .expect("metadata");
}

fn sleeper() -> (Child, ContainerId) {
    let child = Command::new("sleep").arg("30").spawn().expect("spawn sleep");
    let id = ContainerId::new(child.id());
    (child, id)
}

fn dead_pid() -> ContainerId {
    let mut child = Command::new("true").spawn().expect("spawn true");
    let _ = child.wait().expect("wait");
    ContainerId::new(child.id())
}

fn fake_cgroup_node(engine: &Engine, id: ContainerId) -> PathBuf {
    let node = engine.config().cgroup_root.join(format!("container_{id}"));
    std::fs::create_dir_all(&node).expect("node");
    std::fs::write(node.join("cgroup.freeze"), "0").expect("freeze file");
    node
}

// ── Registry invariants ──────────────────────────────────────────────

#[test]
fn rm_on_dead_pid_is_idempotent() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let id = dead_pid();
    register(&engine, id);

    let first = engine.rm(id).expect("first rm");
    assert!(first.is_clean(), "{:?}", first.failures());
    let second = engine.rm(id).expect("second rm");
    assert!(second.is_clean(), "{:?}", second.failures());

    assert!(engine.registry().get(id).expect("get").is_unknown());
}

#[test]
fn stop_then_list_never_shows_pid() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let (_child, id) = sleeper();
    register(&engine, id);

    let listed: Vec<ContainerId> = engine.list(false).expect("list").iter().map(|s| s.id).collect();
    assert_eq!(listed, vec![id]);

    let report = engine.stop(id).expect("stop");
    assert!(report.is_clean(), "{:?}", report.failures());

    assert!(engine.list(true).expect("list --all").iter().all(|s| s.id != id));
    assert!(engine.inspect(id).is_err());
}

#[test]
fn list_hides_stale_entries_unless_all() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let stale = dead_pid();
    register(&engine, stale);

    assert!(engine.list(false).expect("list").is_empty());
    let all = engine.list(true).expect("list --all");
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].state, ContainerState::Stopped);
}

#[test]
fn inspect_reports_recorded_rootfs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let id = dead_pid();
    register(&engine, id);

    let meta = engine.inspect(id).expect("inspect");
    assert!(meta.to_kv().contains("rootfs=/srv/images/alpine-rootfs"));
}

#[test]
fn inspect_missing_container_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = scratch_engine(dir.path())
        .inspect(dead_pid())
        .expect_err("no metadata");
    assert!(matches!(err, MiniboxError::NotFound { .. }));
}

// ── Freezer ──────────────────────────────────────────────────────────

#[test]
fn freeze_then_thaw_restores_flag() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let (mut child, id) = sleeper();
    register(&engine, id);
    let node = fake_cgroup_node(&engine, id);
    let flag = || std::fs::read_to_string(node.join("cgroup.freeze")).expect("read flag");

    engine.freeze(id).expect("freeze");
    assert_eq!(flag(), "1");
    engine.freeze(id).expect("second freeze is a no-op");
    assert_eq!(flag(), "1");
    assert_eq!(engine.status(id).expect("status").state, ContainerState::Frozen);

    engine.thaw(id).expect("thaw");
    assert_eq!(flag(), "0");
    assert_eq!(engine.status(id).expect("status").state, ContainerState::Running);

    child.kill().expect("kill");
    let _ = child.wait();
}

#[test]
fn freeze_without_cgroup_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = scratch_engine(dir.path())
        .freeze(dead_pid())
        .expect_err("no node");
    assert!(matches!(err, MiniboxError::NotFound { .. }));
}

// ── Status ───────────────────────────────────────────────────────────

#[test]
fn status_of_host_process_shares_ipc() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let (mut child, id) = sleeper();
    register(&engine, id);

    let status = engine.status(id).expect("status");
    assert_eq!(status.state, ContainerState::Running);
    assert!(status.in_ledger);
    assert_eq!(status.shares_host_ipc, Some(true));

    child.kill().expect("kill");
    let _ = child.wait();
}

#[test]
fn status_of_unknown_pid_is_not_found() {
    let dir = tempfile::tempdir().expect("tempdir");
    let err = scratch_engine(dir.path())
        .status(dead_pid())
        .expect_err("unknown");
    assert!(matches!(err, MiniboxError::NotFound { .. }));
}

// ── Device injection ─────────────────────────────────────────────────

#[test]
fn mountdev_on_dead_pid_mounts_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let device = dir.path().join("fake-device");
    std::fs::write(&device, b"").expect("device");
    let id = dead_pid();

    let err = engine
        .mountdev(&device, Path::new("/dev/fake"), &[id])
        .expect_err("dead target");
    assert!(matches!(err, MiniboxError::NotRunning { pid } if pid == id.pid()));
    assert!(!engine.config().shared_device_dir.exists());
}

#[test]
fn mountdev_on_untracked_process_mounts_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let device = dir.path().join("fake-device");
    std::fs::write(&device, b"").expect("device");
    let (mut child, id) = sleeper();

    let err = engine
        .mountdev(&device, Path::new("/dev/fake"), &[id])
        .expect_err("not a container");
    assert!(matches!(err, MiniboxError::NotRunning { pid } if pid == id.pid()));
    assert!(!engine.config().shared_device_dir.exists());
    assert!(!engine.config().overlay_dir.exists());

    child.kill().expect("kill");
    let _ = child.wait();
}

#[test]
fn mountdev_rejects_whole_batch_before_sharing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let engine = scratch_engine(dir.path());
    let device = dir.path().join("fake-device");
    std::fs::write(&device, b"").expect("device");
    let (mut tracked, tracked_id) = sleeper();
    let (mut stray, stray_id) = sleeper();
    register(&engine, tracked_id);

    let err = engine
        .mountdev(&device, Path::new("/dev/fake"), &[tracked_id, stray_id])
        .expect_err("stray target");
    // The tracked sleeper has no merged root, so it is rejected first.
    assert!(matches!(err, MiniboxError::NotRunning { pid } if pid == tracked_id.pid()));
    assert!(!engine.config().shared_device_dir.exists());

    for child in [&mut tracked, &mut stray] {
        child.kill().expect("kill");
        let _ = child.wait();
    }
}

// ── Privileged scenarios ─────────────────────────────────────────────

fn privileged_engine(dir: &Path) -> Option<(Engine, PathBuf)> {
    let rootfs = PathBuf::from(std::env::var_os("MINIBOX_TEST_ROOTFS")?);
    let cgroup_root = std::env::var_os("MINIBOX_TEST_CGROUP_ROOT")
        .map_or_else(|| PathBuf::from("/sys/fs/cgroup/minibox-test"), PathBuf::from);
    let engine = Engine::new(RuntimeConfig {
        state_dir: dir.join("state"),
        overlay_dir: dir.join("overlay"),
        cgroup_root: cgroup_root.clone(),
        ..RuntimeConfig::default()
    })
    .with_cgroup_controller(CgroupController::new(cgroup_root).with_block_devices(Vec::new()));
    Some((engine, rootfs))
}

#[test]
#[ignore = "requires root and MINIBOX_TEST_ROOTFS"]
fn start_inspect_supervise_cleans_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some((engine, rootfs)) = privileged_engine(dir.path()) else {
        return;
    };
    let mut config = ContainerConfig::new(&rootfs);
    config.command = vec!["/bin/true".into()];

    let running = engine.start(&config).expect("start");
    let id = running.id();
    assert_eq!(engine.registry().list().expect("list"), vec![id]);
    let meta = engine.inspect(id).expect("inspect");
    assert_eq!(meta.rootfs, rootfs);

    let (exit, report) = engine.supervise(running).expect("supervise");
    assert_eq!(exit.code(), 0);
    assert!(report.is_clean(), "{:?}", report.failures());
    assert!(!meta.overlay_upper.exists());
    assert!(!meta.overlay_work.exists());
    assert!(engine.registry().list().expect("list").is_empty());

    let _ = engine.rm(id).expect("rm");
}

#[test]
#[ignore = "requires root and MINIBOX_TEST_ROOTFS"]
fn share_ipc_keeps_host_ipc_namespace() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some((engine, rootfs)) = privileged_engine(dir.path()) else {
        return;
    };
    let mut shared = ContainerConfig::new(&rootfs);
    shared.command = vec!["/bin/sleep".into(), "5".into()];
    shared.share_ipc = true;
    let mut isolated = shared.clone();
    isolated.share_ipc = false;

    for (config, expected) in [(shared, true), (isolated, false)] {
        let running = engine.start(&config).expect("start");
        let id = running.id();
        let status = engine.status(id).expect("status");
        assert_eq!(status.shares_host_ipc, Some(expected));

        assert!(process::terminate(id).expect("kill"));
        let (exit, _) = engine.supervise(running).expect("supervise");
        assert_eq!(exit.code(), 137);
        let _ = engine.rm(id).expect("rm");
    }
}

#[test]
#[ignore = "requires root and MINIBOX_TEST_ROOTFS"]
fn failed_exec_is_reported_and_cleaned_up() {
    let dir = tempfile::tempdir().expect("tempdir");
    let Some((engine, rootfs)) = privileged_engine(dir.path()) else {
        return;
    };
    let mut config = ContainerConfig::new(&rootfs);
    config.command = vec!["/no/such/entrypoint".into()];

    let err = engine.start(&config).expect_err("exec must fail");
    let MiniboxError::ChildSetup { pid, message } = err else {
        panic!("unexpected error: {err}");
    };
    assert!(message.contains("execvp"), "{message}");

    let id = ContainerId::new(pid);
    assert!(engine.registry().get(id).expect("get").is_unknown());
    assert!(!engine.config().overlay_dir.join(id.to_string()).exists());
    assert!(!engine.config().cgroup_root.join(format!("container_{id}")).exists());
}
