// tests/supervisor_lifecycle.rs

mod common;
use crate::common::builders::boot_app;
use crate::common::{control_channel, eventually, init_tracing, with_timeout};

use std::sync::Arc;

use forktree::config::ConfigFile;
use forktree::errors::{Result, SupervisorError};
use forktree::protocol::ControlChannel;
use forktree::supervisor::{Shutdown, Supervisor};
use forktree::types::NodeState;
use forktree_test_utils::fake_process::FakeProcess;
use forktree_test_utils::fakes::{FakeRootBackend, TestTree};

fn start(
    cfg: &ConfigFile,
    channel: ControlChannel,
) -> (
    TestTree,
    FakeRootBackend,
    Shutdown,
    tokio::task::JoinHandle<Result<()>>,
) {
    let t = TestTree::new(cfg);
    let backend = FakeRootBackend::new();
    let shutdown = Shutdown::new();
    let supervisor = Supervisor::new(
        t.tree.clone(),
        Arc::new(backend.clone()),
        t.errors.clone(),
        cfg.settings(),
    );
    let run = tokio::spawn(supervisor.run(channel, shutdown.clone()));
    (t, backend, shutdown, run)
}

#[tokio::test]
async fn test_boot_then_app_then_ordered_shutdown() {
    init_tracing();
    let cfg = boot_app();
    let (channel, remote) = control_channel();
    let (t, backend, shutdown, run) = start(&cfg, channel);
    let boot = t.tree.root().clone();
    let app = t.tree.find_slave_by_name("app").unwrap().clone();

    with_timeout(backend.wait_for_starts(1)).await;

    // The launched root registers over the control channel and boots.
    let mut boot_process = FakeProcess::register(&remote, 501, "boot").await.unwrap();
    boot_process.boot_ok().await.unwrap();
    with_timeout(boot.wait_until_booted()).await;

    // Its child is requested through it, then registers in turn.
    assert_eq!(with_timeout(boot_process.expect_spawn()).await, "app");
    let app_process = FakeProcess::register(&remote, 502, "app").await.unwrap();
    app_process.boot_ok().await.unwrap();
    with_timeout(app.wait_until_booted()).await;
    assert!(t.errors.is_empty());

    shutdown.trigger();
    with_timeout(run).await.unwrap().unwrap();

    // Children first, each exactly once.
    assert_eq!(t.control.kills(), vec![502, 501]);
    assert_eq!(boot.state(), NodeState::Dead);
    assert_eq!(app.state(), NodeState::Dead);

    // The signal is still observable after the supervisor consumed it.
    assert!(shutdown.is_triggered());
    with_timeout(shutdown.wait()).await;
}

#[tokio::test]
async fn test_idle_shutdown_marks_every_node_dead() {
    init_tracing();
    let cfg = boot_app();
    let (channel, _remote) = control_channel();
    let (t, backend, shutdown, run) = start(&cfg, channel);

    with_timeout(backend.wait_for_starts(1)).await;
    shutdown.trigger();
    with_timeout(run).await.unwrap().unwrap();

    assert!(t.control.kills().is_empty());
    assert!(t.tree.slaves().all(|n| n.state() == NodeState::Dead));
}

#[tokio::test]
async fn test_unknown_identifier_stops_supervision() {
    init_tracing();
    let cfg = boot_app();
    let (channel, remote) = control_channel();
    let (t, backend, shutdown, run) = start(&cfg, channel);
    with_timeout(backend.wait_for_starts(1)).await;

    let boot_process = FakeProcess::register(&remote, 511, "boot").await.unwrap();
    boot_process.boot_ok().await.unwrap();
    with_timeout(t.tree.root().wait_until_booted()).await;

    let _stranger = FakeProcess::register(&remote, 512, "stranger").await.unwrap();

    let outcome = with_timeout(run).await.unwrap();
    assert!(matches!(
        outcome,
        Err(SupervisorError::UnknownIdentifier(ref name)) if name == "stranger"
    ));

    // Cleanup still ran.
    assert!(t.tree.slaves().all(|n| n.state() == NodeState::Dead));
    assert_eq!(t.control.kill_count(511), 1);
    assert!(!shutdown.is_triggered());
}

#[tokio::test]
async fn test_crashed_child_is_reported_and_supervision_continues() {
    init_tracing();
    let cfg = boot_app();
    let (channel, remote) = control_channel();
    let (t, backend, shutdown, run) = start(&cfg, channel);
    with_timeout(backend.wait_for_starts(1)).await;

    let mut boot_process = FakeProcess::register(&remote, 521, "boot").await.unwrap();
    boot_process.boot_ok().await.unwrap();
    assert_eq!(with_timeout(boot_process.expect_spawn()).await, "app");

    let app_process = FakeProcess::register(&remote, 522, "app").await.unwrap();
    app_process.boot_ok().await.unwrap();
    let app = t.tree.find_slave_by_name("app").unwrap().clone();
    with_timeout(app.wait_until_booted()).await;

    drop(app_process);
    eventually("app crash reported", || t.errors.len() == 1).await;
    assert_eq!(app.state(), NodeState::Unbooted);

    // The live parent is asked for a fresh instance without any restart request.
    assert_eq!(with_timeout(boot_process.expect_spawn()).await, "app");
    let replacement = FakeProcess::register(&remote, 523, "app").await.unwrap();
    replacement.boot_ok().await.unwrap();
    with_timeout(app.wait_until_booted()).await;
    assert_eq!(app.pid(), Some(523));
    assert_eq!(t.errors.len(), 1);

    shutdown.trigger();
    with_timeout(run).await.unwrap().unwrap();
}
