// tests/node_state.rs

mod common;
use crate::common::builders::boot_app;
use crate::common::{eventually, init_tracing, with_timeout};

use std::io::ErrorKind;
use std::path::PathBuf;
use std::time::Duration;

use forktree::protocol::{ControlSocket, MAX_FRAME_LEN, Message};
use forktree::tree::CrashKind;
use forktree::types::NodeState;
use forktree_test_utils::fake_process::FakeProcess;
use forktree_test_utils::fakes::TestTree;
use tokio::net::UnixStream;

#[tokio::test]
async fn test_registered_node_boots_on_ok() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();
    assert_eq!(app.state(), NodeState::NotStarted);

    let (process, _run) = FakeProcess::attach(app, 101).unwrap();
    eventually("app booting", || app.state() == NodeState::Booting).await;
    assert_eq!(app.pid(), Some(101));

    process.boot_ok().await.unwrap();
    let generation = with_timeout(app.wait_until_booted()).await;
    assert_eq!(generation, 1);
    assert_eq!(app.status().generation, 1);
    assert!(t.errors.is_empty());
}

#[tokio::test]
async fn test_failed_boot_is_reported_and_unboots() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    let (process, _run) = FakeProcess::attach(app, 102).unwrap();
    process.boot_failed("SyntaxError in app.rb").await.unwrap();

    eventually("boot failure reported", || t.errors.len() == 1).await;
    let report = &t.errors.reports()[0];
    assert_eq!(report.node, "app");
    assert_eq!(report.kind, CrashKind::BootFailed);
    assert_eq!(report.output, "SyntaxError in app.rb");
    assert_eq!(app.state(), NodeState::Unbooted);
}

#[tokio::test]
async fn test_closed_connection_is_a_crash() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    let (process, run) = FakeProcess::attach(app, 103).unwrap();
    process.boot_ok().await.unwrap();
    with_timeout(app.wait_until_booted()).await;

    drop(process);
    with_timeout(run).await.unwrap();

    assert_eq!(app.state(), NodeState::Unbooted);
    assert_eq!(app.pid(), None);
    assert_eq!(t.control.kill_count(103), 1);
    let reports = t.errors.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].kind, CrashKind::Crashed);
}

#[tokio::test]
async fn test_kill_is_idempotent_and_not_a_crash() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    let (mut process, run) = FakeProcess::attach(app, 104).unwrap();
    process.boot_ok().await.unwrap();
    with_timeout(app.wait_until_booted()).await;

    app.kill();
    app.kill();

    assert_eq!(app.state(), NodeState::Unbooted);
    assert_eq!(t.control.kill_count(104), 1);

    // The process side sees its control connection go away.
    assert_eq!(with_timeout(process.next_message()).await, None);
    with_timeout(run).await.unwrap();
    assert!(t.errors.is_empty());
}

#[tokio::test]
async fn test_stale_generation_counts_as_unbooted() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    let (first, _run) = FakeProcess::attach(app, 105).unwrap();
    first.boot_ok().await.unwrap();
    let generation = with_timeout(app.wait_until_booted()).await;

    app.kill();
    let (second, _run2) = FakeProcess::attach(app, 106).unwrap();
    second.boot_ok().await.unwrap();
    eventually("second boot", || app.status().generation == generation + 1).await;
    assert_eq!(app.state(), NodeState::Booted);

    // Booted again, but the boot being waited on is over.
    with_timeout(app.wait_until_unbooted(generation)).await;
}

#[tokio::test]
async fn test_second_registration_replaces_the_first() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    let (mut first, first_run) = FakeProcess::attach(app, 107).unwrap();
    first.boot_ok().await.unwrap();
    with_timeout(app.wait_until_booted()).await;

    let (_second, _second_run) = FakeProcess::attach(app, 108).unwrap();
    eventually("second instance attached", || {
        app.pid() == Some(108) && app.state() == NodeState::Booting
    })
    .await;

    assert_eq!(t.control.kill_count(107), 1);
    assert_eq!(with_timeout(first.next_message()).await, None);
    with_timeout(first_run).await.unwrap();
    assert!(t.errors.is_empty());
}

#[tokio::test]
async fn test_shutdown_is_terminal() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    let (process, _run) = FakeProcess::attach(app, 109).unwrap();
    process.boot_ok().await.unwrap();
    with_timeout(app.wait_until_booted()).await;

    with_timeout(app.shutdown()).await;
    assert_eq!(app.state(), NodeState::Dead);
    assert_eq!(t.control.kill_count(109), 1);

    // A late registration is killed on sight.
    let (_late, late_run) = FakeProcess::attach(app, 110).unwrap();
    with_timeout(late_run).await.unwrap();
    assert_eq!(t.control.kill_count(110), 1);
    assert_eq!(app.state(), NodeState::Dead);
    assert_eq!(app.pid(), None);
}

#[tokio::test]
async fn test_features_are_recorded_per_instance() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    let (process, _run) = FakeProcess::attach(app, 111).unwrap();
    process
        .send(&Message::Feature(PathBuf::from("/srv/app/lib/a.rb")))
        .await
        .unwrap();
    process.boot_ok().await.unwrap();
    with_timeout(app.wait_until_booted()).await;
    assert_eq!(app.features(), vec![PathBuf::from("/srv/app/lib/a.rb")]);

    app.kill();
    let (_next, _run2) = FakeProcess::attach(app, 112).unwrap();
    eventually("features cleared", || app.features().is_empty()).await;
}

#[tokio::test]
async fn test_send_without_instance_is_not_connected() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let boot = t.tree.root();

    let err = boot.send(&Message::spawn("app")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotConnected);
}

#[tokio::test]
async fn test_restart_listener_only_sees_later_requests() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    app.request_restart();
    let mut listener = app.restart_listener();
    let early = tokio::time::timeout(Duration::from_millis(50), listener.requested()).await;
    assert!(early.is_err(), "request made before subscribing was observed");

    assert!(t.tree.request_restart("app"));
    with_timeout(listener.requested()).await;
    assert!(!t.tree.request_restart("missing"));
}

#[tokio::test]
async fn test_restart_waiter_wakes_on_request() {
    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap().clone();

    let waiter = {
        let app = app.clone();
        tokio::spawn(async move { app.wait_until_restart_requested().await })
    };
    // Give the waiter time to subscribe.
    tokio::time::sleep(Duration::from_millis(20)).await;

    app.request_restart();
    with_timeout(waiter).await.unwrap();
}

#[tokio::test]
async fn test_garbled_frames_do_not_end_the_instance() {
    use tokio::io::AsyncWriteExt;

    init_tracing();
    let t = TestTree::new(&boot_app());
    let app = t.tree.find_slave_by_name("app").unwrap();

    let (mut raw, theirs) = UnixStream::pair().unwrap();
    let _run = tokio::spawn(app.clone().run(
        "app".to_string(),
        111,
        ControlSocket::from_stream(theirs),
    ));
    eventually("app booting", || app.state() == NodeState::Booting).await;

    let mut bytes = b"\xff\xfe\0".to_vec();
    bytes.extend(std::iter::repeat_n(b'a', MAX_FRAME_LEN + 1));
    bytes.extend_from_slice(b"\0R:OK\0");
    raw.write_all(&bytes).await.unwrap();

    with_timeout(app.wait_until_booted()).await;
    assert_eq!(app.pid(), Some(111));
    assert_eq!(t.control.kill_count(111), 0);
    assert!(t.errors.is_empty());
}
