// tests/root_process.rs

mod common;
use crate::common::{init_tracing, with_timeout};

use std::os::fd::OwnedFd;
use std::os::unix::net::UnixDatagram;

use forktree::exec::{CommandLine, ExitKind, ProcessRootBackend, RootBackend};
use forktree::protocol::MASTER_FD_ENV;

fn backend() -> ProcessRootBackend {
    let (_local, remote) = UnixDatagram::pair().unwrap();
    ProcessRootBackend::new(OwnedFd::from(remote))
}

#[test]
fn test_command_line_splits_on_spaces() {
    let line = CommandLine::parse("ruby  -rboot -e go").unwrap();
    assert_eq!(line.program, "ruby");
    assert_eq!(line.args, vec!["-rboot", "-e", "go"]);
    assert_eq!(line.to_string(), "ruby -rboot -e go");

    assert_eq!(CommandLine::parse(""), None);
    assert_eq!(CommandLine::parse("   "), None);
}

#[tokio::test]
async fn test_exit_code_and_output_are_captured() {
    init_tracing();
    let backend = backend();
    let command = CommandLine::parse("sh -c echo").unwrap();

    let mut instance = backend.start(&command).unwrap();
    assert!(instance.pid().is_some());
    let exit = with_timeout(instance.wait()).await;
    assert_eq!(exit.kind, ExitKind::Code(0));
    assert!(!exit.killed_by_supervisor());
}

#[tokio::test]
async fn test_nonzero_exit_is_reported_as_code() {
    init_tracing();
    let backend = backend();
    let mut instance = backend.start(&CommandLine::parse("false").unwrap()).unwrap();
    let exit = with_timeout(instance.wait()).await;
    assert_eq!(exit.kind, ExitKind::Code(1));
}

#[tokio::test]
async fn test_control_descriptor_is_announced_in_env() {
    init_tracing();
    let backend = backend();
    let command = CommandLine::parse(&format!("printenv {MASTER_FD_ENV}")).unwrap();

    let mut instance = backend.start(&command).unwrap();
    let exit = with_timeout(instance.wait()).await;
    assert_eq!(exit.kind, ExitKind::Code(0));
    let announced: i32 = exit.output.trim().parse().expect("numeric descriptor");
    assert!(announced > 2);
}

#[tokio::test]
async fn test_kill_counts_as_supervisor_exit() {
    init_tracing();
    let backend = backend();
    let mut instance = backend.start(&CommandLine::parse("sleep 30").unwrap()).unwrap();

    instance.kill();
    let exit = with_timeout(instance.wait()).await;
    assert!(exit.killed_by_supervisor());
}

#[tokio::test]
async fn test_missing_program_cannot_start() {
    let backend = backend();
    let command = CommandLine::parse("/nonexistent/forktree-root").unwrap();
    assert!(backend.start(&command).is_err());
}
