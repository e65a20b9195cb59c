// tests/common/mod.rs

#![allow(dead_code)]

use std::os::unix::net::UnixDatagram;

use forktree::protocol::ControlChannel;

pub use forktree_test_utils::builders;
pub use forktree_test_utils::{eventually, init_tracing, with_timeout};

/// Open a control channel and return both ends, the remote one as a plain
/// blocking datagram socket usable by fake processes.
pub fn control_channel() -> (ControlChannel, UnixDatagram) {
    let (channel, remote) = ControlChannel::open().expect("failed to open control channel");
    (channel, UnixDatagram::from(remote))
}
