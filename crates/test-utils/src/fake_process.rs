// crates/test-utils/src/fake_process.rs

//! A stand-in for a preloaded process speaking the control protocol.

use std::io;
use std::os::fd::{AsFd, OwnedFd};
use std::os::unix::net::UnixDatagram;
use std::sync::Arc;

use tokio::net::UnixStream;
use tokio::task::JoinHandle;

use forktree::protocol::{ControlSocket, Message, send_descriptor};
use forktree::tree::SlaveNode;

/// The process side of one control connection.
pub struct FakeProcess {
    socket: ControlSocket,
    pid: u32,
}

impl FakeProcess {
    /// Open a control connection, pass its far end over `channel` and send
    /// the `P:<pid>:<identifier>` handshake.
    pub async fn register(channel: &UnixDatagram, pid: u32, identifier: &str) -> io::Result<Self> {
        let process = Self::connect(channel, pid)?;
        process.send(&Message::pid(pid, identifier)).await?;
        Ok(process)
    }

    /// Pass a control connection without sending any handshake.
    pub fn connect(channel: &UnixDatagram, pid: u32) -> io::Result<Self> {
        let (ours, theirs) = UnixStream::pair()?;
        let theirs: OwnedFd = theirs.into_std()?.into();
        send_descriptor(channel, theirs.as_fd())?;
        Ok(Self {
            socket: ControlSocket::from_stream(ours),
            pid,
        })
    }

    /// Attach straight to `node`'s run loop, skipping the control channel
    /// and the handshake.
    pub fn attach(node: &Arc<SlaveNode>, pid: u32) -> io::Result<(Self, JoinHandle<()>)> {
        let (ours, theirs) = UnixStream::pair()?;
        let run = tokio::spawn(Arc::clone(node).run(
            node.name().to_string(),
            pid,
            ControlSocket::from_stream(theirs),
        ));
        Ok((
            Self {
                socket: ControlSocket::from_stream(ours),
                pid,
            },
            run,
        ))
    }

    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub async fn send(&self, message: &Message) -> io::Result<()> {
        self.socket.send(message).await
    }

    pub async fn boot_ok(&self) -> io::Result<()> {
        self.send(&Message::BootResult(Ok(()))).await
    }

    pub async fn boot_failed(&self, reason: &str) -> io::Result<()> {
        self.send(&Message::BootResult(Err(reason.to_string())))
            .await
    }

    /// Next message from the supervisor; `None` once it closed the socket.
    pub async fn next_message(&mut self) -> Option<Message> {
        self.socket
            .read_message()
            .await
            .expect("supervisor sent an undecodable message")
    }

    /// Next message, which must be a spawn request; returns the node name.
    pub async fn expect_spawn(&mut self) -> String {
        match self.next_message().await {
            Some(Message::Spawn { name }) => name,
            other => panic!("expected spawn request, got {other:?}"),
        }
    }
}
