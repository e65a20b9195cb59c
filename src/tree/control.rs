// src/tree/control.rs

//! Killing process instances by pid.
//!
//! Nodes never signal processes directly; they go through a
//! [`ProcessControl`] so tests can record kills instead of sending them.

use std::io;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

pub trait ProcessControl: Send + Sync {
    /// Forcefully terminate `pid`. A process that is already gone is not an
    /// error.
    fn kill(&self, pid: u32) -> io::Result<()>;
}

/// Sends `SIGKILL`.
#[derive(Debug, Default, Clone, Copy)]
pub struct SignalProcessControl;

impl ProcessControl for SignalProcessControl {
    fn kill(&self, pid: u32) -> io::Result<()> {
        let pid = i32::try_from(pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        match signal::kill(Pid::from_raw(pid), Signal::SIGKILL) {
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(e) => Err(io::Error::from(e)),
        }
    }
}
