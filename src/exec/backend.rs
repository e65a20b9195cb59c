// src/exec/backend.rs

//! Pluggable backend for launching the root process.
//!
//! The root launcher talks to a [`RootBackend`] instead of spawning
//! processes itself. [`ProcessRootBackend`] is the production implementation;
//! tests provide backends whose instances exit on command.

use std::future::Future;
use std::io;
use std::os::fd::{AsRawFd, OwnedFd};
use std::os::unix::process::ExitStatusExt;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::command::CommandLine;

/// Keep at most this much captured output per instance (the tail wins).
const MAX_CAPTURED_OUTPUT: usize = 64 * 1024;

/// How long to let output readers drain after the process exits. Forked
/// children may hold the pipes open indefinitely, so this is bounded.
const OUTPUT_DRAIN_GRACE: Duration = Duration::from_millis(100);

/// How a root process instance ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Code(i32),
    Signal(i32),
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootExit {
    pub kind: ExitKind,
    /// Combined stdout/stderr captured from the instance.
    pub output: String,
}

impl RootExit {
    /// Exits caused by the supervisor's own `SIGKILL` are not crashes.
    pub fn killed_by_supervisor(&self) -> bool {
        self.kind == ExitKind::Signal(libc::SIGKILL)
    }
}

/// Trait abstracting how the root process is started.
pub trait RootBackend: Send + Sync {
    /// Start one instance. An `Err` means the process could not start.
    fn start(&self, command: &CommandLine) -> io::Result<Box<dyn RootInstance>>;
}

/// A started root process instance.
pub trait RootInstance: Send {
    fn pid(&self) -> Option<u32>;

    /// Wait for the instance to exit.
    fn wait(&mut self) -> Pin<Box<dyn Future<Output = RootExit> + Send + '_>>;

    /// Forcefully terminate the instance. Idempotent.
    fn kill(&mut self);
}

/// Production backend: spawns the root with `tokio::process`, handing it the
/// remote end of the control channel.
#[derive(Debug)]
pub struct ProcessRootBackend {
    control_fd: OwnedFd,
}

impl ProcessRootBackend {
    /// `control_fd` must be inheritable (not close-on-exec).
    pub fn new(control_fd: OwnedFd) -> Self {
        Self { control_fd }
    }
}

impl RootBackend for ProcessRootBackend {
    fn start(&self, command: &CommandLine) -> io::Result<Box<dyn RootInstance>> {
        let mut child = command.to_command(self.control_fd.as_raw_fd()).spawn()?;
        info!(pid = ?child.id(), command = %command, "root process started");

        let output = Arc::new(Mutex::new(String::new()));
        let mut readers = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            readers.push(capture_lines(stdout, Arc::clone(&output)));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(capture_lines(stderr, Arc::clone(&output)));
        }

        Ok(Box::new(ProcessRootInstance {
            child,
            output,
            readers,
        }))
    }
}

/// Append every line from `stream` to the shared buffer, keeping the tail.
fn capture_lines<R>(stream: R, output: Arc<Mutex<String>>) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(stream).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!("root output: {}", line);
            let mut buf = output.lock().unwrap_or_else(PoisonError::into_inner);
            buf.push_str(&line);
            buf.push('\n');
            if buf.len() > MAX_CAPTURED_OUTPUT {
                let mut cut = buf.len() - MAX_CAPTURED_OUTPUT;
                while !buf.is_char_boundary(cut) {
                    cut += 1;
                }
                buf.drain(..cut);
            }
        }
    })
}

pub struct ProcessRootInstance {
    child: Child,
    output: Arc<Mutex<String>>,
    readers: Vec<JoinHandle<()>>,
}

impl RootInstance for ProcessRootInstance {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn wait(&mut self) -> Pin<Box<dyn Future<Output = RootExit> + Send + '_>> {
        Box::pin(async move {
            let (kind, wait_error) = match self.child.wait().await {
                Ok(status) => match (status.code(), status.signal()) {
                    (Some(code), _) => (ExitKind::Code(code), None),
                    (None, Some(sig)) => (ExitKind::Signal(sig), None),
                    (None, None) => (ExitKind::Unknown, None),
                },
                Err(e) => (ExitKind::Unknown, Some(e.to_string())),
            };

            for reader in self.readers.iter_mut() {
                let _ = tokio::time::timeout(OUTPUT_DRAIN_GRACE, reader).await;
            }

            let mut output = self
                .output
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone();
            if let Some(e) = wait_error {
                output.push_str(&format!("failed to wait for root process: {e}\n"));
            }

            RootExit { kind, output }
        })
    }

    fn kill(&mut self) {
        if let Err(e) = self.child.start_kill() {
            debug!(error = %e, "root process already gone");
        }
    }
}

impl Drop for ProcessRootInstance {
    fn drop(&mut self) {
        for reader in &self.readers {
            reader.abort();
        }
    }
}
