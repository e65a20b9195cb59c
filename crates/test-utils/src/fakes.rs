// crates/test-utils/src/fakes.rs

//! Recording and scriptable stand-ins for the supervisor's seams.

use std::future::Future;
use std::io;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tokio::sync::{oneshot, watch};

use forktree::config::ConfigFile;
use forktree::exec::{CommandLine, RootBackend, RootExit, RootInstance};
use forktree::tree::{CrashReport, ErrorSink, ProcessControl, ProcessTree};

/// Records every pid it is asked to kill instead of signalling anything.
#[derive(Debug, Default)]
pub struct RecordingProcessControl {
    kills: Mutex<Vec<u32>>,
}

impl RecordingProcessControl {
    pub fn kills(&self) -> Vec<u32> {
        self.kills.lock().unwrap().clone()
    }

    pub fn kill_count(&self, pid: u32) -> usize {
        self.kills().iter().filter(|p| **p == pid).count()
    }
}

impl ProcessControl for RecordingProcessControl {
    fn kill(&self, pid: u32) -> io::Result<()> {
        self.kills.lock().unwrap().push(pid);
        Ok(())
    }
}

/// Collects crash reports.
#[derive(Debug, Default)]
pub struct RecordingErrorSink {
    reports: Mutex<Vec<CrashReport>>,
}

impl RecordingErrorSink {
    pub fn reports(&self) -> Vec<CrashReport> {
        self.reports.lock().unwrap().clone()
    }

    pub fn len(&self) -> usize {
        self.reports.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ErrorSink for RecordingErrorSink {
    fn report(&self, report: CrashReport) {
        self.reports.lock().unwrap().push(report);
    }
}

/// A tree wired to recording fakes.
pub struct TestTree {
    pub tree: Arc<ProcessTree>,
    pub control: Arc<RecordingProcessControl>,
    pub errors: Arc<RecordingErrorSink>,
}

impl TestTree {
    pub fn new(cfg: &ConfigFile) -> Self {
        let control = Arc::new(RecordingProcessControl::default());
        let errors = Arc::new(RecordingErrorSink::default());
        let tree = Arc::new(ProcessTree::from_config(
            cfg,
            control.clone(),
            errors.clone(),
        ));
        Self {
            tree,
            control,
            errors,
        }
    }
}

/// First pid handed out by [`FakeRootBackend`].
pub const FAKE_ROOT_PID_BASE: u32 = 40_000;

#[derive(Debug, Default)]
struct BackendState {
    exits: Vec<Option<oneshot::Sender<RootExit>>>,
    fail_next: usize,
}

/// Root backend whose instances exit only when told to.
#[derive(Debug, Clone)]
pub struct FakeRootBackend {
    state: Arc<Mutex<BackendState>>,
    starts: Arc<watch::Sender<usize>>,
    kills: Arc<AtomicUsize>,
    commands: Arc<Mutex<Vec<String>>>,
}

impl Default for FakeRootBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeRootBackend {
    pub fn new() -> Self {
        let (starts, _) = watch::channel(0);
        Self {
            state: Arc::default(),
            starts: Arc::new(starts),
            kills: Arc::default(),
            commands: Arc::default(),
        }
    }

    /// Number of start attempts so far, failed ones included.
    pub fn starts(&self) -> usize {
        *self.starts.borrow()
    }

    pub async fn wait_for_starts(&self, n: usize) {
        let mut rx = self.starts.subscribe();
        rx.wait_for(|count| *count >= n)
            .await
            .expect("backend dropped");
    }

    /// Pid given to the `n`th started instance (1-based).
    pub fn pid_of(n: usize) -> u32 {
        FAKE_ROOT_PID_BASE + n as u32
    }

    /// Make the next `n` start attempts fail.
    pub fn fail_next_starts(&self, n: usize) {
        self.state.lock().unwrap().fail_next = n;
    }

    /// End the most recently started instance with `exit`.
    pub fn exit_current(&self, exit: RootExit) {
        let sender = self
            .state
            .lock()
            .unwrap()
            .exits
            .last_mut()
            .and_then(Option::take);
        if let Some(sender) = sender {
            let _ = sender.send(exit);
        }
    }

    /// Number of `RootInstance::kill` calls.
    pub fn kills(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }
}

impl RootBackend for FakeRootBackend {
    fn start(&self, command: &CommandLine) -> io::Result<Box<dyn RootInstance>> {
        self.commands.lock().unwrap().push(command.to_string());

        let outcome = {
            let mut state = self.state.lock().unwrap();
            if state.fail_next > 0 {
                state.fail_next -= 1;
                Err(io::Error::new(io::ErrorKind::NotFound, "no such program"))
            } else {
                let (tx, rx) = oneshot::channel();
                state.exits.push(Some(tx));
                Ok((state.exits.len(), rx))
            }
        };
        self.starts.send_modify(|n| *n += 1);

        let (n, exit) = outcome?;
        Ok(Box::new(FakeRootInstance {
            pid: Self::pid_of(n),
            exit,
            kills: Arc::clone(&self.kills),
        }))
    }
}

struct FakeRootInstance {
    pid: u32,
    exit: oneshot::Receiver<RootExit>,
    kills: Arc<AtomicUsize>,
}

impl RootInstance for FakeRootInstance {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn wait(&mut self) -> Pin<Box<dyn Future<Output = RootExit> + Send + '_>> {
        Box::pin(async move {
            match (&mut self.exit).await {
                Ok(exit) => exit,
                Err(_) => std::future::pending().await,
            }
        })
    }

    fn kill(&mut self) {
        self.kills.fetch_add(1, Ordering::SeqCst);
    }
}
