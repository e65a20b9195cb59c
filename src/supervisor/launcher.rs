// src/supervisor/launcher.rs

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::exec::{CommandLine, RootBackend};
use crate::tree::{CrashKind, CrashReport, ErrorSink, ProcessTree, RestartListener};

/// Why a root instance's life ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ended {
    /// It exited or never started; relaunch after the respawn delay.
    Exited,
    /// A restart was requested; relaunch immediately.
    RestartRequested,
}

/// Keeps the root process alive, relaunching it whenever it exits or a
/// restart is requested for the root node.
pub struct RootLauncher {
    tree: Arc<ProcessTree>,
    backend: Arc<dyn RootBackend>,
    errors: Arc<dyn ErrorSink>,
    respawn_delay: Duration,
}

impl RootLauncher {
    pub fn new(
        tree: Arc<ProcessTree>,
        backend: Arc<dyn RootBackend>,
        errors: Arc<dyn ErrorSink>,
        respawn_delay: Duration,
    ) -> Self {
        Self {
            tree,
            backend,
            errors,
            respawn_delay,
        }
    }

    /// Run until the task is aborted.
    pub async fn run(self) {
        info!(root = %self.tree.root().name(), "root launcher started");

        loop {
            let mut restart = self.tree.root().restart_listener();

            if self.launch_once(&mut restart).await == Ended::Exited {
                debug!(delay = ?self.respawn_delay, "waiting before relaunching root");
                tokio::select! {
                    _ = tokio::time::sleep(self.respawn_delay) => {}
                    _ = restart.requested() => {
                        debug!("restart requested during respawn delay");
                    }
                }
            }
        }
    }

    /// Start one root instance and wait for whichever comes first: its exit
    /// or a restart request. The root subtree is killed either way.
    async fn launch_once(&self, restart: &mut RestartListener) -> Ended {
        let root = self.tree.root();

        let Some(command) = CommandLine::parse(self.tree.exec_command()) else {
            self.report(CrashKind::CouldNotStart, "root command is empty".to_string());
            return Ended::Exited;
        };

        let mut instance = match self.backend.start(&command) {
            Ok(instance) => instance,
            Err(e) => {
                warn!(command = %command, error = %e, "root process could not start");
                self.report(CrashKind::CouldNotStart, e.to_string());
                return Ended::Exited;
            }
        };

        let exit = tokio::select! {
            exit = instance.wait() => Some(exit),
            _ = restart.requested() => {
                info!(root = %root.name(), "restarting root process");
                None
            }
        };

        instance.kill();
        self.tree.kill_subtree(root.id());

        // A lost control connection usually precedes the exit of the same
        // process; both together make one crash.
        let lost_connection = root.take_lost_connection();

        let Some(exit) = exit else {
            return Ended::RestartRequested;
        };

        if !exit.killed_by_supervisor() {
            warn!(root = %root.name(), kind = ?exit.kind, "root process exited");
            self.report(CrashKind::Crashed, exit.output);
        } else if let Some(detail) = lost_connection {
            // Killed by us because its control connection went away.
            warn!(root = %root.name(), "root process lost its control connection");
            self.report(CrashKind::Crashed, detail);
        } else {
            debug!(root = %root.name(), "root process exited after supervisor kill");
        }
        Ended::Exited
    }

    fn report(&self, kind: CrashKind, output: String) {
        self.errors
            .report(CrashReport::new(self.tree.root().name(), kind, output));
    }
}
