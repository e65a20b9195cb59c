// src/supervisor/mod.rs

//! Run-time supervision of the process tree.
//!
//! The coordinator owns:
//! - the control-channel receiver (descriptors from registering processes)
//! - one root launcher keeping the root process alive
//! - one booter per non-root node, asking its parent to spawn it
//! - the registration handler binding processes to nodes
//!
//! and tears all of it down, children first, on shutdown or a fatal error.

pub mod booter;
pub mod launcher;
pub mod receiver;
pub mod registration;
pub mod shutdown;

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::SupervisorSettings;
use crate::errors::{Result, SupervisorError};
use crate::exec::RootBackend;
use crate::protocol::ControlChannel;
use crate::tree::{ErrorSink, ProcessTree};

pub use booter::run_slave_booter;
pub use launcher::RootLauncher;
pub use receiver::{REGISTRATION_QUEUE_CAPACITY, RegistrationEvent, spawn_receiver};
pub use registration::RegistrationHandler;
pub use shutdown::Shutdown;

/// Top-level coordinator for one process tree.
pub struct Supervisor {
    tree: Arc<ProcessTree>,
    backend: Arc<dyn RootBackend>,
    errors: Arc<dyn ErrorSink>,
    settings: SupervisorSettings,
}

impl Supervisor {
    pub fn new(
        tree: Arc<ProcessTree>,
        backend: Arc<dyn RootBackend>,
        errors: Arc<dyn ErrorSink>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            tree,
            backend,
            errors,
            settings,
        }
    }

    pub fn tree(&self) -> &Arc<ProcessTree> {
        &self.tree
    }

    /// Supervise the tree until `shutdown` fires or a fatal error occurs.
    ///
    /// On shutdown the signal is re-triggered before returning, so other
    /// observers still see it. Every node is shut down before this returns,
    /// on both paths. A fatal error is returned after cleanup.
    pub async fn run(self, channel: ControlChannel, shutdown: Shutdown) -> Result<()> {
        info!(nodes = self.tree.len(), "supervisor starting");

        let (events_tx, mut events_rx) = mpsc::channel(REGISTRATION_QUEUE_CAPACITY);
        let receiver = spawn_receiver(channel, events_tx);

        let mut tasks = JoinSet::new();
        for node in self.tree.slaves() {
            if node.is_root() {
                let launcher = RootLauncher::new(
                    Arc::clone(&self.tree),
                    Arc::clone(&self.backend),
                    Arc::clone(&self.errors),
                    self.settings.respawn_delay,
                );
                tasks.spawn(launcher.run());
            } else {
                tasks.spawn(run_slave_booter(Arc::clone(&self.tree), node.id()));
            }
        }

        let handler =
            RegistrationHandler::new(Arc::clone(&self.tree), self.settings.handshake_timeout);

        let outcome = loop {
            tokio::select! {
                biased;

                _ = shutdown.wait() => {
                    info!("shutdown requested");
                    shutdown.trigger();
                    break Ok(());
                }

                event = events_rx.recv() => {
                    let Some(event) = event else {
                        break Err(SupervisorError::Setup(
                            "control channel receiver stopped unexpectedly".to_string(),
                        ));
                    };

                    match handler.handle(event).await {
                        Ok(Some(id)) => debug!(node = %self.tree.node(id).name(), "node attached"),
                        Ok(None) => {}
                        Err(e) => {
                            error!(error = %e, "fatal registration error");
                            break Err(e);
                        }
                    }
                }
            }
        };

        receiver.abort();
        tasks.shutdown().await;
        self.shutdown_nodes().await;

        info!(ok = outcome.is_ok(), "supervisor stopped");
        outcome
    }

    /// Shut every node down, deepest first, each bounded by the configured
    /// shutdown timeout.
    pub async fn shutdown_nodes(&self) {
        for id in self.tree.shutdown_order() {
            let node = self.tree.node(id);
            debug!(node = %node.name(), "shutting down node");
            if timeout(self.settings.shutdown_timeout, node.shutdown())
                .await
                .is_err()
            {
                warn!(
                    node = %node.name(),
                    timeout = ?self.settings.shutdown_timeout,
                    "node did not finish shutting down in time"
                );
            }
        }
    }
}
