// src/tree/node.rs

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{oneshot, watch};
use tracing::{debug, info, warn};

use crate::errors::SupervisorError;
use crate::protocol::{ControlSocket, Message, MessageWriter};
use crate::tree::control::ProcessControl;
use crate::tree::report::{CrashKind, CrashReport, ErrorSink};
use crate::types::{NodeId, NodeState, NodeStatus};

/// The live process behind a node, from registration until it is killed or
/// its control connection closes.
#[derive(Debug)]
struct Instance {
    serial: u64,
    pid: u32,
    writer: Arc<MessageWriter>,
    /// Tells the instance's run loop to stop reading.
    cancel: Option<oneshot::Sender<()>>,
    /// Resolves once the run loop has returned.
    finished: Option<oneshot::Receiver<()>>,
}

/// One declared worker in the process tree.
pub struct SlaveNode {
    id: NodeId,
    name: String,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    depth: usize,

    status: watch::Sender<NodeStatus>,
    restarts: watch::Sender<u64>,
    crashes: watch::Sender<u64>,

    instance: Mutex<Option<Instance>>,
    serial: AtomicU64,
    features: Mutex<Vec<PathBuf>>,
    /// Root only: a lost control connection, reported by the launcher.
    lost_connection: Mutex<Option<String>>,

    control: Arc<dyn ProcessControl>,
    errors: Arc<dyn ErrorSink>,
}

impl std::fmt::Debug for SlaveNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SlaveNode")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("parent", &self.parent)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl SlaveNode {
    pub(crate) fn new(
        id: NodeId,
        name: String,
        parent: Option<NodeId>,
        children: Vec<NodeId>,
        depth: usize,
        control: Arc<dyn ProcessControl>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        let (status, _) = watch::channel(NodeStatus::default());
        let (restarts, _) = watch::channel(0u64);
        let (crashes, _) = watch::channel(0u64);
        Self {
            id,
            name,
            parent,
            children,
            depth,
            status,
            restarts,
            crashes,
            instance: Mutex::new(None),
            serial: AtomicU64::new(0),
            features: Mutex::new(Vec::new()),
            lost_connection: Mutex::new(None),
            control,
            errors,
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    /// Distance from the root (the root is 0).
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn status(&self) -> NodeStatus {
        *self.status.borrow()
    }

    pub fn state(&self) -> NodeState {
        self.status.borrow().state
    }

    /// Pid of the current instance, if one is registered.
    pub fn pid(&self) -> Option<u32> {
        self.lock_instance().as_ref().map(|i| i.pid)
    }

    /// Write side of the current instance's control socket.
    pub fn socket(&self) -> Option<Arc<MessageWriter>> {
        self.lock_instance().as_ref().map(|i| Arc::clone(&i.writer))
    }

    /// Files the current instance reported loading.
    pub fn features(&self) -> Vec<PathBuf> {
        self.features
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Send a message to the current instance.
    pub async fn send(&self, message: &Message) -> io::Result<()> {
        let writer = self.socket().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotConnected,
                format!("node '{}' has no registered process", self.name),
            )
        })?;
        writer.send(message).await
    }

    /// Block until the node is Booted; returns that boot's generation.
    pub async fn wait_until_booted(&self) -> u64 {
        let mut rx = self.status.subscribe();
        let booted = rx
            .wait_for(|s| s.state == NodeState::Booted)
            .await
            .map(|status| status.generation);
        match booted {
            Ok(generation) => generation,
            // The sender lives in `self`, so this cannot close while borrowed.
            Err(_) => std::future::pending().await,
        }
    }

    /// Block until the node leaves the Booted state of `generation`.
    ///
    /// Returns immediately if that boot is already over, even when the node
    /// has since booted again.
    pub async fn wait_until_unbooted(&self, generation: u64) {
        let mut rx = self.status.subscribe();
        let closed = rx
            .wait_for(|s| s.state != NodeState::Booted || s.generation != generation)
            .await
            .is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }

    /// Subscribe to restart requests issued from now on.
    pub fn restart_listener(&self) -> RestartListener {
        RestartListener {
            rx: self.restarts.subscribe(),
        }
    }

    /// Subscribe to crashes of instances registered from now on.
    pub fn crash_listener(&self) -> RestartListener {
        RestartListener {
            rx: self.crashes.subscribe(),
        }
    }

    /// Root only: take the detail of a control connection lost since the
    /// last call, if any.
    pub fn take_lost_connection(&self) -> Option<String> {
        self.lost_connection
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    pub async fn wait_until_restart_requested(&self) {
        self.restart_listener().requested().await
    }

    pub fn request_restart(&self) {
        info!(node = %self.name, "restart requested");
        self.restarts.send_modify(|n| *n += 1);
    }

    /// Kill the current process instance. Idempotent: once the instance is
    /// gone, further calls do nothing.
    pub fn kill(&self) {
        let instance = self.lock_instance().take();
        if let Some(instance) = instance {
            self.retire(instance);
        }
        self.set_state_if(NodeState::Unbooted, |s| {
            matches!(s, NodeState::Booting | NodeState::Booted)
        });
    }

    /// Kill the current instance, wait for its run loop to stop, and mark the
    /// node Dead. Used once, at the end of supervision.
    pub async fn shutdown(&self) {
        let instance = self.lock_instance().take();
        let finished = match instance {
            Some(mut instance) => {
                let finished = instance.finished.take();
                self.retire(instance);
                finished
            }
            None => None,
        };

        self.set_state_if(NodeState::Dead, |_| true);

        if let Some(finished) = finished {
            let _ = finished.await;
        }
        debug!(node = %self.name, "node shut down");
    }

    /// Service a freshly registered process instance until it is killed or
    /// its control connection closes.
    ///
    /// The node moves to Booting immediately and to Booted once the process
    /// reports a successful boot.
    pub async fn run(self: Arc<Self>, identifier: String, pid: u32, socket: ControlSocket) {
        if identifier != self.name {
            warn!(node = %self.name, %identifier, "registration identifier differs from node name");
        }

        let (mut reader, writer) = socket.into_split();
        let (cancel_tx, mut cancel_rx) = oneshot::channel::<()>();
        let (_finished_tx, finished_rx) = oneshot::channel::<()>();
        let serial = self.serial.fetch_add(1, Ordering::SeqCst) + 1;

        let previous = {
            let mut slot = self.lock_instance();
            if self.state() == NodeState::Dead {
                drop(slot);
                warn!(node = %self.name, pid, "registration for a shut-down node; killing process");
                self.kill_pid(pid);
                return;
            }
            slot.replace(Instance {
                serial,
                pid,
                writer: Arc::new(writer),
                cancel: Some(cancel_tx),
                finished: Some(finished_rx),
            })
        };

        if let Some(previous) = previous {
            warn!(
                node = %self.name,
                old_pid = previous.pid,
                new_pid = pid,
                "node registered again while an instance was alive; killing the old one"
            );
            self.retire(previous);
        }

        self.lock_features().clear();
        self.set_state_if(NodeState::Booting, |s| s != NodeState::Dead);
        info!(node = %self.name, pid, "process registered");

        loop {
            tokio::select! {
                _ = &mut cancel_rx => {
                    debug!(node = %self.name, pid, "instance retired; run loop stopping");
                    return;
                }
                message = reader.read_message() => match message {
                    Ok(Some(Message::BootResult(Ok(())))) => self.mark_booted(serial),
                    Ok(Some(Message::BootResult(Err(reason)))) => {
                        self.boot_failed(serial, reason);
                    }
                    Ok(Some(Message::Feature(path))) => {
                        debug!(node = %self.name, path = %path.display(), "feature loaded");
                        self.lock_features().push(path);
                    }
                    Ok(Some(other)) => {
                        warn!(node = %self.name, message = %other, "unexpected message from process");
                    }
                    Ok(None) => {
                        self.connection_closed(serial, String::new());
                        return;
                    }
                    Err(SupervisorError::Protocol(e)) => {
                        warn!(node = %self.name, error = %e, "ignoring undecodable message");
                    }
                    Err(e) => {
                        self.connection_closed(serial, e.to_string());
                        return;
                    }
                }
            }
        }
    }

    fn mark_booted(&self, serial: u64) {
        let slot = self.lock_instance();
        if !matches!(slot.as_ref(), Some(i) if i.serial == serial) {
            return;
        }
        let booted = self.status.send_if_modified(|s| {
            if s.state == NodeState::Booting {
                s.state = NodeState::Booted;
                s.generation += 1;
                true
            } else {
                false
            }
        });
        drop(slot);

        if booted {
            info!(node = %self.name, generation = self.status().generation, "node booted");
        }
    }

    fn boot_failed(&self, serial: u64, reason: String) {
        let current = matches!(self.lock_instance().as_ref(), Some(i) if i.serial == serial);
        if !current {
            return;
        }
        self.set_state_if(NodeState::Unbooted, |s| {
            matches!(s, NodeState::Booting | NodeState::Booted)
        });
        self.errors
            .report(CrashReport::new(&self.name, CrashKind::BootFailed, reason));
    }

    /// The instance's control connection ended on its own.
    fn connection_closed(&self, serial: u64, detail: String) {
        let instance = {
            let mut slot = self.lock_instance();
            match slot.as_ref() {
                Some(i) if i.serial == serial => slot.take(),
                _ => None,
            }
        };

        // Killed or replaced in the meantime: not a crash.
        let Some(instance) = instance else {
            return;
        };

        warn!(node = %self.name, pid = instance.pid, "control connection closed");
        self.retire(instance);
        self.set_state_if(NodeState::Unbooted, |s| {
            matches!(s, NodeState::Booting | NodeState::Booted)
        });

        // The root's process is owned by the launcher, which reports its exit.
        if self.is_root() {
            *self
                .lost_connection
                .lock()
                .unwrap_or_else(PoisonError::into_inner) = Some(detail);
            return;
        }

        self.errors
            .report(CrashReport::new(&self.name, CrashKind::Crashed, detail));
        self.crashes.send_modify(|n| *n += 1);
    }

    fn retire(&self, mut instance: Instance) {
        if let Some(cancel) = instance.cancel.take() {
            let _ = cancel.send(());
        }
        self.kill_pid(instance.pid);
        info!(node = %self.name, pid = instance.pid, "process instance killed");
    }

    fn kill_pid(&self, pid: u32) {
        if let Err(e) = self.control.kill(pid) {
            warn!(node = %self.name, pid, error = %e, "failed to kill process");
        }
    }

    fn set_state_if(&self, next: NodeState, when: impl FnOnce(NodeState) -> bool) {
        let changed = self.status.send_if_modified(|s| {
            if s.state != next && when(s.state) {
                s.state = next;
                true
            } else {
                false
            }
        });
        if changed {
            debug!(node = %self.name, state = %next, "node state changed");
        }
    }

    fn lock_instance(&self) -> MutexGuard<'_, Option<Instance>> {
        self.instance.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_features(&self) -> MutexGuard<'_, Vec<PathBuf>> {
        self.features.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A per-cycle subscription to a node's restart requests or crashes.
///
/// Only events after the listener was created are observed; dropping it
/// discards anything pending.
#[derive(Debug)]
pub struct RestartListener {
    rx: watch::Receiver<u64>,
}

impl RestartListener {
    pub async fn requested(&mut self) {
        if self.rx.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}
