// src/supervisor/registration.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::time::timeout;
use tracing::{info, warn};

use crate::errors::{Result, SupervisorError};
use crate::protocol::{ControlSocket, Message};
use crate::supervisor::receiver::RegistrationEvent;
use crate::tree::ProcessTree;
use crate::types::NodeId;

/// Binds freshly registered processes to their tree nodes.
#[derive(Debug, Clone)]
pub struct RegistrationHandler {
    tree: Arc<ProcessTree>,
    handshake_timeout: Duration,
}

impl RegistrationHandler {
    pub fn new(tree: Arc<ProcessTree>, handshake_timeout: Duration) -> Self {
        Self {
            tree,
            handshake_timeout,
        }
    }

    /// Handle one registration.
    ///
    /// Returns the attached node, or `Ok(None)` when the connection was
    /// dropped for a transient reason (logged). The only error is
    /// [`SupervisorError::UnknownIdentifier`], which is fatal.
    ///
    /// The node's run loop is spawned as its own task; this returns as soon
    /// as the handshake has been matched.
    pub async fn handle(&self, event: RegistrationEvent) -> Result<Option<NodeId>> {
        let mut socket = match ControlSocket::from_fd(event.fd) {
            Ok(socket) => socket,
            Err(e) => {
                warn!(error = %e, "failed to wrap registered descriptor");
                return Ok(None);
            }
        };

        let (pid, identifier) = match timeout(self.handshake_timeout, socket.read_message()).await
        {
            Ok(Ok(Some(Message::Pid { pid, identifier }))) => (pid, identifier),
            Ok(Ok(Some(other))) => {
                warn!(message = %other, "expected registration handshake");
                return Ok(None);
            }
            Ok(Ok(None)) => {
                warn!("connection closed before registration handshake");
                return Ok(None);
            }
            Ok(Err(e)) => {
                warn!(error = %e, "failed to read registration handshake");
                return Ok(None);
            }
            Err(_) => {
                warn!(timeout = ?self.handshake_timeout, "registration handshake timed out");
                return Ok(None);
            }
        };

        let node = self
            .tree
            .find_slave_by_name(&identifier)
            .map(Arc::clone)
            .ok_or_else(|| SupervisorError::UnknownIdentifier(identifier.clone()))?;

        info!(node = %node.name(), pid, "registration accepted");
        let id = node.id();
        tokio::spawn(node.run(identifier, pid, socket));
        Ok(Some(id))
    }
}
