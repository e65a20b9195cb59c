// src/supervisor/receiver.rs

use std::os::fd::OwnedFd;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::ControlChannel;

/// Registrations waiting for the coordinator.
pub const REGISTRATION_QUEUE_CAPACITY: usize = 3;

/// Pause after a failed read so a persistently broken channel doesn't spin.
const RECEIVE_ERROR_PAUSE: Duration = Duration::from_millis(50);

/// A descriptor passed over the control channel by a registering process.
#[derive(Debug)]
pub struct RegistrationEvent {
    pub fd: OwnedFd,
}

/// Spawn the control-channel receiver loop.
///
/// Every successfully received descriptor becomes one `RegistrationEvent`.
/// Failed reads are logged and produce no event; the loop keeps going. It
/// stops only once the event queue's receiver is gone.
pub fn spawn_receiver(
    channel: ControlChannel,
    events: mpsc::Sender<RegistrationEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("control channel receiver started");

        loop {
            let received = tokio::select! {
                _ = events.closed() => break,
                received = channel.recv_descriptor() => received,
            };

            match received {
                Ok(fd) => {
                    debug!(?fd, "descriptor received");
                    if events.send(RegistrationEvent { fd }).await.is_err() {
                        break;
                    }
                }
                Err(e) => {
                    warn!(error = %e, "failed to receive descriptor on control channel");
                    tokio::time::sleep(RECEIVE_ERROR_PAUSE).await;
                }
            }
        }

        info!("control channel receiver finished (queue closed)");
    })
}
