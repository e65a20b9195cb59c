// src/signals.rs

//! OS signal handling for graceful shutdown.
//!
//! On Unix, SIGINT, SIGTERM and SIGQUIT all request shutdown.

use std::io;

use tracing::{info, warn};

use crate::supervisor::Shutdown;

/// Wait for a termination signal.
pub async fn wait_for_shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut sigint = signal(SignalKind::interrupt())?;
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigquit = signal(SignalKind::quit())?;

    tokio::select! {
        _ = sigint.recv() => info!("received SIGINT"),
        _ = sigterm.recv() => info!("received SIGTERM"),
        _ = sigquit.recv() => info!("received SIGQUIT"),
    }
    Ok(())
}

/// Trigger `shutdown` when a termination signal arrives.
pub fn forward_signals(shutdown: Shutdown) {
    tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            warn!(error = %e, "failed to listen for shutdown signals; falling back to Ctrl+C");
            if tokio::signal::ctrl_c().await.is_err() {
                return;
            }
        }
        shutdown.trigger();
    });
}
