// src/supervisor/booter.rs

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::protocol::Message;
use crate::tree::ProcessTree;
use crate::types::NodeId;

/// Boot loop for one non-root node.
///
/// Each cycle waits for the parent to boot, asks the parent's process to
/// spawn this node, then waits for the parent to leave that boot, a restart
/// request for this node, or a crash of the spawned instance. Whichever comes
/// first, the node's subtree is killed before the next cycle, so there is
/// never more than one live instance.
pub async fn run_slave_booter(tree: Arc<ProcessTree>, id: NodeId) {
    let node = Arc::clone(tree.node(id));
    let Some(parent) = tree.parent_of(id).map(Arc::clone) else {
        warn!(node = %node.name(), "root node has no booter");
        return;
    };

    debug!(node = %node.name(), parent = %parent.name(), "slave booter started");

    loop {
        let generation = parent.wait_until_booted().await;

        // Subscribe before asking for the spawn so a restart request or an
        // early crash racing with the spawn is not lost.
        let mut restart = node.restart_listener();
        let mut crashed = node.crash_listener();

        match parent.send(&Message::spawn(node.name())).await {
            Ok(()) => info!(
                node = %node.name(),
                parent = %parent.name(),
                generation,
                "spawn requested"
            ),
            Err(e) => warn!(
                node = %node.name(),
                parent = %parent.name(),
                error = %e,
                "failed to send spawn request"
            ),
        }

        tokio::select! {
            _ = parent.wait_until_unbooted(generation) => {
                info!(node = %node.name(), parent = %parent.name(), "parent unbooted; restarting");
            }
            _ = restart.requested() => {
                info!(node = %node.name(), "restart requested; restarting");
            }
            _ = crashed.requested() => {
                info!(node = %node.name(), "process crashed; respawning");
            }
        }

        tree.kill_subtree(id);
    }
}
