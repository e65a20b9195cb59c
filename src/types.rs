// src/types.rs

use std::fmt;

/// Index of a node in the process tree's node table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub(crate) usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Readiness of a node's current process instance.
///
/// `NotStarted → Booting → Booted → Unbooted → Booting → …`, with `Dead`
/// reachable from anywhere once the node is shut down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    NotStarted,
    Booting,
    Booted,
    Unbooted,
    Dead,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeState::NotStarted => "not-started",
            NodeState::Booting => "booting",
            NodeState::Booted => "booted",
            NodeState::Unbooted => "unbooted",
            NodeState::Dead => "dead",
        };
        f.write_str(s)
    }
}

/// Versioned node state. `generation` is bumped on every entry into
/// `Booted`, so waiters can tell one boot cycle from the next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeStatus {
    pub state: NodeState,
    pub generation: u64,
}

impl Default for NodeStatus {
    fn default() -> Self {
        Self {
            state: NodeState::NotStarted,
            generation: 0,
        }
    }
}
