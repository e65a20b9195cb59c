// src/tree/mod.rs

//! The process tree: declared nodes, their parent links, and per-node
//! readiness state.
//!
//! - [`node`] holds the per-node state machine and the run loop servicing a
//!   registered process instance.
//! - [`control`] abstracts killing a pid.
//! - [`report`] abstracts where crash reports go.
//!
//! Nodes live in one table indexed by [`NodeId`]; parent/child links are
//! indices, never references. Indices are assigned breadth-first from the
//! root, so every parent has a smaller index than its children.

pub mod control;
pub mod node;
pub mod report;

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;

use tracing::debug;

use crate::config::ConfigFile;
use crate::types::NodeId;

pub use control::{ProcessControl, SignalProcessControl};
pub use node::{RestartListener, SlaveNode};
pub use report::{CrashKind, CrashReport, ErrorSink, LogErrorSink};

#[derive(Debug)]
pub struct ProcessTree {
    nodes: Vec<Arc<SlaveNode>>,
    by_name: HashMap<String, NodeId>,
    root: NodeId,
    exec_command: String,
}

impl ProcessTree {
    /// Build the tree from a validated config.
    pub fn from_config(
        cfg: &ConfigFile,
        control: Arc<dyn ProcessControl>,
        errors: Arc<dyn ErrorSink>,
    ) -> Self {
        let mut children_of: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for name in cfg.nodes().keys() {
            if let Some(parent) = cfg.parent_of(name) {
                children_of.entry(parent).or_default().push(name.as_str());
            }
        }

        // Breadth-first from the root: (name, depth).
        let mut order: Vec<(&str, usize)> = Vec::with_capacity(cfg.nodes().len());
        let mut queue: VecDeque<(&str, usize)> = VecDeque::from([(cfg.root(), 0)]);
        while let Some((name, depth)) = queue.pop_front() {
            order.push((name, depth));
            for child in children_of.get(name).into_iter().flatten() {
                queue.push_back((*child, depth + 1));
            }
        }

        let by_name: HashMap<String, NodeId> = order
            .iter()
            .enumerate()
            .map(|(idx, (name, _))| (name.to_string(), NodeId(idx)))
            .collect();

        let nodes = order
            .iter()
            .enumerate()
            .map(|(idx, (name, depth))| {
                let parent = cfg.parent_of(name).and_then(|p| by_name.get(p).copied());
                let children = children_of
                    .get(name)
                    .into_iter()
                    .flatten()
                    .filter_map(|c| by_name.get(*c).copied())
                    .collect();
                Arc::new(SlaveNode::new(
                    NodeId(idx),
                    name.to_string(),
                    parent,
                    children,
                    *depth,
                    Arc::clone(&control),
                    Arc::clone(&errors),
                ))
            })
            .collect();

        debug!(nodes = order.len(), root = cfg.root(), "process tree built");

        Self {
            nodes,
            by_name,
            root: NodeId(0),
            exec_command: cfg.command().to_string(),
        }
    }

    pub fn root(&self) -> &Arc<SlaveNode> {
        self.node(self.root)
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    /// Command line used to launch the root process.
    pub fn exec_command(&self) -> &str {
        &self.exec_command
    }

    /// Every node, root first, then breadth-first.
    pub fn slaves(&self) -> impl Iterator<Item = &Arc<SlaveNode>> {
        self.nodes.iter()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Look up a node by id. Ids only come from this tree, so this indexes
    /// directly.
    pub fn node(&self, id: NodeId) -> &Arc<SlaveNode> {
        &self.nodes[id.0]
    }

    pub fn find_slave_by_name(&self, name: &str) -> Option<&Arc<SlaveNode>> {
        self.by_name.get(name).map(|id| self.node(*id))
    }

    pub fn parent_of(&self, id: NodeId) -> Option<&Arc<SlaveNode>> {
        self.node(id).parent().map(|p| self.node(p))
    }

    /// Every transitive descendant of `id`, parents before children.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.node(id).children().iter().rev().copied().collect();
        while let Some(next) = stack.pop() {
            out.push(next);
            stack.extend(self.node(next).children().iter().rev().copied());
        }
        out
    }

    /// Kill `id`'s instance and those of all its descendants, deepest first.
    ///
    /// Every kill is idempotent, so a descendant already killed by its own
    /// booter is not killed twice.
    pub fn kill_subtree(&self, id: NodeId) {
        let mut doomed = self.descendants(id);
        doomed.sort_by_key(|d| std::cmp::Reverse(self.node(*d).depth()));
        for descendant in doomed {
            self.node(descendant).kill();
        }
        self.node(id).kill();
    }

    /// Order in which nodes are shut down: children before parents.
    pub fn shutdown_order(&self) -> Vec<NodeId> {
        let mut order: Vec<NodeId> = (0..self.nodes.len()).map(NodeId).collect();
        order.sort_by_key(|id| (std::cmp::Reverse(self.node(*id).depth()), *id));
        order
    }

    /// Ask the named node to restart. Returns false for an unknown name.
    pub fn request_restart(&self, name: &str) -> bool {
        match self.find_slave_by_name(name) {
            Some(node) => {
                node.request_restart();
                true
            }
            None => false,
        }
    }
}
