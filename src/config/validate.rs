// src/config/validate.rs

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, RawConfigFile, SupervisorSettings, parse_duration};
use crate::errors::{Result, SupervisorError};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = SupervisorError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_nodes(&raw)?;
        validate_command(&raw)?;
        let settings = parse_settings(&raw)?;
        validate_parents(&raw)?;
        let root = find_root(&raw)?;
        validate_tree(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.command, root, settings, raw.node))
    }
}

fn ensure_has_nodes(cfg: &RawConfigFile) -> Result<()> {
    if cfg.node.is_empty() {
        return Err(SupervisorError::ConfigError(
            "config must contain at least one [node.<name>] section".to_string(),
        ));
    }
    Ok(())
}

fn validate_command(cfg: &RawConfigFile) -> Result<()> {
    if cfg.command.trim().is_empty() {
        return Err(SupervisorError::ConfigError(
            "`command` must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn parse_settings(cfg: &RawConfigFile) -> Result<SupervisorSettings> {
    let field = |key: &str, value: &str| {
        parse_duration(value).map_err(|e| {
            SupervisorError::ConfigError(format!("[supervisor].{key}: {e}"))
        })
    };

    Ok(SupervisorSettings {
        shutdown_timeout: field("shutdown_timeout", &cfg.supervisor.shutdown_timeout)?,
        handshake_timeout: field("handshake_timeout", &cfg.supervisor.handshake_timeout)?,
        respawn_delay: field("respawn_delay", &cfg.supervisor.respawn_delay)?,
    })
}

fn validate_parents(cfg: &RawConfigFile) -> Result<()> {
    for (name, node) in cfg.node.iter() {
        let Some(parent) = node.parent.as_ref() else {
            continue;
        };
        if parent == name {
            return Err(SupervisorError::ConfigError(format!(
                "node '{}' cannot be its own parent",
                name
            )));
        }
        if !cfg.node.contains_key(parent) {
            return Err(SupervisorError::ConfigError(format!(
                "node '{}' has unknown parent '{}'",
                name, parent
            )));
        }
    }
    Ok(())
}

fn find_root(cfg: &RawConfigFile) -> Result<String> {
    let roots: Vec<&String> = cfg
        .node
        .iter()
        .filter(|(_, node)| node.parent.is_none())
        .map(|(name, _)| name)
        .collect();

    match roots.as_slice() {
        [root] => Ok((*root).clone()),
        [] => Err(SupervisorError::ConfigError(
            "no root node: exactly one node must have no `parent`".to_string(),
        )),
        many => Err(SupervisorError::ConfigError(format!(
            "multiple root nodes {:?}: exactly one node must have no `parent`",
            many
        ))),
    }
}

fn validate_tree(cfg: &RawConfigFile) -> Result<()> {
    // Edge direction: parent -> child.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for name in cfg.node.keys() {
        graph.add_node(name.as_str());
    }

    for (name, node) in cfg.node.iter() {
        if let Some(parent) = node.parent.as_ref() {
            graph.add_edge(parent.as_str(), name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(SupervisorError::TreeCycle(format!(
            "cycle detected in process tree involving node '{}'",
            cycle.node_id()
        ))),
    }
}
