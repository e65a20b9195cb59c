// src/config/model.rs

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// command = "ruby -rboot -e Boot.go"
///
/// [supervisor]
/// shutdown_timeout = "5s"
///
/// [node.boot]
///
/// [node.app]
/// parent = "boot"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct RawConfigFile {
    /// Command line for the root process, split on single spaces.
    pub command: String,

    #[serde(default)]
    pub supervisor: SupervisorSection,

    /// All nodes from `[node.<name>]`, keyed by name.
    #[serde(default)]
    pub node: BTreeMap<String, NodeConfig>,
}

/// `[supervisor]` section. Durations use `ms`, `s`, `m` or `h` suffixes.
#[derive(Debug, Clone, Deserialize)]
pub struct SupervisorSection {
    /// Upper bound on each node's shutdown.
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout: String,

    /// Upper bound on reading a registration handshake.
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout: String,

    /// Pause before relaunching a root process that exited or failed to start.
    #[serde(default = "default_respawn_delay")]
    pub respawn_delay: String,
}

fn default_shutdown_timeout() -> String {
    "5s".to_string()
}

fn default_handshake_timeout() -> String {
    "5s".to_string()
}

fn default_respawn_delay() -> String {
    "1s".to_string()
}

impl Default for SupervisorSection {
    fn default() -> Self {
        Self {
            shutdown_timeout: default_shutdown_timeout(),
            handshake_timeout: default_handshake_timeout(),
            respawn_delay: default_respawn_delay(),
        }
    }
}

/// `[node.<name>]` section. A node without `parent` is the root.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NodeConfig {
    #[serde(default)]
    pub parent: Option<String>,
}

/// Timing knobs of the supervisor, parsed from `[supervisor]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SupervisorSettings {
    pub shutdown_timeout: Duration,
    pub handshake_timeout: Duration,
    pub respawn_delay: Duration,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            shutdown_timeout: Duration::from_secs(5),
            handshake_timeout: Duration::from_secs(5),
            respawn_delay: Duration::from_secs(1),
        }
    }
}

/// A validated configuration: exactly one root, every parent declared, no
/// cycles. Only constructible through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    command: String,
    root: String,
    settings: SupervisorSettings,
    nodes: BTreeMap<String, NodeConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        command: String,
        root: String,
        settings: SupervisorSettings,
        nodes: BTreeMap<String, NodeConfig>,
    ) -> Self {
        Self {
            command,
            root,
            settings,
            nodes,
        }
    }

    pub fn command(&self) -> &str {
        &self.command
    }

    /// Name of the single node without a parent.
    pub fn root(&self) -> &str {
        &self.root
    }

    pub fn settings(&self) -> SupervisorSettings {
        self.settings
    }

    pub fn nodes(&self) -> &BTreeMap<String, NodeConfig> {
        &self.nodes
    }

    pub fn parent_of(&self, name: &str) -> Option<&str> {
        self.nodes.get(name).and_then(|n| n.parent.as_deref())
    }
}

/// Parse a simple duration string like `"3s"`, `"250ms"`, `"1m"`, `"2h"`.
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty duration string".to_string());
    }

    let idx = s
        .chars()
        .position(|c| !c.is_ascii_digit())
        .ok_or_else(|| "duration missing unit suffix".to_string())?;

    let (num_part, unit_part) = s.split_at(idx);
    let value: u64 = num_part
        .parse()
        .map_err(|e| format!("invalid duration number '{}': {}", num_part, e))?;
    let unit = unit_part.trim().to_lowercase();

    match unit.as_str() {
        "ms" => Ok(Duration::from_millis(value)),
        "s" => Ok(Duration::from_secs(value)),
        "m" => Ok(Duration::from_secs(value * 60)),
        "h" => Ok(Duration::from_secs(value * 60 * 60)),
        _ => Err(format!(
            "unsupported duration unit '{}'; expected ms, s, m, or h",
            unit
        )),
    }
}
