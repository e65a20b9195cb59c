// crates/test-utils/src/builders.rs

use std::collections::BTreeMap;

use forktree::config::{ConfigFile, NodeConfig, RawConfigFile, SupervisorSection};
use forktree::errors::Result;

/// Builder for `ConfigFile` to simplify test setup.
pub struct TreeConfigBuilder {
    config: RawConfigFile,
}

impl TreeConfigBuilder {
    pub fn new(command: &str) -> Self {
        Self {
            config: RawConfigFile {
                command: command.to_string(),
                supervisor: SupervisorSection::default(),
                node: BTreeMap::new(),
            },
        }
    }

    pub fn root(mut self, name: &str) -> Self {
        self.config
            .node
            .insert(name.to_string(), NodeConfig { parent: None });
        self
    }

    pub fn child(mut self, name: &str, parent: &str) -> Self {
        self.config.node.insert(
            name.to_string(),
            NodeConfig {
                parent: Some(parent.to_string()),
            },
        );
        self
    }

    pub fn shutdown_timeout(mut self, value: &str) -> Self {
        self.config.supervisor.shutdown_timeout = value.to_string();
        self
    }

    pub fn handshake_timeout(mut self, value: &str) -> Self {
        self.config.supervisor.handshake_timeout = value.to_string();
        self
    }

    pub fn respawn_delay(mut self, value: &str) -> Self {
        self.config.supervisor.respawn_delay = value.to_string();
        self
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

/// `boot` at the root with a single `app` child.
pub fn boot_app() -> ConfigFile {
    TreeConfigBuilder::new("ruby -e boot")
        .root("boot")
        .child("app", "boot")
        .respawn_delay("20ms")
        .handshake_timeout("500ms")
        .shutdown_timeout("500ms")
        .build()
}

/// `boot → app → {web, worker}` plus `boot → test`.
pub fn layered() -> ConfigFile {
    TreeConfigBuilder::new("ruby -e boot")
        .root("boot")
        .child("app", "boot")
        .child("test", "boot")
        .child("web", "app")
        .child("worker", "app")
        .respawn_delay("20ms")
        .handshake_timeout("500ms")
        .shutdown_timeout("500ms")
        .build()
}
