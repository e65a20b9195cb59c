// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Errors fall into two camps:
//! - fatal ones (setup, unknown registration identifier, config) that the
//!   top-level entry point turns into a process exit;
//! - transient ones scoped to a single connection, which are logged and
//!   otherwise ignored so supervision of everything else continues.

use thiserror::Error;

use crate::protocol::MessageError;

#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Setup failure: {0}")]
    Setup(String),

    #[error("Unknown identifier in registration handshake: {0}")]
    UnknownIdentifier(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Cycle detected in process tree: {0}")]
    TreeCycle(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] MessageError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl SupervisorError {
    /// Whether this error means the supervisor can no longer hold a
    /// consistent view of the tree and must stop.
    pub fn is_fatal(&self) -> bool {
        match self {
            SupervisorError::Setup(_)
            | SupervisorError::UnknownIdentifier(_)
            | SupervisorError::ConfigError(_)
            | SupervisorError::TreeCycle(_)
            | SupervisorError::TomlError(_) => true,
            SupervisorError::Protocol(_)
            | SupervisorError::IoError(_)
            | SupervisorError::Other(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, SupervisorError>;
