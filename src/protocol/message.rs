// src/protocol/message.rs

use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// Errors produced when a control message cannot be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MessageError {
    #[error("empty message")]
    Empty,

    #[error("unknown message kind '{0}'")]
    UnknownKind(String),

    #[error("malformed {kind} message: {detail}")]
    Malformed { kind: &'static str, detail: String },

    #[error("message is not valid UTF-8")]
    InvalidUtf8,

    #[error("message longer than {limit} bytes")]
    TooLong { limit: usize },
}

/// A single control message exchanged with a managed process.
///
/// Every message is `<kind>:<payload>` text:
///
/// | kind | direction            | payload              |
/// |------|----------------------|----------------------|
/// | `P`  | process → supervisor | `<pid>:<identifier>` |
/// | `S`  | supervisor → process | `<node name>`        |
/// | `R`  | process → supervisor | `OK` or error text   |
/// | `F`  | process → supervisor | loaded file path     |
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Registration handshake sent over a freshly passed descriptor.
    Pid { pid: u32, identifier: String },
    /// Ask a running parent process to fork/exec the named child.
    Spawn { name: String },
    /// Outcome of the process's boot action.
    BootResult(Result<(), String>),
    /// A file the process loaded while booting.
    Feature(PathBuf),
}

impl Message {
    pub fn spawn(name: impl Into<String>) -> Self {
        Message::Spawn { name: name.into() }
    }

    pub fn pid(pid: u32, identifier: impl Into<String>) -> Self {
        Message::Pid {
            pid,
            identifier: identifier.into(),
        }
    }

    /// Encode into wire text (without the frame terminator).
    pub fn encode(&self) -> String {
        self.to_string()
    }

    /// Decode wire text (without the frame terminator).
    pub fn parse(raw: &str) -> Result<Self, MessageError> {
        if raw.is_empty() {
            return Err(MessageError::Empty);
        }

        let (kind, payload) = raw
            .split_once(':')
            .ok_or_else(|| MessageError::UnknownKind(raw.to_string()))?;

        match kind {
            "P" => parse_pid(payload),
            "S" => {
                if payload.is_empty() {
                    return Err(MessageError::Malformed {
                        kind: "spawn",
                        detail: "missing node name".to_string(),
                    });
                }
                Ok(Message::spawn(payload))
            }
            "R" => {
                if payload == "OK" {
                    Ok(Message::BootResult(Ok(())))
                } else {
                    Ok(Message::BootResult(Err(payload.to_string())))
                }
            }
            "F" => Ok(Message::Feature(PathBuf::from(payload))),
            other => Err(MessageError::UnknownKind(other.to_string())),
        }
    }
}

fn parse_pid(payload: &str) -> Result<Message, MessageError> {
    let (pid, identifier) = payload
        .split_once(':')
        .ok_or_else(|| MessageError::Malformed {
            kind: "pid",
            detail: format!("expected '<pid>:<identifier>', got '{payload}'"),
        })?;

    let pid: u32 = pid.parse().map_err(|e| MessageError::Malformed {
        kind: "pid",
        detail: format!("invalid pid '{pid}': {e}"),
    })?;

    if identifier.is_empty() {
        return Err(MessageError::Malformed {
            kind: "pid",
            detail: "missing identifier".to_string(),
        });
    }

    Ok(Message::pid(pid, identifier))
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Message::Pid { pid, identifier } => write!(f, "P:{pid}:{identifier}"),
            Message::Spawn { name } => write!(f, "S:{name}"),
            Message::BootResult(Ok(())) => write!(f, "R:OK"),
            Message::BootResult(Err(e)) => write!(f, "R:{e}"),
            Message::Feature(path) => write!(f, "F:{}", path.display()),
        }
    }
}
