// src/exec/command.rs

use std::fmt;
use std::os::fd::RawFd;
use std::process::Stdio;

use tokio::process::Command;

use crate::protocol::MASTER_FD_ENV;

/// A root command line split into program and arguments.
///
/// Splitting is naive: single spaces separate arguments and there is no
/// quoting. Empty segments (from repeated spaces) are skipped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub program: String,
    pub args: Vec<String>,
}

impl CommandLine {
    /// Returns `None` when the line contains no program.
    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split(' ').filter(|p| !p.is_empty()).map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Build the process image for the root: inherited environment plus the
    /// control-channel descriptor number, with combined output captured.
    pub fn to_command(&self, control_fd: RawFd) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .env(MASTER_FD_ENV, control_fd.to_string())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }
}

impl fmt::Display for CommandLine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}
