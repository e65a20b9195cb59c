// src/tree/report.rs

use std::fmt;

use tracing::error;

/// What went wrong with a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrashKind {
    /// The process ran and then exited (or its control connection closed).
    Crashed,
    /// The process could not be started at all.
    CouldNotStart,
    /// The process registered but reported a failed boot.
    BootFailed,
}

impl fmt::Display for CrashKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CrashKind::Crashed => "process crashed",
            CrashKind::CouldNotStart => "process could not start",
            CrashKind::BootFailed => "process failed to boot",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CrashReport {
    pub node: String,
    pub kind: CrashKind,
    /// Captured output or error text, possibly empty.
    pub output: String,
}

impl CrashReport {
    pub fn new(node: impl Into<String>, kind: CrashKind, output: impl Into<String>) -> Self {
        Self {
            node: node.into(),
            kind,
            output: output.into(),
        }
    }
}

/// Where crash reports go. Supervision continues after every report.
pub trait ErrorSink: Send + Sync {
    fn report(&self, report: CrashReport);
}

/// Production sink: crash reports become `tracing` errors.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogErrorSink;

impl ErrorSink for LogErrorSink {
    fn report(&self, report: CrashReport) {
        if report.output.trim().is_empty() {
            error!(node = %report.node, kind = %report.kind, "managed process failure");
        } else {
            error!(
                node = %report.node,
                kind = %report.kind,
                "managed process failure; captured output:\n{}",
                report.output.trim_end()
            );
        }
    }
}
