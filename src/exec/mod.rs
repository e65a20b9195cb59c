// src/exec/mod.rs

//! Process execution layer for the root process.
//!
//! - [`command`] turns the configured command line into a
//!   `tokio::process::Command`.
//! - [`backend`] provides the `RootBackend` trait and the production
//!   `ProcessRootBackend`, which tests replace with a fake.

pub mod backend;
pub mod command;

pub use backend::{ExitKind, ProcessRootBackend, RootBackend, RootExit, RootInstance};
pub use command::CommandLine;
