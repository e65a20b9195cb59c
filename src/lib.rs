// src/lib.rs

pub mod cli;
pub mod config;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod protocol;
pub mod signals;
pub mod supervisor;
pub mod tree;
pub mod types;

use std::sync::Arc;

use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{ConfigFile, load_and_validate};
use crate::errors::{Result, SupervisorError};
use crate::exec::ProcessRootBackend;
use crate::protocol::ControlChannel;
use crate::supervisor::{Shutdown, Supervisor};
use crate::tree::{LogErrorSink, ProcessTree, SignalProcessControl};

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading
/// - the control channel handed to the root process
/// - the process tree and the supervisor
/// - signal handling
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)?;

    if args.dry_run {
        print_dry_run(&cfg);
        return Ok(());
    }

    let (channel, remote) = ControlChannel::open()
        .map_err(|e| SupervisorError::Setup(format!("failed to open control channel: {e}")))?;

    let errors = Arc::new(LogErrorSink);
    let tree = Arc::new(ProcessTree::from_config(
        &cfg,
        Arc::new(SignalProcessControl),
        errors.clone(),
    ));
    let backend = Arc::new(ProcessRootBackend::new(remote));

    let shutdown = Shutdown::new();
    signals::forward_signals(shutdown.clone());

    info!(
        config = %args.config.display(),
        root = cfg.root(),
        nodes = tree.len(),
        "forktree starting"
    );

    Supervisor::new(tree, backend, errors, cfg.settings())
        .run(channel, shutdown)
        .await
}

/// Print the validated tree without launching anything.
pub fn print_dry_run(cfg: &ConfigFile) {
    print!("{}", render_tree(cfg));
    debug!("dry-run complete (no execution)");
}

/// Render the config as an indented tree.
pub fn render_tree(cfg: &ConfigFile) -> String {
    let settings = cfg.settings();
    let mut out = String::new();
    out.push_str("forktree dry-run\n");
    out.push_str(&format!("  command = {}\n", cfg.command()));
    out.push_str(&format!(
        "  shutdown_timeout = {:?}\n",
        settings.shutdown_timeout
    ));
    out.push_str(&format!(
        "  handshake_timeout = {:?}\n",
        settings.handshake_timeout
    ));
    out.push_str(&format!("  respawn_delay = {:?}\n", settings.respawn_delay));
    out.push('\n');

    out.push_str(&format!("nodes ({}):\n", cfg.nodes().len()));
    render_node(cfg, cfg.root(), 1, &mut out);
    out
}

fn render_node(cfg: &ConfigFile, name: &str, indent: usize, out: &mut String) {
    out.push_str(&format!("{}- {name}\n", "  ".repeat(indent)));
    for child in cfg
        .nodes()
        .keys()
        .filter(|n| cfg.parent_of(n) == Some(name))
    {
        render_node(cfg, child, indent + 1, out);
    }
}
