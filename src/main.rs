//! push-to-talk: keep the microphone muted unless a key is held
//!
//! The controller runs in the foreground and reads commands from stdin.
//! It supervises a key monitor that:
//! - Watches one push-to-talk key system-wide
//! - Unmutes the audio backend on press, mutes on release
//! - Can be told to bind the next pressed key instead
//! - Reports every mute state change back to the controller
//!
//! By default the monitor is this same executable re-run with the hidden
//! `monitor` subcommand, talking framed JSON over stdin/stdout.

mod audio;
mod cli;
mod config;
mod controller;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod prefs;
mod state;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use crate::audio::Backend;
use crate::cli::{Cli, Commands, MonitorArgs, RunArgs};
use crate::config::Config;
use crate::controller::{spawn_line_reader, Controller, TerminalView};
use crate::hotkey::KeyCode;
use crate::lifecycle::{Isolation, ShutdownSignal, SourceFactory, Supervisor};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = if cli.quiet {
        "error"
    } else {
        match cli.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    // stdout belongs to the terminal view, or to frames in a monitor process
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(format!("push_to_talk={},warn", log_level))),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command.unwrap_or_else(|| Commands::Run(RunArgs::default())) {
        Commands::Run(args) => run_controller(args).await,
        Commands::Monitor(args) => run_monitor(args).await,
    }
}

async fn run_controller(args: RunArgs) -> Result<()> {
    info!(version = env!("CARGO_PKG_VERSION"), "push-to-talk starting");

    let mut config = Config::load()?;
    if let Some(key) = &args.key {
        config.key = key
            .parse::<KeyCode>()
            .with_context(|| format!("invalid key '{}'", key))?;
    }
    if let Some(path) = args.prefs {
        config.prefs_path = path;
    }
    if let Some(ms) = args.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms.max(1));
    }
    if let Some(max) = args.max_restarts {
        config.max_restarts = max;
    }

    config.sink.backend = match &args.backend {
        Some(id) => id.parse::<Backend>()?,
        None => prefs::load_saved_backend(&config.prefs_path).unwrap_or_default(),
    };
    info!(
        key = %config.key,
        backend = %config.sink.backend,
        prefs = ?config.prefs_path,
        "configuration loaded"
    );

    let isolation = if args.in_process {
        let factory: SourceFactory = Arc::new(hotkey::open_source);
        Isolation::Task(factory)
    } else {
        Isolation::Process
    };

    let supervisor = Supervisor::new(config.key, config.sink.clone(), isolation)?;
    let mut controller = Controller::new(supervisor, TerminalView, &config);

    let mut shutdown = ShutdownSignal::new().context("failed to install signal handlers")?;
    let lines = spawn_line_reader();

    let result = controller.run(lines, shutdown.wait()).await;
    info!("push-to-talk stopped");
    result
}

async fn run_monitor(args: MonitorArgs) -> Result<()> {
    let key = args
        .key
        .parse::<KeyCode>()
        .with_context(|| format!("invalid key '{}'", args.key))?;
    let sink_config = args.sink_config()?;

    let code = match lifecycle::serve_stdio(key, sink_config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("key monitor failed: {:#}", e);
            1
        }
    };
    // A blocking stdin read may still be parked on a runtime thread
    std::process::exit(code)
}
