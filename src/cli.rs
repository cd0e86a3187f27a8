// Command-line interface definitions for push-to-talk

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::audio::{Backend, SinkConfig, SinkError};

#[derive(Parser)]
#[command(name = "push-to-talk")]
#[command(author, version, about = "Hold a key to talk, release it to mute")]
#[command(long_about = "
Keeps the microphone muted except while a push-to-talk key is held.

The key is watched system-wide by a separate monitor process. While the
program runs, type commands on stdin:
  set              bind the next key you press
  backend <name>   switch audio backend (pulseaudio, command, none)
  backends         list audio backends
  status           show mute state, key and backend
  quit             unmute and exit

On Linux the monitor reads /dev/input; add yourself to the input group.
On macOS grant Accessibility permission to the terminal.
")]
pub struct Cli {
    /// Increase verbosity (-v = debug, -vv = trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (errors only)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the controller (default if no command specified)
    Run(RunArgs),

    /// Run a bare key monitor speaking the control protocol on stdin/stdout
    #[command(hide = true)]
    Monitor(MonitorArgs),
}

#[derive(Args, Debug, Default)]
pub struct RunArgs {
    /// Initial push-to-talk key (e.g., SCROLLLOCK, F13, or a key code)
    #[arg(long, value_name = "KEY")]
    pub key: Option<String>,

    /// Audio backend for this session, overriding the saved one
    #[arg(long, value_name = "BACKEND")]
    pub backend: Option<String>,

    /// Run the key monitor as a task in this process instead of a child
    #[arg(long)]
    pub in_process: bool,

    /// Preferences file holding the saved backend
    #[arg(long, value_name = "FILE")]
    pub prefs: Option<PathBuf>,

    /// Controller poll interval in milliseconds
    #[arg(long, value_name = "MS")]
    pub poll_interval_ms: Option<u64>,

    /// Restarts allowed after the key monitor dies
    #[arg(long, value_name = "N")]
    pub max_restarts: Option<u32>,
}

#[derive(Args, Debug)]
pub struct MonitorArgs {
    #[arg(long, value_name = "KEY")]
    pub key: String,

    #[arg(long, value_name = "BACKEND", default_value = "pulseaudio")]
    pub backend: String,

    #[arg(long, value_name = "SOURCE", default_value = "@DEFAULT_SOURCE@")]
    pub pulse_source: String,

    #[arg(long, value_name = "CMD")]
    pub mute_command: Option<String>,

    #[arg(long, value_name = "CMD")]
    pub unmute_command: Option<String>,
}

impl MonitorArgs {
    pub fn sink_config(&self) -> Result<SinkConfig, SinkError> {
        Ok(SinkConfig {
            backend: self.backend.parse::<Backend>()?,
            pulse_source: self.pulse_source.clone(),
            mute_command: self.mute_command.clone(),
            unmute_command: self.unmute_command.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_subcommand_defaults_to_run() {
        let cli = Cli::try_parse_from(["push-to-talk", "-v"]).unwrap();
        assert_eq!(cli.verbose, 1);
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_run_args() {
        let cli = Cli::try_parse_from([
            "push-to-talk",
            "run",
            "--key",
            "F13",
            "--in-process",
            "--max-restarts",
            "0",
        ])
        .unwrap();
        let Some(Commands::Run(args)) = cli.command else {
            panic!("expected run");
        };
        assert_eq!(args.key.as_deref(), Some("F13"));
        assert!(args.in_process);
        assert_eq!(args.max_restarts, Some(0));
        assert!(args.backend.is_none());
    }

    #[test]
    fn test_monitor_args_accept_dashed_commands() {
        let cli = Cli::try_parse_from([
            "push-to-talk",
            "monitor",
            "--key=183",
            "--backend=command",
            "--mute-command=-q mute",
            "--unmute-command=amixer set Capture cap",
        ])
        .unwrap();
        let Some(Commands::Monitor(args)) = cli.command else {
            panic!("expected monitor");
        };
        let sink = args.sink_config().unwrap();
        assert_eq!(sink.backend, Backend::Command);
        assert_eq!(sink.pulse_source, "@DEFAULT_SOURCE@");
        assert_eq!(sink.mute_command.as_deref(), Some("-q mute"));
    }

    #[test]
    fn test_monitor_rejects_unknown_backend() {
        let cli = Cli::try_parse_from(["push-to-talk", "monitor", "--key", "F1", "--backend", "jack"])
            .unwrap();
        let Some(Commands::Monitor(args)) = cli.command else {
            panic!("expected monitor");
        };
        assert!(args.sink_config().is_err());
    }
}
