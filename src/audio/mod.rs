//! Audio sinks that receive mute/unmute calls
//!
//! The key monitor only ever calls [`AudioSink::mute`] and
//! [`AudioSink::unmute`]; which backend sits behind them is chosen by the
//! user and persisted as a bare identifier.

mod command;
mod pulse;

use std::fmt;
use std::process::ExitStatus;
use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::info;

pub use command::CommandSink;
pub use pulse::PulseAudioSink;

/// Capability set the key monitor drives. Both calls must be idempotent.
#[async_trait]
pub trait AudioSink: Send + Sync {
    /// Short backend name for logs
    fn name(&self) -> &'static str;

    async fn mute(&self) -> Result<(), SinkError>;

    async fn unmute(&self) -> Result<(), SinkError>;
}

/// Errors raised by audio sinks
#[derive(Debug, thiserror::Error)]
pub enum SinkError {
    #[error("failed to run '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' exited with {status}")]
    Failed { program: String, status: ExitStatus },

    #[error("the command backend needs both a mute and an unmute command")]
    MissingCommand,

    #[error("unknown audio backend '{0}'")]
    UnknownBackend(String),
}

/// Selectable audio backends
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backend {
    /// System audio server via `pactl`
    PulseAudio,
    /// User-supplied shell commands, e.g. a chat application's CLI
    Command,
    /// Log only
    Null,
}

impl Backend {
    pub const ALL: [Backend; 3] = [Backend::PulseAudio, Backend::Command, Backend::Null];

    /// Identifier written to the preferences file
    pub fn id(self) -> &'static str {
        match self {
            Backend::PulseAudio => "pulseaudio",
            Backend::Command => "command",
            Backend::Null => "none",
        }
    }
}

impl Default for Backend {
    fn default() -> Self {
        Self::PulseAudio
    }
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for Backend {
    type Err = SinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Backend::ALL
            .into_iter()
            .find(|b| b.id().eq_ignore_ascii_case(s))
            .ok_or_else(|| SinkError::UnknownBackend(s.to_string()))
    }
}

/// Everything needed to build a sink, in either process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkConfig {
    pub backend: Backend,
    /// PulseAudio source to mute
    pub pulse_source: String,
    pub mute_command: Option<String>,
    pub unmute_command: Option<String>,
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            pulse_source: pulse::DEFAULT_SOURCE.to_string(),
            mute_command: None,
            unmute_command: None,
        }
    }
}

/// Build the sink for the configured backend
pub fn create_sink(config: &SinkConfig) -> Result<Arc<dyn AudioSink>, SinkError> {
    let sink: Arc<dyn AudioSink> = match config.backend {
        Backend::PulseAudio => Arc::new(PulseAudioSink::new(&config.pulse_source)),
        Backend::Command => match (&config.mute_command, &config.unmute_command) {
            (Some(mute), Some(unmute)) => Arc::new(CommandSink::new(mute, unmute)),
            _ => return Err(SinkError::MissingCommand),
        },
        Backend::Null => Arc::new(NullSink),
    };
    Ok(sink)
}

/// Sink that only logs
pub struct NullSink;

#[async_trait]
impl AudioSink for NullSink {
    fn name(&self) -> &'static str {
        "none"
    }

    async fn mute(&self) -> Result<(), SinkError> {
        info!("microphone muted (no backend)");
        Ok(())
    }

    async fn unmute(&self) -> Result<(), SinkError> {
        info!("microphone unmuted (no backend)");
        Ok(())
    }
}

/// Run a program to completion, treating a non-zero exit as failure
///
/// Dropping the future kills the program, so a sink call from an aborted
/// monitor cannot land after the next one has started.
async fn run_program(program: &str, args: &[&str]) -> Result<(), SinkError> {
    let status = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .kill_on_drop(true)
        .status()
        .await
        .map_err(|source| SinkError::Spawn {
            program: program.to_string(),
            source,
        })?;

    if status.success() {
        Ok(())
    } else {
        Err(SinkError::Failed {
            program: program.to_string(),
            status,
        })
    }
}
