//! PulseAudio / PipeWire sink
//!
//! Mutes a capture source with `pactl set-source-mute`. Setting an explicit
//! value instead of toggling keeps both calls idempotent.

use async_trait::async_trait;

use super::{run_program, AudioSink, SinkError};

pub const DEFAULT_SOURCE: &str = "@DEFAULT_SOURCE@";

pub struct PulseAudioSink {
    source: String,
}

impl PulseAudioSink {
    pub fn new(source: &str) -> Self {
        Self {
            source: source.to_string(),
        }
    }

    fn args(&self, muted: bool) -> [&str; 3] {
        ["set-source-mute", self.source.as_str(), if muted { "1" } else { "0" }]
    }
}

#[async_trait]
impl AudioSink for PulseAudioSink {
    fn name(&self) -> &'static str {
        "pulseaudio"
    }

    async fn mute(&self) -> Result<(), SinkError> {
        run_program("pactl", &self.args(true)).await
    }

    async fn unmute(&self) -> Result<(), SinkError> {
        run_program("pactl", &self.args(false)).await
    }
}
