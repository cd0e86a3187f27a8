//! Shell command sink
//!
//! Runs user-supplied commands through `sh -c`, which covers chat clients
//! that expose their own mute control on the command line.

use async_trait::async_trait;
use tracing::debug;

use super::{run_program, AudioSink, SinkError};

pub struct CommandSink {
    mute: String,
    unmute: String,
}

impl CommandSink {
    pub fn new(mute: &str, unmute: &str) -> Self {
        Self {
            mute: mute.to_string(),
            unmute: unmute.to_string(),
        }
    }
}

#[async_trait]
impl AudioSink for CommandSink {
    fn name(&self) -> &'static str {
        "command"
    }

    async fn mute(&self) -> Result<(), SinkError> {
        debug!(command = %self.mute, "running mute command");
        run_program("sh", &["-c", &self.mute]).await
    }

    async fn unmute(&self) -> Result<(), SinkError> {
        debug!(command = %self.unmute, "running unmute command");
        run_program("sh", &["-c", &self.unmute]).await
    }
}
