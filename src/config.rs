//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::audio::SinkConfig;
use crate::hotkey::KeyCode;

#[cfg(target_os = "macos")]
pub const DEFAULT_KEY: &str = "F13";
#[cfg(not(target_os = "macos"))]
pub const DEFAULT_KEY: &str = "SCROLLLOCK";

/// Name of the preferences file in the home directory
const PREFS_FILE: &str = ".push_to_talk_saved";

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// File holding the saved backend identifier
    pub prefs_path: PathBuf,

    /// Key that starts out bound to push-to-talk
    pub key: KeyCode,

    /// Audio backend settings; the backend itself comes from preferences
    pub sink: SinkConfig,

    /// How often the controller drains monitor notices
    pub poll_interval: Duration,

    /// How many times a dead monitor is restarted before giving up
    pub max_restarts: u32,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from any variable lookup
    ///
    /// Recognised variables: `HOME`, `PTT_PREFS`, `PTT_KEY`,
    /// `PTT_PULSE_SOURCE`, `PTT_MUTE_CMD`, `PTT_UNMUTE_CMD`.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let prefs_path = match lookup("PTT_PREFS") {
            Some(path) => PathBuf::from(path),
            None => {
                let home = lookup("HOME").context("HOME is not set")?;
                PathBuf::from(home).join(PREFS_FILE)
            }
        };

        let key_name = lookup("PTT_KEY").unwrap_or_else(|| DEFAULT_KEY.to_string());
        let key = key_name
            .parse::<KeyCode>()
            .with_context(|| format!("invalid PTT_KEY '{}'", key_name))?;

        let mut sink = SinkConfig::default();
        if let Some(source) = lookup("PTT_PULSE_SOURCE") {
            sink.pulse_source = source;
        }
        sink.mute_command = lookup("PTT_MUTE_CMD");
        sink.unmute_command = lookup("PTT_UNMUTE_CMD");

        Ok(Self {
            prefs_path,
            key,
            sink,
            poll_interval: Duration::from_millis(100),
            max_restarts: 3,
        })
    }
}
