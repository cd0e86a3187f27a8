//! Events emitted by the key monitor
//!
//! The monitor reports every mute-state transition as a [`Notice`] on its
//! outgoing channel. Notices are plain values; nothing is shared across the
//! process boundary.

use serde::{Deserialize, Serialize};

/// Whether the microphone is currently suppressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MuteState {
    #[default]
    Muted,
    Unmuted,
}

impl std::fmt::Display for MuteState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MuteState::Muted => write!(f, "MUTED"),
            MuteState::Unmuted => write!(f, "UNMUTED"),
        }
    }
}

/// Outgoing message from the key monitor to the controller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notice {
    /// The mute state changed
    #[serde(rename = "state_notice")]
    State { state: MuteState },

    /// Sent by a newer monitor; ignored
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for Notice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notice::State { state } => write!(f, "STATE_NOTICE ({})", state),
            Notice::Unknown => write!(f, "UNKNOWN"),
        }
    }
}
