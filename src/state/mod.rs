//! Key monitor state machine
//!
//! Composite state `{MUTED, UNMUTED} × {NORMAL, AWAITING_KEY}`, starting at
//! `(MUTED, NORMAL)`:
//! - a press of the target key while muted unmutes
//! - a release of the target key while unmuted mutes
//! - after a rebind command, the next key press becomes the target

mod machine;

pub use machine::{KeyMonitor, MonitorError};
