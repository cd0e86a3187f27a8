//! Hotkey module for global keyboard event listening
//!
//! Key events come from a blocking [`KeySource`]. On Linux that is evdev,
//! on macOS a CGEventTap. Either way the listener thread forwards raw
//! press/release events to the key monitor.

mod keys;
mod listener;

#[cfg(target_os = "linux")]
mod evdev_source;
#[cfg(target_os = "macos")]
mod macos;

use std::sync::mpsc;

pub use keys::{KeyCode, KeyEvent};
pub use listener::{HotkeyError, HotkeyListener};

/// Blocking supplier of raw key events
pub trait KeySource: Send {
    /// Block until the next key event. `Ok(None)` means the source is gone
    /// for good.
    fn next_event(&mut self) -> Result<Option<KeyEvent>, HotkeyError>;
}

/// Key source fed from a std channel
///
/// Platform backends read devices on their own threads and push into one of
/// these. The source is exhausted once every sender has been dropped.
pub struct ChannelSource {
    rx: mpsc::Receiver<KeyEvent>,
}

impl ChannelSource {
    pub fn pair() -> (mpsc::Sender<KeyEvent>, Self) {
        let (tx, rx) = mpsc::channel();
        (tx, Self { rx })
    }
}

impl KeySource for ChannelSource {
    fn next_event(&mut self) -> Result<Option<KeyEvent>, HotkeyError> {
        Ok(self.rx.recv().ok())
    }
}

/// Open the key source for this platform
#[cfg(target_os = "linux")]
pub fn open_source() -> Result<Box<dyn KeySource>, HotkeyError> {
    Ok(Box::new(evdev_source::open()?))
}

/// Open the key source for this platform
#[cfg(target_os = "macos")]
pub fn open_source() -> Result<Box<dyn KeySource>, HotkeyError> {
    Ok(Box::new(macos::open()?))
}

#[cfg(not(any(target_os = "linux", target_os = "macos")))]
pub fn open_source() -> Result<Box<dyn KeySource>, HotkeyError> {
    Err(HotkeyError::Unsupported)
}
