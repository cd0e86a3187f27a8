//! Key listener thread
//!
//! Pulls events from a blocking [`KeySource`] on a dedicated thread and
//! forwards them into the async world. The thread exits when the source is
//! exhausted or the receiving side goes away, which closes the channel and
//! lets the key monitor notice the loss of its source.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use super::keys::KeyEvent;
use super::KeySource;

/// Forwards key events from a blocking source to the key monitor
pub struct HotkeyListener {
    event_tx: Option<mpsc::Sender<KeyEvent>>,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    /// Create a new hotkey listener
    pub fn new(event_tx: mpsc::Sender<KeyEvent>) -> Self {
        Self {
            event_tx: Some(event_tx),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Start pumping events from `source`
    ///
    /// The sender moves into the listener thread, so the channel closes as
    /// soon as that thread exits. A listener can only be started once.
    pub fn start(&mut self, source: Box<dyn KeySource>) -> Result<(), HotkeyError> {
        let event_tx = self.event_tx.take().ok_or(HotkeyError::AlreadyRunning)?;
        self.running.store(true, Ordering::SeqCst);
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");
                pump_events(source, event_tx, &running);
                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    /// Ask the listener thread to stop
    ///
    /// The thread is blocked inside the source, so it only exits after the
    /// next event arrives or the source closes.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Check if the listener is currently running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

/// Errors that can occur while reading key events
#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),

    #[error("unknown key name: '{0}'")]
    UnknownKey(String),

    #[error("no keyboard device found in /dev/input")]
    NoKeyboard,

    #[error("cannot open input device {0}, is the user in the 'input' group?")]
    DeviceAccess(String),

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("key events are not supported on this platform")]
    Unsupported,
}

fn pump_events(
    mut source: Box<dyn KeySource>,
    event_tx: mpsc::Sender<KeyEvent>,
    running: &AtomicBool,
) {
    while running.load(Ordering::SeqCst) {
        match source.next_event() {
            Ok(Some(event)) => {
                trace!(?event, "key event");
                // Not in an async context, so block until the monitor has room
                if event_tx.blocking_send(event).is_err() {
                    debug!("key event channel closed");
                    return;
                }
            }
            Ok(None) => {
                warn!("key event source exhausted");
                return;
            }
            Err(e) => {
                error!(%e, "key event source failed");
                return;
            }
        }
    }
}
