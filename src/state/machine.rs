//! Key monitor state machine
//!
//! Turns raw key events for one target key into mute-state transitions and
//! handles the one-shot rebind protocol. The monitor owns the mute state
//! and the target key; the controller only ever sees notices.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::audio::AudioSink;
use crate::events::{MuteState, Notice};
use crate::hotkey::{KeyCode, KeyEvent};
use crate::ipc::Command;

/// Whether the next key press is a talk trigger or a new binding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RebindState {
    #[default]
    Normal,
    AwaitingKey,
}

impl std::fmt::Display for RebindState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RebindState::Normal => write!(f, "NORMAL"),
            RebindState::AwaitingKey => write!(f, "AWAITING_KEY"),
        }
    }
}

/// Why the monitor loop stopped
#[derive(Debug, thiserror::Error)]
pub enum MonitorError {
    #[error("key event source is gone")]
    SourceExhausted,

    #[error("controller stopped receiving notices")]
    ControllerGone,
}

/// The push-to-talk state machine
pub struct KeyMonitor {
    mute: MuteState,
    rebind: RebindState,
    target: KeyCode,
    sink: Arc<dyn AudioSink>,
    notice_tx: mpsc::Sender<Notice>,
}

impl KeyMonitor {
    /// Create a monitor in `(MUTED, NORMAL)` watching `target`
    pub fn new(target: KeyCode, sink: Arc<dyn AudioSink>, notice_tx: mpsc::Sender<Notice>) -> Self {
        Self {
            mute: MuteState::Muted,
            rebind: RebindState::Normal,
            target,
            sink,
            notice_tx,
        }
    }

    pub fn mute_state(&self) -> MuteState {
        self.mute
    }

    pub fn rebind_state(&self) -> RebindState {
        self.rebind
    }

    pub fn target(&self) -> KeyCode {
        self.target
    }

    /// Run until the key source or the controller goes away
    ///
    /// Commands are checked before key events on every iteration, so a
    /// rebind request never waits for a key press to be seen.
    pub async fn run(
        mut self,
        mut key_rx: mpsc::Receiver<KeyEvent>,
        mut command_rx: mpsc::Receiver<Command>,
    ) -> Result<(), MonitorError> {
        info!(key = %self.target, sink = self.sink.name(), "key monitor started in MUTED state");

        loop {
            tokio::select! {
                biased;

                command = command_rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("command channel closed, key monitor stopping");
                        return Ok(());
                    }
                },

                event = key_rx.recv() => match event {
                    Some(event) => self.handle_key_event(event).await?,
                    None => {
                        error!("key event source exhausted");
                        return Err(MonitorError::SourceExhausted);
                    }
                },
            }
        }
    }

    /// Apply one command from the controller
    pub fn handle_command(&mut self, command: Command) {
        match command {
            Command::EnterRebindMode => {
                info!(mute = %self.mute, "waiting for a key to bind");
                self.rebind = RebindState::AwaitingKey;
            }
            Command::Unknown => {
                debug!("ignoring unknown command");
            }
        }
    }

    /// Apply one raw key event
    ///
    /// While awaiting a rebind, the next press of any key becomes the target
    /// and produces no notice. Releases are never rebind candidates.
    pub async fn handle_key_event(&mut self, event: KeyEvent) -> Result<(), MonitorError> {
        if self.rebind == RebindState::AwaitingKey && event.pressed {
            self.adopt_target(event.code);
            return Ok(());
        }

        if event.code != self.target {
            trace!(?event, "ignoring unrelated key");
            return Ok(());
        }

        let next = match (self.mute, event.pressed) {
            (MuteState::Muted, true) => MuteState::Unmuted,
            (MuteState::Unmuted, false) => MuteState::Muted,
            // Key repeat while held, or a stray release
            _ => return Ok(()),
        };

        self.transition_to(next).await
    }

    fn adopt_target(&mut self, code: KeyCode) {
        if code.is_modifier() {
            warn!(key = %code, "binding a modifier key");
        }
        info!(from = %self.target, to = %code, "target key rebound");
        self.target = code;
        self.rebind = RebindState::Normal;
    }

    /// Perform a mute-state transition
    ///
    /// A failed sink call is logged but the new state stands and the notice
    /// is still sent; the next toggle brings the sink back in line.
    async fn transition_to(&mut self, next: MuteState) -> Result<(), MonitorError> {
        info!(from = %self.mute, to = %next, key = %self.target, "mute state transition");

        let result = match next {
            MuteState::Muted => self.sink.mute().await,
            MuteState::Unmuted => self.sink.unmute().await,
        };
        if let Err(e) = result {
            warn!(%e, sink = self.sink.name(), "audio sink call failed");
        }

        self.mute = next;

        let notice = Notice::State { state: next };
        debug!(%notice, "emitting notice");
        self.notice_tx
            .send(notice)
            .await
            .map_err(|_| MonitorError::ControllerGone)
    }
}
