//! Control channel between the controller and the key monitor
//!
//! Two bounded FIFO queues: notices flow monitor → controller, commands flow
//! controller → monitor. Senders wait when a queue is full, so nothing is
//! ever dropped. When the monitor lives in another process the queues are
//! bridged over its stdin/stdout with [`forward_frames`] and
//! [`forward_messages`].

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::debug;

use crate::events::{MuteState, Notice};

use super::protocol::{self, Command, ProtocolError};

pub const NOTICE_CAPACITY: usize = 64;
pub const COMMAND_CAPACITY: usize = 16;

/// Controller side of the control channel
pub struct ControlChannel {
    notices: mpsc::Receiver<Notice>,
    commands: mpsc::Sender<Command>,
}

/// Key monitor side of the control channel
pub struct MonitorEndpoint {
    pub notices: mpsc::Sender<Notice>,
    pub commands: mpsc::Receiver<Command>,
}

/// Result of one non-blocking drain of the notice queue
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Drained {
    /// Number of state notices received
    pub count: usize,
    /// Last state seen, if any
    pub latest: Option<MuteState>,
    /// The monitor side has gone away
    pub disconnected: bool,
}

/// Create a fresh pair of queues
pub fn control_channel() -> (ControlChannel, MonitorEndpoint) {
    let (notice_tx, notice_rx) = mpsc::channel(NOTICE_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CAPACITY);
    (
        ControlChannel {
            notices: notice_rx,
            commands: command_tx,
        },
        MonitorEndpoint {
            notices: notice_tx,
            commands: command_rx,
        },
    )
}

impl ControlChannel {
    /// Take everything currently queued without waiting
    ///
    /// Notices coalesce: only the last state matters to the controller.
    pub fn drain(&mut self) -> Drained {
        let mut drained = Drained::default();
        loop {
            match self.notices.try_recv() {
                Ok(Notice::State { state }) => {
                    drained.count += 1;
                    drained.latest = Some(state);
                }
                Ok(Notice::Unknown) => {}
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => {
                    drained.disconnected = true;
                    break;
                }
            }
        }
        drained
    }

    /// Queue a command without waiting. A full queue hands the command back.
    pub fn try_send(&self, command: Command) -> Result<(), TrySendError<Command>> {
        self.commands.try_send(command)
    }
}

/// Read framed messages from `reader` into `tx` until end of stream
///
/// Frames that do not decode are skipped. Returns early if the receiving
/// side of `tx` is gone.
pub async fn forward_frames<R, T>(mut reader: R, tx: mpsc::Sender<T>) -> Result<(), ProtocolError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    while let Some(frame) = protocol::read_frame(&mut reader).await? {
        let Some(msg) = protocol::decode::<T>(&frame) else {
            debug!(len = frame.len(), "skipping malformed frame");
            continue;
        };
        if tx.send(msg).await.is_err() {
            break;
        }
    }
    Ok(())
}

/// Write every message from `rx` to `writer` until all senders are gone
pub async fn forward_messages<W, T>(mut rx: mpsc::Receiver<T>, mut writer: W) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    while let Some(msg) = rx.recv().await {
        protocol::write_message(&mut writer, &msg).await?;
    }
    Ok(())
}
