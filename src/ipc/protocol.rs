//! Control channel message protocol
//!
//! Across a process boundary every message is JSON-encoded and prefixed with
//! a 4-byte little-endian length.

use std::io;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Largest frame either side will accept
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Incoming message from the controller to the key monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Capture the next key press as the new target key
    EnterRebindMode,

    /// Sent by a newer controller; ignored
    #[serde(other)]
    Unknown,
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("frame of {0} bytes exceeds the 1 MiB limit")]
    FrameTooLarge(usize),

    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Read one frame. Returns `Ok(None)` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// Write a length-prefixed JSON message and flush it
pub async fn write_message<W, T>(writer: &mut W, msg: &T) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    if msg_bytes.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(msg_bytes.len()));
    }
    let msg_len = (msg_bytes.len() as u32).to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await?;

    Ok(())
}

/// Decode a frame, `None` if it is not valid JSON for `T`
pub fn decode<T: DeserializeOwned>(frame: &[u8]) -> Option<T> {
    serde_json::from_slice(frame).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{MuteState, Notice};

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_string(&Command::EnterRebindMode).unwrap();
        assert_eq!(json, r#"{"type":"enter_rebind_mode"}"#);
    }

    #[test]
    fn test_unknown_command_tag() {
        let cmd: Option<Command> = decode(br#"{"type":"set_volume","level":4}"#);
        assert_eq!(cmd, Some(Command::Unknown));
    }

    #[test]
    fn test_malformed_frame() {
        assert_eq!(decode::<Command>(b"not json"), None);
        assert_eq!(decode::<Command>(br#"{"kind":"enter_rebind_mode"}"#), None);
    }

    #[tokio::test]
    async fn test_frames_over_duplex() {
        let (mut client, mut server) = tokio::io::duplex(256);
        let notice = Notice::State {
            state: MuteState::Unmuted,
        };
        write_message(&mut client, &notice).await.unwrap();
        write_message(&mut client, &Command::EnterRebindMode)
            .await
            .unwrap();
        drop(client);

        let first = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(decode::<Notice>(&first), Some(notice));
        let second = read_frame(&mut server).await.unwrap().unwrap();
        assert_eq!(decode::<Command>(&second), Some(Command::EnterRebindMode));
        assert!(read_frame(&mut server).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut client, mut server) = tokio::io::duplex(64);
        let len = (MAX_FRAME_LEN as u32 + 1).to_le_bytes();
        client.write_all(&len).await.unwrap();

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTooLarge(n) if n == MAX_FRAME_LEN + 1));
    }

    #[tokio::test]
    async fn test_truncated_body_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(64);
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let err = read_frame(&mut server).await.unwrap_err();
        assert!(matches!(err, ProtocolError::Io(_)));
    }
}
