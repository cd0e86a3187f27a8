//! Child side of the process boundary
//!
//! The `monitor` subcommand lands here: commands arrive as frames on stdin,
//! notices leave as frames on stdout. Logs must stay on stderr.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::audio::{create_sink, AudioSink, SinkConfig};
use crate::hotkey::{self, HotkeyListener, KeyCode, KeySource};
use crate::ipc::{forward_frames, forward_messages, Command, COMMAND_CAPACITY, NOTICE_CAPACITY};
use crate::state::KeyMonitor;

use super::supervisor::KEY_CAPACITY;

/// Run one monitoring session over stdin/stdout
pub async fn serve_stdio(key: KeyCode, sink_config: SinkConfig) -> Result<()> {
    // Ctrl-C reaches the whole process group; the controller decides when we go
    let _sigint = signal(SignalKind::interrupt()).context("failed to install SIGINT handler")?;

    let sink = create_sink(&sink_config).context("failed to create audio sink")?;
    let source = hotkey::open_source().context("failed to open key source")?;

    info!(pid = std::process::id(), "key monitor process ready");
    serve(key, sink, source, tokio::io::stdin(), tokio::io::stdout()).await
}

/// Run one monitoring session, reading command frames from `reader` and
/// writing notice frames to `writer`
///
/// Returns once `reader` reaches end of stream (`Ok`) or the key source dies
/// (`Err`, which becomes a non-zero exit status).
pub async fn serve<R, W>(
    key: KeyCode,
    sink: Arc<dyn AudioSink>,
    source: Box<dyn KeySource>,
    reader: R,
    writer: W,
) -> Result<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (key_tx, key_rx) = mpsc::channel(KEY_CAPACITY);
    let mut listener = HotkeyListener::new(key_tx);
    listener.start(source)?;

    let (notice_tx, notice_rx) = mpsc::channel(NOTICE_CAPACITY);
    let (command_tx, command_rx) = mpsc::channel::<Command>(COMMAND_CAPACITY);

    let reader = tokio::spawn(forward_frames(reader, command_tx));
    let writer = tokio::spawn(forward_messages(notice_rx, writer));

    let result = KeyMonitor::new(key, sink, notice_tx)
        .run(key_rx, command_rx)
        .await;

    listener.stop();
    reader.abort();
    // The monitor owned the only notice sender, so the writer drains and ends
    match writer.await {
        Ok(Err(e)) => debug!(%e, "notice stream closed"),
        Ok(Ok(())) | Err(_) => {}
    }

    result.map_err(Into::into)
}
