//! Key monitor supervision
//!
//! Runs the key monitor as an isolated unit: by default a child process
//! speaking the framed control protocol on stdin/stdout, optionally an
//! in-process task. Either way the controller only gets a
//! [`ControlChannel`], and termination is a hard kill.

use std::fmt;
use std::io;
use std::path::Path;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::audio::{create_sink, AudioSink, Backend, SinkConfig};
use crate::hotkey::{HotkeyError, HotkeyListener, KeyCode, KeySource};
use crate::ipc::{control_channel, forward_frames, forward_messages, ControlChannel, MonitorEndpoint};
use crate::state::{KeyMonitor, MonitorError};

/// Capacity of the listener → monitor key event queue
pub const KEY_CAPACITY: usize = 32;

/// How long a monitor process whose stream broke gets to exit on its own
const REAP_GRACE: Duration = Duration::from_millis(500);

/// Produces a fresh key source for each in-process monitor
pub type SourceFactory = Arc<dyn Fn() -> Result<Box<dyn KeySource>, HotkeyError> + Send + Sync>;

/// How the key monitor is isolated from the controller
#[derive(Clone)]
pub enum Isolation {
    /// Re-run this executable with the `monitor` subcommand
    Process,
    /// Tokio task plus a key reader thread in this process
    Task(SourceFactory),
}

/// How a monitor unit ended
#[derive(Debug)]
pub enum UnitExit {
    Process(ExitStatus),
    Task(Result<(), MonitorError>),
    Killed,
}

impl fmt::Display for UnitExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitExit::Process(status) => write!(f, "process {}", status),
            UnitExit::Task(Ok(())) => write!(f, "task finished"),
            UnitExit::Task(Err(e)) => write!(f, "task failed: {}", e),
            UnitExit::Killed => write!(f, "killed"),
        }
    }
}

enum Unit {
    Process {
        child: Child,
        bridges: Vec<JoinHandle<()>>,
    },
    Task {
        handle: JoinHandle<Result<(), MonitorError>>,
        listener: HotkeyListener,
    },
}

/// Starts, stops and restarts the key monitor
pub struct Supervisor {
    key: KeyCode,
    sink_config: SinkConfig,
    sink: Arc<dyn AudioSink>,
    isolation: Isolation,
    unit: Option<Unit>,
}

impl Supervisor {
    pub fn new(key: KeyCode, sink_config: SinkConfig, isolation: Isolation) -> Result<Self> {
        let sink = create_sink(&sink_config).context("failed to create audio sink")?;
        Ok(Self::with_sink(key, sink_config, sink, isolation))
    }

    /// Use an already-built sink for the safety net and in-process monitors
    pub fn with_sink(
        key: KeyCode,
        sink_config: SinkConfig,
        sink: Arc<dyn AudioSink>,
        isolation: Isolation,
    ) -> Self {
        Self {
            key,
            sink_config,
            sink,
            isolation,
            unit: None,
        }
    }

    pub fn backend(&self) -> Backend {
        self.sink_config.backend
    }

    pub fn key(&self) -> KeyCode {
        self.key
    }

    pub fn is_running(&self) -> bool {
        self.unit.is_some()
    }

    /// Switch to another backend. Takes effect on the next start.
    pub fn set_backend(&mut self, backend: Backend) -> Result<()> {
        let sink_config = SinkConfig {
            backend,
            ..self.sink_config.clone()
        };
        self.sink = create_sink(&sink_config)
            .with_context(|| format!("failed to create {} sink", backend))?;
        self.sink_config = sink_config;
        Ok(())
    }

    /// Launch a fresh monitor bound to fresh channels
    ///
    /// The sink is muted first so it agrees with the monitor's initial
    /// MUTED state.
    pub async fn start(&mut self) -> Result<ControlChannel> {
        if self.unit.is_some() {
            bail!("key monitor is already running");
        }

        if let Err(e) = self.sink.mute().await {
            warn!(%e, sink = self.sink.name(), "failed to mute on start");
        }

        let (channel, endpoint) = control_channel();
        let unit = match &self.isolation {
            Isolation::Process => self.spawn_process(endpoint)?,
            Isolation::Task(factory) => self.spawn_task(factory, endpoint)?,
        };
        self.unit = Some(unit);

        info!(key = %self.key, backend = %self.backend(), "key monitor started");
        Ok(channel)
    }

    /// Kill the monitor, wait for it, then unmute once as a safety net
    pub async fn stop(&mut self) {
        if let Some(exit) = self.terminate().await {
            info!(%exit, "key monitor stopped");
        }
        if let Err(e) = self.sink.unmute().await {
            warn!(%e, sink = self.sink.name(), "safety unmute failed");
        }
    }

    /// Kill the monitor and start a new one in `(MUTED, NORMAL)`
    pub async fn restart(&mut self) -> Result<ControlChannel> {
        info!("restarting key monitor");
        if let Some(exit) = self.terminate().await {
            debug!(%exit, "old key monitor gone");
        }
        self.start().await
    }

    /// Hard-kill the current unit and wait for it to exit
    pub async fn terminate(&mut self) -> Option<UnitExit> {
        match self.unit.take()? {
            Unit::Process { mut child, bridges } => {
                if let Err(e) = child.kill().await {
                    warn!(%e, "failed to kill key monitor process");
                }
                for bridge in bridges {
                    bridge.abort();
                }
                match child.wait().await {
                    Ok(status) => Some(UnitExit::Process(status)),
                    Err(e) => {
                        error!(%e, "failed to reap key monitor process");
                        None
                    }
                }
            }
            Unit::Task { handle, listener } => {
                handle.abort();
                listener.stop();
                join_task(handle).await
            }
        }
    }

    /// Collect a unit whose channel closed on its own
    ///
    /// A process that has not exited within [`REAP_GRACE`] is killed.
    pub async fn reap(&mut self) -> Option<UnitExit> {
        match self.unit.take()? {
            Unit::Process { mut child, bridges } => {
                for bridge in bridges {
                    bridge.abort();
                }
                match reap_child(&mut child, REAP_GRACE).await {
                    Ok(status) => Some(UnitExit::Process(status)),
                    Err(e) => {
                        error!(%e, "failed to reap key monitor process");
                        None
                    }
                }
            }
            Unit::Task { handle, listener } => {
                listener.stop();
                join_task(handle).await
            }
        }
    }

    fn spawn_process(&self, endpoint: MonitorEndpoint) -> Result<Unit> {
        let exe = std::env::current_exe().context("failed to locate own executable")?;

        let mut child = self
            .monitor_command(&exe)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .context("failed to spawn key monitor process")?;

        let stdout = child.stdout.take().context("monitor stdout not captured")?;
        let stdin = child.stdin.take().context("monitor stdin not captured")?;
        let MonitorEndpoint { notices, commands } = endpoint;

        let reader = tokio::spawn(async move {
            if let Err(e) = forward_frames(stdout, notices).await {
                warn!(%e, "notice stream from key monitor failed");
            }
        });
        let writer = tokio::spawn(async move {
            if let Err(e) = forward_messages(commands, stdin).await {
                debug!(%e, "command stream to key monitor closed");
            }
        });

        debug!(pid = ?child.id(), "key monitor process spawned");
        Ok(Unit::Process {
            child,
            bridges: vec![reader, writer],
        })
    }

    /// Command line for a monitor process. Values use `--flag=value` so a
    /// user command starting with `-` is not taken for a flag.
    fn monitor_command(&self, exe: &Path) -> Command {
        let mut command = Command::new(exe);
        command
            .arg("monitor")
            .arg(format!("--key={}", self.key))
            .arg(format!("--backend={}", self.sink_config.backend.id()))
            .arg(format!("--pulse-source={}", self.sink_config.pulse_source));
        if let Some(mute) = &self.sink_config.mute_command {
            command.arg(format!("--mute-command={}", mute));
        }
        if let Some(unmute) = &self.sink_config.unmute_command {
            command.arg(format!("--unmute-command={}", unmute));
        }
        command
    }

    fn spawn_task(&self, factory: &SourceFactory, endpoint: MonitorEndpoint) -> Result<Unit> {
        let source = factory().context("failed to open key source")?;

        let (key_tx, key_rx) = mpsc::channel(KEY_CAPACITY);
        let mut listener = HotkeyListener::new(key_tx);
        listener.start(source)?;

        let monitor = KeyMonitor::new(self.key, Arc::clone(&self.sink), endpoint.notices);
        let handle = tokio::spawn(monitor.run(key_rx, endpoint.commands));

        Ok(Unit::Task { handle, listener })
    }
}

/// Wait for a child that should be exiting, killing it after `grace`
///
/// A broken frame stream closes the controller's side of the channel while
/// the child may still be running.
async fn reap_child(child: &mut Child, grace: Duration) -> io::Result<ExitStatus> {
    match tokio::time::timeout(grace, child.wait()).await {
        Ok(status) => status,
        Err(_) => {
            warn!(pid = ?child.id(), "key monitor process still running, killing it");
            child.kill().await?;
            child.wait().await
        }
    }
}

async fn join_task(handle: JoinHandle<Result<(), MonitorError>>) -> Option<UnitExit> {
    match handle.await {
        Ok(result) => Some(UnitExit::Task(result)),
        Err(e) if e.is_cancelled() => Some(UnitExit::Killed),
        Err(e) => {
            error!(%e, "key monitor task panicked");
            None
        }
    }
}


#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::testing::scripted_sources;
    use super::*;
    use crate::audio::testing::{RecordingSink, SinkCall};
    use crate::events::MuteState;
    use crate::hotkey::KeyEvent;
    use crate::ipc::Command;

    const KEY: KeyCode = KeyCode(183);

    fn task_supervisor(sink: &Arc<RecordingSink>, factory: SourceFactory) -> Supervisor {
        let sink: Arc<dyn AudioSink> = sink.clone();
        Supervisor::with_sink(KEY, SinkConfig::default(), sink, Isolation::Task(factory))
    }

    async fn wait_for_state(channel: &mut ControlChannel) -> MuteState {
        tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Some(state) = channel.drain().latest {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("no notice from key monitor")
    }

    #[tokio::test]
    async fn test_start_mutes_and_monitor_reports() {
        let sink = Arc::new(RecordingSink::default());
        let (factory, sources) = scripted_sources();
        let mut supervisor = task_supervisor(&sink, factory);

        let mut channel = supervisor.start().await.unwrap();
        assert!(supervisor.is_running());
        assert_eq!(sink.calls(), vec![SinkCall::Mute]);

        let keys = sources.recv().unwrap();
        keys.send(KeyEvent::press(KEY)).unwrap();
        assert_eq!(wait_for_state(&mut channel).await, MuteState::Unmuted);
        keys.send(KeyEvent::release(KEY)).unwrap();
        assert_eq!(wait_for_state(&mut channel).await, MuteState::Muted);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_stop_unmutes_exactly_once() {
        let sink = Arc::new(RecordingSink::default());
        let (factory, sources) = scripted_sources();
        let mut supervisor = task_supervisor(&sink, factory);

        let mut channel = supervisor.start().await.unwrap();
        let keys = sources.recv().unwrap();
        keys.send(KeyEvent::press(KEY)).unwrap();
        assert_eq!(wait_for_state(&mut channel).await, MuteState::Unmuted);
        let before = sink.count(SinkCall::Unmute);

        supervisor.stop().await;

        assert!(!supervisor.is_running());
        assert_eq!(sink.count(SinkCall::Unmute), before + 1);
        assert_eq!(sink.calls().last(), Some(&SinkCall::Unmute));
        assert!(channel.drain().disconnected);
    }

    #[tokio::test]
    async fn test_stop_without_monitor_still_unmutes() {
        let sink = Arc::new(RecordingSink::default());
        let (factory, _sources) = scripted_sources();
        let mut supervisor = task_supervisor(&sink, factory);

        supervisor.stop().await;
        assert_eq!(sink.calls(), vec![SinkCall::Unmute]);
    }

    #[tokio::test]
    async fn test_restart_loses_rebind_progress() {
        let sink = Arc::new(RecordingSink::default());
        let (factory, sources) = scripted_sources();
        let mut supervisor = task_supervisor(&sink, factory);

        let channel = supervisor.start().await.unwrap();
        let _old_keys = sources.recv().unwrap();
        channel.try_send(Command::EnterRebindMode).unwrap();

        let mut channel = supervisor.restart().await.unwrap();
        let keys = sources.recv().unwrap();

        // The new monitor is back in NORMAL, bound to the original key
        keys.send(KeyEvent::press(KeyCode(1))).unwrap();
        keys.send(KeyEvent::press(KEY)).unwrap();
        assert_eq!(wait_for_state(&mut channel).await, MuteState::Unmuted);

        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_start_twice_fails() {
        let sink = Arc::new(RecordingSink::default());
        let (factory, _sources) = scripted_sources();
        let mut supervisor = task_supervisor(&sink, factory);

        let _channel = supervisor.start().await.unwrap();
        assert!(supervisor.start().await.is_err());
        supervisor.stop().await;
    }

    #[tokio::test]
    async fn test_reap_after_source_exhausted() {
        let sink = Arc::new(RecordingSink::default());
        let (factory, sources) = scripted_sources();
        let mut supervisor = task_supervisor(&sink, factory);

        let mut channel = supervisor.start().await.unwrap();
        drop(sources.recv().unwrap());

        tokio::time::timeout(Duration::from_secs(2), async {
            while !channel.drain().disconnected {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();

        let exit = supervisor.reap().await.unwrap();
        assert!(matches!(exit, UnitExit::Task(Err(MonitorError::SourceExhausted))));
        assert!(!supervisor.is_running());
    }

    #[tokio::test]
    async fn test_failing_source_factory() {
        let sink = Arc::new(RecordingSink::default());
        let factory: SourceFactory =
            Arc::new(|| -> Result<Box<dyn KeySource>, HotkeyError> { Err(HotkeyError::NoKeyboard) });
        let mut supervisor = task_supervisor(&sink, factory);

        assert!(supervisor.start().await.is_err());
        assert!(!supervisor.is_running());
    }

    #[test]
    fn test_monitor_command_line() {
        let sink = Arc::new(RecordingSink::default());
        let sink_config = SinkConfig {
            backend: Backend::Command,
            mute_command: Some("-x mute".to_string()),
            unmute_command: Some("chat unmute".to_string()),
            ..SinkConfig::default()
        };
        let key: KeyCode = "F13".parse().unwrap();
        let supervisor = Supervisor::with_sink(key, sink_config, sink, Isolation::Process);

        let command = supervisor.monitor_command(Path::new("/usr/bin/push-to-talk"));
        let args: Vec<String> = command
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "monitor",
                "--key=F13",
                "--backend=command",
                "--pulse-source=@DEFAULT_SOURCE@",
                "--mute-command=-x mute",
                "--unmute-command=chat unmute",
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reap_child_keeps_exit_status() {
        let mut child = tokio::process::Command::new("sh")
            .arg("-c")
            .arg("exit 3")
            .spawn()
            .unwrap();
        let status = reap_child(&mut child, Duration::from_secs(5)).await.unwrap();
        assert_eq!(status.code(), Some(3));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_reap_child_kills_a_lingering_process() {
        let mut child = tokio::process::Command::new("sleep")
            .arg("30")
            .kill_on_drop(true)
            .spawn()
            .unwrap();

        let status = tokio::time::timeout(
            Duration::from_secs(5),
            reap_child(&mut child, Duration::from_millis(50)),
        )
        .await
        .expect("reap hung on a live child")
        .unwrap();

        assert!(!status.success());
        assert_eq!(status.code(), None);
    }

    #[test]
    fn test_set_backend() {
        let sink = Arc::new(RecordingSink::default());
        let (factory, _sources) = scripted_sources();
        let mut supervisor = task_supervisor(&sink, factory);

        supervisor.set_backend(Backend::Null).unwrap();
        assert_eq!(supervisor.backend(), Backend::Null);

        // Command backend without commands is rejected and nothing changes
        assert!(supervisor.set_backend(Backend::Command).is_err());
        assert_eq!(supervisor.backend(), Backend::Null);
    }
}
