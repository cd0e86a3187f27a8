//! Controller: supervises the key monitor and reflects its state
//!
//! A single cooperative loop driven by a fixed poll interval. Each tick
//! drains the monitor's notices without blocking and flushes any deferred
//! commands. User input arrives as text lines from a reader thread.

use std::collections::VecDeque;
use std::future::Future;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Result};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::audio::Backend;
use crate::config::Config;
use crate::events::MuteState;
use crate::ipc::{Command, ControlChannel};
use crate::lifecycle::Supervisor;
use crate::prefs;

/// Presentation of the controller state
pub trait View {
    fn show_state(&mut self, state: MuteState);
    fn show_message(&mut self, message: &str);
}

/// Prints to the terminal
pub struct TerminalView;

impl View for TerminalView {
    fn show_state(&mut self, state: MuteState) {
        match state {
            MuteState::Muted => println!("Microphone muted"),
            MuteState::Unmuted => println!("Microphone activated"),
        }
    }

    fn show_message(&mut self, message: &str) {
        println!("{}", message);
    }
}

/// A parsed line of user input
#[derive(Debug, PartialEq, Eq)]
pub enum Input {
    Rebind,
    Backend(String),
    ListBackends,
    Status,
    Quit,
    Empty,
    Unknown(String),
}

impl Input {
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(verb) = words.next() else {
            return Input::Empty;
        };
        match (verb.to_ascii_lowercase().as_str(), words.next()) {
            ("set" | "rebind", None) => Input::Rebind,
            ("backend", Some(id)) => Input::Backend(id.to_string()),
            ("backend" | "backends", None) => Input::ListBackends,
            ("status", None) => Input::Status,
            ("quit" | "exit", None) => Input::Quit,
            _ => Input::Unknown(line.trim().to_string()),
        }
    }
}

/// Whether the controller loop keeps going
#[derive(Debug, PartialEq, Eq)]
pub enum Flow {
    Continue,
    Quit,
}

pub struct Controller<V: View> {
    supervisor: Supervisor,
    view: V,
    channel: Option<ControlChannel>,
    /// Commands not yet accepted by the monitor's queue
    pending: VecDeque<Command>,
    state: MuteState,
    prefs_path: PathBuf,
    poll_interval: Duration,
    max_restarts: u32,
    restarts: u32,
}

impl<V: View> Controller<V> {
    pub fn new(supervisor: Supervisor, view: V, config: &Config) -> Self {
        Self {
            supervisor,
            view,
            channel: None,
            pending: VecDeque::new(),
            state: MuteState::Muted,
            prefs_path: config.prefs_path.clone(),
            poll_interval: config.poll_interval,
            max_restarts: config.max_restarts,
            restarts: 0,
        }
    }

    /// Last state reported by the monitor
    pub fn state(&self) -> MuteState {
        self.state
    }

    pub fn view(&self) -> &V {
        &self.view
    }

    /// Start the monitor and begin tracking it
    pub async fn start(&mut self) -> Result<()> {
        let channel = self.supervisor.start().await?;
        self.attach(channel);
        Ok(())
    }

    /// Stop the monitor; the supervisor unmutes as a safety net
    pub async fn stop(&mut self) {
        self.channel = None;
        self.pending.clear();
        self.supervisor.stop().await;
    }

    /// One poll cycle: flush commands, drain notices, check liveness
    pub async fn tick(&mut self) -> Result<()> {
        let Some(channel) = self.channel.as_mut() else {
            return Ok(());
        };

        flush_commands(channel, &mut self.pending);
        let drained = channel.drain();

        if let Some(state) = drained.latest {
            debug!(notices = drained.count, %state, "drained notices");
            if state != self.state {
                self.state = state;
                self.view.show_state(state);
            }
        }

        if drained.disconnected {
            self.recover().await?;
        }
        Ok(())
    }

    /// Ask the monitor to bind the next key press
    ///
    /// There is no acknowledgement; the prompt is shown right away.
    pub fn request_rebind(&mut self) {
        info!("requesting key rebind");
        self.pending.push_back(Command::EnterRebindMode);
        self.view.show_message("Press a key to bind");
        if let Some(channel) = &self.channel {
            flush_commands(channel, &mut self.pending);
        }
    }

    /// Switch backends, persist the choice and restart the monitor
    pub async fn change_backend(&mut self, backend: Backend) -> Result<()> {
        if let Err(e) = self.supervisor.set_backend(backend) {
            warn!(%backend, "{:#}", e);
            self.view.show_message(&format!("Cannot use {}: {:#}", backend, e));
            return Ok(());
        }
        if let Err(e) = prefs::save_backend(&self.prefs_path, backend) {
            warn!("{:#}", e);
        }

        self.channel = None;
        let channel = self.supervisor.restart().await?;
        self.attach(channel);
        self.view.show_message(&format!("Using {} backend", backend));
        Ok(())
    }

    /// Apply one line of user input
    pub async fn handle_line(&mut self, line: &str) -> Result<Flow> {
        match Input::parse(line) {
            Input::Rebind => self.request_rebind(),
            Input::Backend(id) => match id.parse::<Backend>() {
                Ok(backend) => self.change_backend(backend).await?,
                Err(e) => self.view.show_message(&e.to_string()),
            },
            Input::ListBackends => {
                let current = self.supervisor.backend();
                for backend in Backend::ALL {
                    let marker = if backend == current { "*" } else { " " };
                    self.view.show_message(&format!("{} {}", marker, backend));
                }
            }
            Input::Status => {
                // Rebinds happen inside the monitor and are not reported back
                let status = format!(
                    "{} | startup key {} | backend {}",
                    self.state,
                    self.supervisor.key(),
                    self.supervisor.backend()
                );
                self.view.show_message(&status);
            }
            Input::Quit => return Ok(Flow::Quit),
            Input::Empty => {}
            Input::Unknown(line) => {
                self.view
                    .show_message(&format!("Unknown command '{}' (set, backend, status, quit)", line));
            }
        }
        Ok(Flow::Continue)
    }

    /// Run until `quit`, `shutdown` resolves, or the monitor cannot be kept
    /// alive. The monitor is always stopped on the way out.
    pub async fn run<F>(&mut self, mut lines: mpsc::Receiver<String>, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        if let Err(e) = self.start().await {
            // The supervisor muted the sink before the launch failed
            self.stop().await;
            return Err(e);
        }

        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tokio::pin!(shutdown);
        let mut lines_open = true;

        let result = loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.tick().await {
                        break Err(e);
                    }
                }

                line = lines.recv(), if lines_open => match line {
                    Some(line) => match self.handle_line(&line).await {
                        Ok(Flow::Continue) => {}
                        Ok(Flow::Quit) => break Ok(()),
                        Err(e) => break Err(e),
                    },
                    None => {
                        debug!("input closed");
                        lines_open = false;
                    }
                },

                _ = &mut shutdown => {
                    info!("shutdown signal received");
                    break Ok(());
                }
            }
        };

        self.stop().await;
        result
    }

    fn attach(&mut self, channel: ControlChannel) {
        self.channel = Some(channel);
        self.pending.clear();
        self.state = MuteState::Muted;
        self.view.show_state(MuteState::Muted);
    }

    /// The monitor went away on its own: report it and restart within budget
    async fn recover(&mut self) -> Result<()> {
        self.channel = None;
        self.pending.clear();

        let exit = self
            .supervisor
            .reap()
            .await
            .map(|exit| exit.to_string())
            .unwrap_or_else(|| "unknown status".to_string());
        error!(%exit, "key monitor exited");
        self.view.show_message(&format!("Key monitor exited ({})", exit));

        if self.restarts >= self.max_restarts {
            bail!("key monitor exited {} times, giving up", self.restarts + 1);
        }
        self.restarts += 1;
        warn!(attempt = self.restarts, max = self.max_restarts, "restarting key monitor");
        self.start().await
    }
}

/// Send queued commands until the monitor's queue is full
fn flush_commands(channel: &ControlChannel, pending: &mut VecDeque<Command>) {
    while let Some(command) = pending.pop_front() {
        match channel.try_send(command) {
            Ok(()) => debug!(?command, "command sent"),
            Err(TrySendError::Full(command)) => {
                debug!(?command, "command queue full, deferring");
                pending.push_front(command);
                return;
            }
            Err(TrySendError::Closed(command)) => {
                debug!(?command, "command queue closed");
                pending.push_front(command);
                return;
            }
        }
    }
}

/// Read stdin lines on a plain thread so shutdown never waits on it
pub fn spawn_line_reader() -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(16);
    let spawned = std::thread::Builder::new()
        .name("stdin-reader".to_string())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let Ok(line) = line else { break };
                if tx.blocking_send(line).is_err() {
                    break;
                }
            }
        });
    if let Err(e) = spawned {
        warn!(%e, "failed to spawn stdin reader, input disabled");
    }
    rx
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::audio::testing::{RecordingSink, SinkCall};
    use crate::audio::{AudioSink, SinkConfig};
    use crate::hotkey::{HotkeyError, KeyCode, KeyEvent, KeySource};
    use crate::lifecycle::testing::scripted_sources;
    use crate::lifecycle::{Isolation, SourceFactory};

    const KEY: KeyCode = KeyCode(183);

    #[derive(Default)]
    struct RecordingView {
        states: Vec<MuteState>,
        messages: Vec<String>,
    }

    impl View for RecordingView {
        fn show_state(&mut self, state: MuteState) {
            self.states.push(state);
        }

        fn show_message(&mut self, message: &str) {
            self.messages.push(message.to_string());
        }
    }

    fn test_config(prefs_path: PathBuf, max_restarts: u32) -> Config {
        Config {
            prefs_path,
            key: KEY,
            sink: SinkConfig::default(),
            poll_interval: Duration::from_millis(5),
            max_restarts,
        }
    }

    fn create_controller(
        sink: &Arc<RecordingSink>,
        factory: SourceFactory,
        config: &Config,
    ) -> Controller<RecordingView> {
        let sink: Arc<dyn AudioSink> = sink.clone();
        let supervisor =
            Supervisor::with_sink(KEY, config.sink.clone(), sink, Isolation::Task(factory));
        Controller::new(supervisor, RecordingView::default(), config)
    }

    async fn tick_until<V: View>(
        controller: &mut Controller<V>,
        done: impl Fn(&Controller<V>) -> bool,
    ) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !done(controller) {
                controller.tick().await.unwrap();
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_parse_input() {
        assert_eq!(Input::parse("set"), Input::Rebind);
        assert_eq!(Input::parse("  REBIND "), Input::Rebind);
        assert_eq!(Input::parse("backend none"), Input::Backend("none".to_string()));
        assert_eq!(Input::parse("backends"), Input::ListBackends);
        assert_eq!(Input::parse("status"), Input::Status);
        assert_eq!(Input::parse("quit"), Input::Quit);
        assert_eq!(Input::parse("   "), Input::Empty);
        assert_eq!(Input::parse("talk now"), Input::Unknown("talk now".to_string()));
    }

    #[tokio::test]
    async fn test_tick_reflects_monitor_state() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (factory, sources) = scripted_sources();
        let config = test_config(dir.path().join("prefs"), 0);
        let mut controller = create_controller(&sink, factory, &config);

        controller.start().await.unwrap();
        let keys = sources.recv().unwrap();

        keys.send(KeyEvent::press(KEY)).unwrap();
        tick_until(&mut controller, |c| c.state() == MuteState::Unmuted).await;
        keys.send(KeyEvent::release(KEY)).unwrap();
        tick_until(&mut controller, |c| c.state() == MuteState::Muted).await;

        assert_eq!(
            controller.view().states,
            vec![MuteState::Muted, MuteState::Unmuted, MuteState::Muted]
        );
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_rebind_through_controller() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (factory, sources) = scripted_sources();
        let config = test_config(dir.path().join("prefs"), 0);
        let mut controller = create_controller(&sink, factory, &config);

        controller.start().await.unwrap();
        let keys = sources.recv().unwrap();

        controller.handle_line("set").await.unwrap();
        assert_eq!(
            controller.view().messages.last().map(String::as_str),
            Some("Press a key to bind")
        );
        // Let the monitor pick up the command before the key arrives
        tokio::time::sleep(Duration::from_millis(50)).await;

        let new_key = KeyCode(30);
        keys.send(KeyEvent::press(new_key)).unwrap();
        keys.send(KeyEvent::release(new_key)).unwrap();
        keys.send(KeyEvent::press(new_key)).unwrap();
        tick_until(&mut controller, |c| c.state() == MuteState::Unmuted).await;

        assert_eq!(sink.count(SinkCall::Unmute), 1);
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_monitor_exit_is_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (factory, sources) = scripted_sources();
        let config = test_config(dir.path().join("prefs"), 1);
        let mut controller = create_controller(&sink, factory, &config);

        controller.start().await.unwrap();
        drop(sources.recv().unwrap());

        // A second source is opened by the restart
        let keys = tokio::task::spawn_blocking(move || {
            let keys = sources.recv().unwrap();
            (keys, sources)
        });
        tick_until(&mut controller, |c| {
            c.view().messages.iter().any(|m| m.starts_with("Key monitor exited"))
        })
        .await;
        let (keys, sources) = keys.await.unwrap();

        keys.send(KeyEvent::press(KEY)).unwrap();
        tick_until(&mut controller, |c| c.state() == MuteState::Unmuted).await;

        // Budget exhausted: the next exit is fatal
        drop(keys);
        let result = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                if let Err(e) = controller.tick().await {
                    return e;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(result.to_string().contains("giving up"));
        drop(sources);
    }

    #[tokio::test]
    async fn test_change_backend_persists_and_restarts() {
        let dir = tempfile::tempdir().unwrap();
        let prefs_path = dir.path().join("prefs");
        let sink = Arc::new(RecordingSink::default());
        let (factory, sources) = scripted_sources();
        let config = test_config(prefs_path.clone(), 0);
        let mut controller = create_controller(&sink, factory, &config);

        controller.start().await.unwrap();
        let _first = sources.recv().unwrap();

        controller.handle_line("backend none").await.unwrap();

        assert_eq!(prefs::load_saved_backend(&prefs_path), Some(Backend::Null));
        assert_eq!(controller.state(), MuteState::Muted);
        assert!(controller
            .view()
            .messages
            .contains(&"Using none backend".to_string()));
        // A fresh monitor was started with a fresh source
        let _second = sources.recv().unwrap();
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_invalid_backend_keeps_running() {
        let dir = tempfile::tempdir().unwrap();
        let prefs_path = dir.path().join("prefs");
        let sink = Arc::new(RecordingSink::default());
        let (factory, _sources) = scripted_sources();
        let config = test_config(prefs_path.clone(), 0);
        let mut controller = create_controller(&sink, factory, &config);

        controller.start().await.unwrap();
        assert_eq!(controller.handle_line("backend skype").await.unwrap(), Flow::Continue);
        // Command backend has no commands configured
        assert_eq!(controller.handle_line("backend command").await.unwrap(), Flow::Continue);

        assert!(!prefs_path.exists());
        assert_eq!(controller.view().messages.len(), 2);
        controller.stop().await;
    }

    #[tokio::test]
    async fn test_run_quits_and_unmutes() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (factory, _sources) = scripted_sources();
        let config = test_config(dir.path().join("prefs"), 0);
        let mut controller = create_controller(&sink, factory, &config);

        let (line_tx, line_rx) = mpsc::channel(4);
        line_tx.send("status".to_string()).await.unwrap();
        line_tx.send("quit".to_string()).await.unwrap();

        controller
            .run(line_rx, std::future::pending())
            .await
            .unwrap();

        assert_eq!(sink.calls().first(), Some(&SinkCall::Mute));
        assert_eq!(sink.calls().last(), Some(&SinkCall::Unmute));
        assert!(controller.view().messages[0].starts_with("MUTED"));
    }

    #[tokio::test]
    async fn test_run_unmutes_when_start_fails() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let factory: SourceFactory =
            Arc::new(|| -> Result<Box<dyn KeySource>, HotkeyError> { Err(HotkeyError::NoKeyboard) });
        let config = test_config(dir.path().join("prefs"), 0);
        let mut controller = create_controller(&sink, factory, &config);

        let (_line_tx, line_rx) = mpsc::channel(4);
        let result = controller.run(line_rx, std::future::pending()).await;

        assert!(result.is_err());
        assert_eq!(sink.calls(), vec![SinkCall::Mute, SinkCall::Unmute]);
    }

    #[tokio::test]
    async fn test_status_labels_startup_key() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (factory, _sources) = scripted_sources();
        let config = test_config(dir.path().join("prefs"), 0);
        let mut controller = create_controller(&sink, factory, &config);

        controller.handle_line("status").await.unwrap();

        let expected = format!("MUTED | startup key {} | backend pulseaudio", KEY);
        assert_eq!(controller.view().messages, vec![expected]);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::default());
        let (factory, _sources) = scripted_sources();
        let config = test_config(dir.path().join("prefs"), 0);
        let mut controller = create_controller(&sink, factory, &config);

        let (_line_tx, line_rx) = mpsc::channel(4);
        controller
            .run(line_rx, tokio::time::sleep(Duration::from_millis(30)))
            .await
            .unwrap();

        assert_eq!(sink.count(SinkCall::Unmute), 1);
    }
}
