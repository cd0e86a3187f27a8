//! evdev key source
//!
//! Reads every keyboard under /dev/input at the kernel level, which works
//! on X11 and all Wayland compositors. Each device gets its own blocking
//! reader thread feeding a shared [`ChannelSource`].
//!
//! The user must be in the 'input' group to access /dev/input/* devices.

use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;

use evdev::{Device, InputEventKind, Key};
use tracing::{debug, info, warn};

use super::keys::{KeyCode, KeyEvent};
use super::{ChannelSource, HotkeyError};

/// Open all keyboards and start one reader thread per device
pub fn open() -> Result<ChannelSource, HotkeyError> {
    let paths = find_keyboard_devices()?;
    if paths.is_empty() {
        return Err(HotkeyError::NoKeyboard);
    }

    let (tx, source) = ChannelSource::pair();
    let mut opened = 0;

    for path in paths {
        let device = match Device::open(&path) {
            Ok(device) => device,
            Err(e) => {
                warn!(?path, %e, "failed to open input device");
                continue;
            }
        };

        let tx = tx.clone();
        let thread_path = path.clone();
        let spawned = thread::Builder::new()
            .name("evdev-reader".to_string())
            .spawn(move || read_device(device, &thread_path, tx));
        match spawned {
            Ok(_) => opened += 1,
            Err(e) => warn!(?path, %e, "failed to spawn device reader"),
        }
    }

    if opened == 0 {
        return Err(HotkeyError::DeviceAccess("/dev/input/event*".to_string()));
    }

    info!(devices = opened, "listening on keyboard devices");
    Ok(source)
}

/// Blocking read loop for one device. Value 2 is auto-repeat, which is
/// reported as a press.
fn read_device(mut device: Device, path: &Path, tx: mpsc::Sender<KeyEvent>) {
    loop {
        let events = match device.fetch_events() {
            Ok(events) => events,
            Err(e) => {
                warn!(?path, %e, "input device read failed");
                return;
            }
        };

        for event in events {
            let InputEventKind::Key(key) = event.kind() else {
                continue;
            };
            let pressed = match event.value() {
                0 => false,
                1 | 2 => true,
                _ => continue,
            };
            let event = KeyEvent {
                code: KeyCode(u32::from(key.code())),
                pressed,
            };
            if tx.send(event).is_err() {
                debug!(?path, "key source dropped, reader exiting");
                return;
            }
        }
    }
}

fn find_keyboard_devices() -> Result<Vec<PathBuf>, HotkeyError> {
    let mut keyboards = Vec::new();

    let input_dir = std::fs::read_dir("/dev/input")
        .map_err(|e| HotkeyError::DeviceAccess(format!("/dev/input: {}", e)))?;

    for entry in input_dir {
        let entry = entry.map_err(|e| HotkeyError::DeviceAccess(e.to_string()))?;
        let path = entry.path();

        let is_event_device = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with("event"))
            .unwrap_or(false);
        if !is_event_device {
            continue;
        }

        match Device::open(&path) {
            Ok(device) => {
                // A keyboard has at least some letter keys
                let is_keyboard = device
                    .supported_keys()
                    .map(|keys| {
                        keys.contains(Key::KEY_A)
                            && keys.contains(Key::KEY_Z)
                            && keys.contains(Key::KEY_ENTER)
                    })
                    .unwrap_or(false);

                if is_keyboard {
                    debug!(?path, name = device.name().unwrap_or("unknown"), "found keyboard");
                    keyboards.push(path);
                }
            }
            Err(e) => {
                debug!(?path, %e, "skipping input device");
            }
        }
    }

    Ok(keyboards)
}
