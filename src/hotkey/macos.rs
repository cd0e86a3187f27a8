//! Key source using macOS CGEventTap
//!
//! Monitors system-wide KeyDown/KeyUp events, plus FlagsChanged for modifier
//! keys, which never produce KeyDown/KeyUp. The tap runs on a dedicated
//! thread with its own CFRunLoop.

use std::sync::mpsc;
use std::thread;

use core_foundation::runloop::{kCFRunLoopCommonModes, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType, EventField,
};
use tracing::{error, info, warn};

use super::keys::{KeyCode, KeyEvent};
use super::{ChannelSource, HotkeyError};

/// Modifier flag that tracks the given virtual key code
fn modifier_flag(code: u32) -> Option<CGEventFlags> {
    match code {
        0x3B | 0x3E => Some(CGEventFlags::CGEventFlagControl),
        0x3A | 0x3D => Some(CGEventFlags::CGEventFlagAlternate),
        0x37 | 0x36 => Some(CGEventFlags::CGEventFlagCommand),
        0x38 | 0x3C => Some(CGEventFlags::CGEventFlagShift),
        0x39 => Some(CGEventFlags::CGEventFlagAlphaShift),
        0x3F => Some(CGEventFlags::CGEventFlagSecondaryFn),
        _ => None,
    }
}

/// Start the event tap thread and wait until the tap is installed
pub fn open() -> Result<ChannelSource, HotkeyError> {
    let (tx, source) = ChannelSource::pair();
    let (ready_tx, ready_rx) = mpsc::channel::<Result<(), HotkeyError>>();

    thread::Builder::new()
        .name("event-tap".to_string())
        .spawn(move || {
            if let Err(e) = run_event_tap(tx, &ready_tx) {
                error!(%e, "event tap failed");
                let _ = ready_tx.send(Err(e));
            }
        })
        .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

    match ready_rx.recv() {
        Ok(Ok(())) => Ok(source),
        Ok(Err(e)) => Err(e),
        Err(_) => Err(HotkeyError::EventTapCreation),
    }
}

fn run_event_tap(
    tx: mpsc::Sender<KeyEvent>,
    ready_tx: &mpsc::Sender<Result<(), HotkeyError>>,
) -> Result<(), HotkeyError> {
    // Must be fast and non-blocking
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        let code = event.get_integer_value_field(EventField::KEYBOARD_EVENT_KEYCODE) as u32;
        let key_event = match event_type {
            CGEventType::KeyDown => Some(KeyEvent::press(KeyCode(code))),
            CGEventType::KeyUp => Some(KeyEvent::release(KeyCode(code))),
            CGEventType::FlagsChanged => modifier_flag(code).map(|flag| KeyEvent {
                code: KeyCode(code),
                pressed: event.get_flags().contains(flag),
            }),
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("event tap disabled, events may be missed");
                None
            }
            _ => None,
        };
        if let Some(key_event) = key_event {
            let _ = tx.send(key_event);
        }
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![
            CGEventType::KeyDown,
            CGEventType::KeyUp,
            CGEventType::FlagsChanged,
        ],
        callback,
    )
    .map_err(|_| HotkeyError::EventTapCreation)?;

    tap.enable();

    let run_loop_source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| HotkeyError::EventTapCreation)?;
    let run_loop = CFRunLoop::get_current();

    unsafe {
        run_loop.add_source(&run_loop_source, kCFRunLoopCommonModes);
    }

    info!("event tap created and enabled");
    let _ = ready_tx.send(Ok(()));

    CFRunLoop::run_current();
    Ok(())
}
