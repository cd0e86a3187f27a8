//! Key code definitions and key events
//!
//! Key codes are opaque, backend-specific numbers. On Linux they are evdev
//! codes, on macOS they are virtual key codes. Names are only a convenience
//! for configuration and logging.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::HotkeyError;

/// Backend-specific identifier of a physical key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyCode(pub u32);

/// A raw key press or release
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    /// `true` for press and auto-repeat, `false` for release
    pub pressed: bool,
}

impl KeyEvent {
    pub fn press(code: KeyCode) -> Self {
        Self { code, pressed: true }
    }

    pub fn release(code: KeyCode) -> Self {
        Self {
            code,
            pressed: false,
        }
    }
}

struct NamedKey {
    name: &'static str,
    code: u32,
    modifier: bool,
}

const fn key(name: &'static str, code: u32) -> NamedKey {
    NamedKey {
        name,
        code,
        modifier: false,
    }
}

const fn modifier(name: &'static str, code: u32) -> NamedKey {
    NamedKey {
        name,
        code,
        modifier: true,
    }
}

/// evdev codes from linux/input-event-codes.h
#[cfg(not(target_os = "macos"))]
const KEYS: &[NamedKey] = &[
    key("SCROLLLOCK", 70),
    key("PAUSE", 119),
    key("CAPSLOCK", 58),
    key("NUMLOCK", 69),
    key("INSERT", 110),
    key("HOME", 102),
    key("END", 107),
    key("SPACE", 57),
    key("COMPOSE", 127),
    key("F1", 59),
    key("F2", 60),
    key("F3", 61),
    key("F4", 62),
    key("F5", 63),
    key("F6", 64),
    key("F7", 65),
    key("F8", 66),
    key("F9", 67),
    key("F10", 68),
    key("F11", 87),
    key("F12", 88),
    key("F13", 183),
    key("F14", 184),
    key("F15", 185),
    key("F16", 186),
    key("F17", 187),
    key("F18", 188),
    key("F19", 189),
    key("F20", 190),
    key("F21", 191),
    key("F22", 192),
    key("F23", 193),
    key("F24", 194),
    modifier("LEFTCTRL", 29),
    modifier("RIGHTCTRL", 97),
    modifier("LEFTSHIFT", 42),
    modifier("RIGHTSHIFT", 54),
    modifier("LEFTALT", 56),
    modifier("RIGHTALT", 100),
    modifier("LEFTMETA", 125),
    modifier("RIGHTMETA", 126),
];

/// macOS virtual key codes (HIToolbox/Events.h)
#[cfg(target_os = "macos")]
const KEYS: &[NamedKey] = &[
    key("CAPSLOCK", 0x39),
    key("SPACE", 0x31),
    key("HOME", 0x73),
    key("END", 0x77),
    key("F1", 0x7A),
    key("F2", 0x78),
    key("F3", 0x63),
    key("F4", 0x76),
    key("F5", 0x60),
    key("F6", 0x61),
    key("F7", 0x62),
    key("F8", 0x64),
    key("F9", 0x65),
    key("F10", 0x6D),
    key("F11", 0x67),
    key("F12", 0x6F),
    key("F13", 0x69),
    key("F14", 0x6B),
    key("F15", 0x71),
    key("F16", 0x6A),
    key("F17", 0x40),
    key("F18", 0x4F),
    key("F19", 0x50),
    key("F20", 0x5A),
    modifier("LEFTCTRL", 0x3B),
    modifier("RIGHTCTRL", 0x3E),
    modifier("LEFTSHIFT", 0x38),
    modifier("RIGHTSHIFT", 0x3C),
    modifier("LEFTALT", 0x3A),
    modifier("RIGHTALT", 0x3D),
    modifier("LEFTMETA", 0x37),
    modifier("RIGHTMETA", 0x36),
    modifier("FN", 0x3F),
];

/// Short aliases accepted on the command line
const ALIASES: &[(&str, &str)] = &[
    ("LCTRL", "LEFTCTRL"),
    ("RCTRL", "RIGHTCTRL"),
    ("CTRL", "LEFTCTRL"),
    ("LSHIFT", "LEFTSHIFT"),
    ("RSHIFT", "RIGHTSHIFT"),
    ("LALT", "LEFTALT"),
    ("RALT", "RIGHTALT"),
    ("OPTION", "LEFTALT"),
    ("LMETA", "LEFTMETA"),
    ("RMETA", "RIGHTMETA"),
    ("SUPER", "LEFTMETA"),
    ("COMMAND", "LEFTMETA"),
];

impl KeyCode {
    /// Human-readable name, if the code is in the table for this platform
    pub fn name(self) -> Option<&'static str> {
        KEYS.iter().find(|k| k.code == self.0).map(|k| k.name)
    }

    /// Whether this code is a modifier key (Ctrl, Shift, Alt, Meta)
    pub fn is_modifier(self) -> bool {
        KEYS.iter().any(|k| k.code == self.0 && k.modifier)
    }
}

impl fmt::Display for KeyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{}", name),
            None => write!(f, "{}", self.0),
        }
    }
}

impl FromStr for KeyCode {
    type Err = HotkeyError;

    /// Accepts a raw number or a key name, case-insensitive, with an
    /// optional `KEY_` prefix (`F13`, `key_scrolllock`, `right-ctrl`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if let Ok(code) = trimmed.parse::<u32>() {
            return Ok(KeyCode(code));
        }

        let normalized: String = trimmed
            .chars()
            .filter(|c| !matches!(c, '-' | '_' | ' '))
            .map(|c| c.to_ascii_uppercase())
            .collect();
        let normalized = normalized.strip_prefix("KEY").unwrap_or(&normalized);
        let name = ALIASES
            .iter()
            .find(|(alias, _)| *alias == normalized)
            .map(|(_, name)| *name)
            .unwrap_or(normalized);

        KEYS.iter()
            .find(|k| k.name == name)
            .map(|k| KeyCode(k.code))
            .ok_or_else(|| HotkeyError::UnknownKey(s.to_string()))
    }
}
