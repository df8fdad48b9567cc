//! Raccourci clavier qui ouvre le gestionnaire.
//!
//! Format texte : modificateurs puis touche, séparés par `+` (`Ctrl+Alt+U`,
//! `Shift+F2`). La comparaison de la touche ignore la casse.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

/// Raccourci par défaut.
pub const DEFAULT_HOTKEY: &str = "Ctrl+Alt+U";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HotkeyError {
    #[error("empty hotkey")]
    Empty,
    #[error("unknown modifier '{0}'")]
    UnknownModifier(String),
    #[error("hotkey '{0}' has no key")]
    MissingKey(String),
}

/// État des modificateurs (Ctrl, Shift, Alt, Meta).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Modifiers {
    pub ctrl: bool,
    pub alt: bool,
    pub shift: bool,
    pub meta: bool,
}

impl Modifiers {
    pub const CTRL_ALT: Self = Self {
        ctrl: true,
        alt: true,
        shift: false,
        meta: false,
    };

    fn set(&mut self, name: &str) -> bool {
        match name.to_ascii_lowercase().as_str() {
            "ctrl" | "control" | "accel" => self.ctrl = true,
            "alt" | "option" => self.alt = true,
            "shift" => self.shift = true,
            "meta" | "super" | "cmd" | "win" => self.meta = true,
            _ => return false,
        }
        true
    }
}

/// A key event as delivered by the host window.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyPress {
    pub modifiers: Modifiers,
    /// Logical key: a character (`"u"`) or a named key (`"F2"`, `"Escape"`).
    pub key: String,
}

impl KeyPress {
    pub fn new(modifiers: Modifiers, key: impl Into<String>) -> Self {
        Self {
            modifiers,
            key: key.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Hotkey {
    pub modifiers: Modifiers,
    /// Normalisée en majuscules.
    pub key: String,
}

impl Hotkey {
    pub fn parse(text: &str) -> Result<Self, HotkeyError> {
        let parts: Vec<&str> = text.split('+').map(str::trim).collect();
        let Some((key, mods)) = parts.split_last() else {
            return Err(HotkeyError::Empty);
        };
        if key.is_empty() {
            return Err(if parts.len() == 1 {
                HotkeyError::Empty
            } else {
                HotkeyError::MissingKey(text.to_string())
            });
        }

        let mut modifiers = Modifiers::default();
        for m in mods {
            if !modifiers.set(m) {
                return Err(HotkeyError::UnknownModifier(m.to_string()));
            }
        }
        Ok(Self {
            modifiers,
            key: key.to_uppercase(),
        })
    }

    /// `true` si `press` déclenche ce raccourci (modificateurs exacts).
    pub fn matches(&self, press: &KeyPress) -> bool {
        press.modifiers == self.modifiers && press.key.to_uppercase() == self.key
    }
}

impl Default for Hotkey {
    fn default() -> Self {
        Self {
            modifiers: Modifiers::CTRL_ALT,
            key: "U".into(),
        }
    }
}

impl FromStr for Hotkey {
    type Err = HotkeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for Hotkey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.modifiers;
        for (on, name) in [(m.ctrl, "Ctrl"), (m.alt, "Alt"), (m.shift, "Shift"), (m.meta, "Meta")] {
            if on {
                write!(f, "{name}+")?;
            }
        }
        f.write_str(&self.key)
    }
}
