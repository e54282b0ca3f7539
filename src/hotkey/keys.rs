//! Key identifiers, combos, and action names
//!
//! A combo is an unordered set of key identifiers. Identifiers are
//! compared case-insensitively and a combo is satisfied only when the held
//! set equals it exactly, so `control` alone does not fire while
//! `control+command` is down.

use std::collections::BTreeSet;

use crate::config::HotkeyBinding;
use crate::session::RecordingMode;

/// Hold-to-dictate action
pub const DICTATE_ACTION: &str = "dictate";

/// Hold-to-talk-to-the-agent action
pub const AGENT_DICTATE_ACTION: &str = "agent-dictate";

/// Recording mode started by a hotkey action
pub fn mode_for_action(action: &str) -> Option<RecordingMode> {
    match action {
        DICTATE_ACTION => Some(RecordingMode::Dictate),
        AGENT_DICTATE_ACTION => Some(RecordingMode::Agent),
        _ => None,
    }
}

/// Normalized set of held keys
pub type KeySet = BTreeSet<String>;

pub fn key_set<I, S>(keys: I) -> KeySet
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    keys.into_iter()
        .map(|key| key.as_ref().trim().to_lowercase())
        .filter(|key| !key.is_empty())
        .collect()
}

/// A key set bound to an action
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HotkeyCombo {
    pub action: String,
    pub keys: KeySet,
}

impl HotkeyCombo {
    /// `None` for bindings without keys, which can never be satisfied
    pub fn from_binding(binding: &HotkeyBinding) -> Option<Self> {
        let keys = key_set(&binding.keys);
        (!keys.is_empty()).then(|| Self {
            action: binding.action_name.clone(),
            keys,
        })
    }

    pub fn is_held(&self, held: &KeySet) -> bool {
        self.keys == *held
    }
}

/// Tracks which modifier keys are currently pressed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ModifierState {
    pub control: bool,
    pub option: bool,
    pub command: bool,
    pub shift: bool,
}

impl ModifierState {
    /// Create a new ModifierState from CGEventFlags
    #[cfg(target_os = "macos")]
    pub fn from_flags(flags: core_graphics::event::CGEventFlags) -> Self {
        use core_graphics::event::CGEventFlags;

        Self {
            control: flags.contains(CGEventFlags::CGEventFlagControl),
            option: flags.contains(CGEventFlags::CGEventFlagAlternate),
            command: flags.contains(CGEventFlags::CGEventFlagCommand),
            shift: flags.contains(CGEventFlags::CGEventFlagShift),
        }
    }

    /// Check if all modifiers are released
    pub fn is_empty(&self) -> bool {
        !self.control && !self.option && !self.command && !self.shift
    }

    /// Key identifiers for a `keys_held` snapshot
    pub fn held_keys(&self) -> Vec<String> {
        [
            (self.control, "control"),
            (self.option, "option"),
            (self.command, "command"),
            (self.shift, "shift"),
        ]
        .into_iter()
        .filter(|(held, _)| *held)
        .map(|(_, name)| name.to_string())
        .collect()
    }
}
