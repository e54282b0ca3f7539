//! Hotkey hold tracking
//!
//! Key snapshots arrive from the native host (`keys_held`) or, on macOS,
//! from a local CGEventTap modifier listener. The driver turns them into
//! activate/deactivate edges per action and hands those to the session
//! controller.

mod driver;
mod gate;
mod keys;
#[cfg(target_os = "macos")]
mod listener;
mod lock;
mod tracker;

pub use driver::{HoldHandler, HotkeyDriver, HotkeyInput};
pub use gate::KeyListenerGate;
pub use keys::{mode_for_action, AGENT_DICTATE_ACTION, DICTATE_ACTION};
#[cfg(target_os = "macos")]
pub use listener::HotkeyListener;
