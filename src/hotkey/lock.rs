//! Double-tap lock
//!
//! Engaged by a second onset shortly after the first. While engaged the
//! action stays active with no keys held. Onsets inside the window that
//! engaged the lock are ignored; the first later onset arms the unlock
//! and its release ends the hold.

use std::time::Duration;

use tokio::time::Instant;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TapLock {
    #[default]
    Unlocked,
    /// Engaged at `at`
    Locked { at: Instant },
    /// Combo pressed again; the next release unlocks
    Unlocking,
}

impl TapLock {
    pub fn is_engaged(&self) -> bool {
        !matches!(self, TapLock::Unlocked)
    }

    pub fn engage(&mut self, now: Instant) {
        *self = TapLock::Locked { at: now };
    }

    /// Onset while engaged
    pub fn press(&mut self, now: Instant, window: Duration) {
        if let TapLock::Locked { at } = *self {
            if now.saturating_duration_since(at) >= window {
                *self = TapLock::Unlocking;
            }
        }
    }

    /// Release while engaged. Returns `true` when the lock let go.
    pub fn release(&mut self) -> bool {
        match self {
            TapLock::Unlocking => {
                *self = TapLock::Unlocked;
                true
            }
            TapLock::Locked { .. } => false,
            TapLock::Unlocked => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(400);

    #[test]
    fn test_release_swallowed_until_pressed_again() {
        let t0 = Instant::now();
        let mut lock = TapLock::default();
        lock.engage(t0);

        assert!(lock.is_engaged());
        assert!(!lock.release());
        assert!(!lock.release());

        lock.press(t0 + Duration::from_secs(2), WINDOW);
        assert_eq!(lock, TapLock::Unlocking);
        assert!(lock.release());
        assert!(!lock.is_engaged());
    }

    #[test]
    fn test_press_inside_window_is_noop() {
        let t0 = Instant::now();
        let mut lock = TapLock::default();
        lock.engage(t0);

        lock.press(t0 + Duration::from_millis(150), WINDOW);
        assert_eq!(lock, TapLock::Locked { at: t0 });
        assert!(!lock.release());
    }
}
