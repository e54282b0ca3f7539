//! Hold tracking
//!
//! Turns full "keys currently held" snapshots into activate/deactivate
//! edges per action. A quick tap defers its release until the lock window
//! closes so that a second tap can still engage the lock.

use std::collections::BTreeMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use super::keys::{key_set, HotkeyCombo, KeySet};
use super::lock::TapLock;
use crate::config::HotkeyBinding;

/// Double-tap window, measured from the previous onset
pub const LOCK_WINDOW: Duration = Duration::from_millis(400);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HoldTransition {
    Activate,
    Deactivate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionTransition {
    pub action: String,
    pub transition: HoldTransition,
}

/// Hold state for one action
#[derive(Debug, Clone)]
pub struct HoldTracker {
    window: Duration,
    held: bool,
    active: bool,
    lock: TapLock,
    /// Tap timer; cleared when the lock engages
    last_onset: Option<Instant>,
    /// Deferred release of a quick tap
    release_at: Option<Instant>,
}

impl HoldTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            held: false,
            active: false,
            lock: TapLock::Unlocked,
            last_onset: None,
            release_at: None,
        }
    }

    #[cfg(test)]
    pub fn is_active(&self) -> bool {
        self.active
    }

    #[cfg(test)]
    pub fn is_locked(&self) -> bool {
        self.lock.is_engaged()
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.release_at
    }

    /// Feed whether the combo is held now
    pub fn update(&mut self, held: bool, now: Instant) -> Vec<HoldTransition> {
        let mut out: Vec<HoldTransition> = self.poll(now).into_iter().collect();
        if held == self.held {
            return out;
        }
        self.held = held;

        let edge = if held {
            self.press(now)
        } else {
            self.release(now)
        };
        out.extend(edge);
        out
    }

    /// Fire a deferred release whose window has closed
    pub fn poll(&mut self, now: Instant) -> Option<HoldTransition> {
        match self.release_at {
            Some(at) if now >= at => self.deactivate(),
            _ => None,
        }
    }

    fn press(&mut self, now: Instant) -> Option<HoldTransition> {
        if !self.active {
            self.active = true;
            self.lock = TapLock::Unlocked;
            self.last_onset = Some(now);
            self.release_at = None;
            return Some(HoldTransition::Activate);
        }

        if self.lock.is_engaged() {
            self.lock.press(now, self.window);
            return None;
        }

        let within_window = self
            .last_onset
            .is_some_and(|onset| now.saturating_duration_since(onset) < self.window);
        if within_window {
            debug!("double tap, hold locked");
            self.lock.engage(now);
            self.last_onset = None;
            self.release_at = None;
        } else {
            self.last_onset = Some(now);
        }
        None
    }

    fn release(&mut self, now: Instant) -> Option<HoldTransition> {
        if !self.active {
            return None;
        }

        if self.lock.is_engaged() {
            return if self.lock.release() {
                self.deactivate()
            } else {
                None
            };
        }

        match self.last_onset {
            Some(onset) if now.saturating_duration_since(onset) < self.window => {
                self.release_at = Some(onset + self.window);
                None
            }
            _ => self.deactivate(),
        }
    }

    fn deactivate(&mut self) -> Option<HoldTransition> {
        let was_active = self.active;
        self.active = false;
        self.lock = TapLock::Unlocked;
        self.last_onset = None;
        self.release_at = None;
        was_active.then_some(HoldTransition::Deactivate)
    }
}

/// Hold trackers for every bound action
#[derive(Debug, Clone)]
pub struct HotkeyHoldTracker {
    window: Duration,
    combos: Vec<HotkeyCombo>,
    actions: BTreeMap<String, HoldTracker>,
}

impl HotkeyHoldTracker {
    pub fn new(bindings: &[HotkeyBinding]) -> Self {
        Self::with_window(bindings, LOCK_WINDOW)
    }

    pub fn with_window(bindings: &[HotkeyBinding], window: Duration) -> Self {
        let mut tracker = Self {
            window,
            combos: Vec::new(),
            actions: BTreeMap::new(),
        };
        tracker.bind(bindings);
        tracker
    }

    fn bind(&mut self, bindings: &[HotkeyBinding]) {
        self.combos = bindings.iter().filter_map(HotkeyCombo::from_binding).collect();
        self.actions = self
            .combos
            .iter()
            .map(|combo| (combo.action.clone(), HoldTracker::new(self.window)))
            .collect();
    }

    /// Replace the bindings. Active actions are released first.
    pub fn set_bindings(&mut self, bindings: &[HotkeyBinding]) -> Vec<ActionTransition> {
        let mut out = Vec::new();
        for (action, tracker) in &mut self.actions {
            if let Some(transition) = tracker.deactivate() {
                out.push(ActionTransition {
                    action: action.clone(),
                    transition,
                });
            }
        }
        self.bind(bindings);
        debug!(combos = self.combos.len(), "hotkey bindings updated");
        out
    }

    /// Feed a full snapshot of held keys
    pub fn update<S: AsRef<str>>(&mut self, keys: &[S], now: Instant) -> Vec<ActionTransition> {
        let held = key_set(keys.iter().map(AsRef::as_ref));
        self.apply(&held, now)
    }

    /// Focus left the app; missed key-ups must not leave anything held
    pub fn focus_lost(&mut self, now: Instant) -> Vec<ActionTransition> {
        self.apply(&KeySet::new(), now)
    }

    pub fn poll(&mut self, now: Instant) -> Vec<ActionTransition> {
        let mut out = Vec::new();
        for (action, tracker) in &mut self.actions {
            if let Some(transition) = tracker.poll(now) {
                out.push(ActionTransition {
                    action: action.clone(),
                    transition,
                });
            }
        }
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.actions
            .values()
            .filter_map(HoldTracker::next_deadline)
            .min()
    }

    #[cfg(test)]
    pub fn is_active(&self, action: &str) -> bool {
        self.actions.get(action).is_some_and(HoldTracker::is_active)
    }

    #[cfg(test)]
    pub fn is_locked(&self, action: &str) -> bool {
        self.actions.get(action).is_some_and(HoldTracker::is_locked)
    }

    fn apply(&mut self, held: &KeySet, now: Instant) -> Vec<ActionTransition> {
        let mut out = Vec::new();
        for (action, tracker) in &mut self.actions {
            let satisfied = self
                .combos
                .iter()
                .any(|combo| combo.action == *action && combo.is_held(held));
            for transition in tracker.update(satisfied, now) {
                out.push(ActionTransition {
                    action: action.clone(),
                    transition,
                });
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hotkey::{AGENT_DICTATE_ACTION, DICTATE_ACTION};

    const DICTATE: &[&str] = &["control", "option"];
    const NONE: &[&str] = &[];

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn tracker() -> HotkeyHoldTracker {
        HotkeyHoldTracker::new(&[
            HotkeyBinding {
                action_name: DICTATE_ACTION.into(),
                keys: vec!["control".into(), "option".into()],
            },
            HotkeyBinding {
                action_name: DICTATE_ACTION.into(),
                keys: vec!["f5".into()],
            },
            HotkeyBinding {
                action_name: AGENT_DICTATE_ACTION.into(),
                keys: vec!["control".into(), "command".into()],
            },
        ])
    }

    fn edges(transitions: Vec<ActionTransition>) -> Vec<(String, HoldTransition)> {
        transitions
            .into_iter()
            .map(|t| (t.action, t.transition))
            .collect()
    }

    fn activate(action: &str) -> (String, HoldTransition) {
        (action.to_string(), HoldTransition::Activate)
    }

    fn deactivate(action: &str) -> (String, HoldTransition) {
        (action.to_string(), HoldTransition::Deactivate)
    }

    #[test]
    fn test_activate_once_per_onset() {
        let mut t = tracker();
        let t0 = Instant::now();

        assert!(t.update(&["control"], t0).is_empty());
        assert_eq!(
            edges(t.update(DICTATE, t0 + ms(10))),
            vec![activate(DICTATE_ACTION)]
        );
        assert!(t.update(&["option", "control"], t0 + ms(20)).is_empty());
        assert!(t.update(DICTATE, t0 + ms(900)).is_empty());
        assert!(t.is_active(DICTATE_ACTION));
    }

    #[test]
    fn test_hold_release_deactivates_immediately() {
        let mut t = tracker();
        let t0 = Instant::now();

        t.update(DICTATE, t0);
        assert_eq!(
            edges(t.update(NONE, t0 + ms(1_500))),
            vec![deactivate(DICTATE_ACTION)]
        );
        assert!(t.next_deadline().is_none());
    }

    #[test]
    fn test_superset_breaks_combo() {
        let mut t = tracker();
        let t0 = Instant::now();

        t.update(&["control", "option"], t0);
        assert_eq!(
            edges(t.update(&["control", "option", "command"], t0 + ms(600))),
            vec![deactivate(DICTATE_ACTION)]
        );
    }

    #[test]
    fn test_either_combo_satisfies_action() {
        let mut t = tracker();
        let t0 = Instant::now();

        assert_eq!(edges(t.update(&["F5"], t0)), vec![activate(DICTATE_ACTION)]);
        // Switching between two combos of the same action is not a new onset
        assert!(t.update(DICTATE, t0 + ms(5)).is_empty());
    }

    #[test]
    fn test_quick_tap_release_is_deferred() {
        let mut t = tracker();
        let t0 = Instant::now();

        t.update(DICTATE, t0);
        assert!(t.update(NONE, t0 + ms(100)).is_empty());
        assert_eq!(t.next_deadline(), Some(t0 + LOCK_WINDOW));
        assert!(t.poll(t0 + ms(399)).is_empty());
        assert_eq!(
            edges(t.poll(t0 + LOCK_WINDOW)),
            vec![deactivate(DICTATE_ACTION)]
        );
        assert!(!t.is_active(DICTATE_ACTION));
    }

    #[test]
    fn test_double_tap_locks_until_next_press_release() {
        let mut t = tracker();
        let t0 = Instant::now();

        t.update(DICTATE, t0);
        t.update(NONE, t0 + ms(80));
        assert!(t.update(DICTATE, t0 + ms(200)).is_empty());
        assert!(t.is_locked(DICTATE_ACTION));
        assert!(t.update(NONE, t0 + ms(260)).is_empty());
        assert!(t.poll(t0 + ms(5_000)).is_empty());
        assert!(t.is_active(DICTATE_ACTION));

        assert!(t.update(DICTATE, t0 + ms(6_000)).is_empty());
        assert_eq!(
            edges(t.update(NONE, t0 + ms(6_100))),
            vec![deactivate(DICTATE_ACTION)]
        );
        assert!(!t.is_locked(DICTATE_ACTION));

        assert_eq!(
            edges(t.update(DICTATE, t0 + ms(7_000))),
            vec![activate(DICTATE_ACTION)]
        );
    }

    #[test]
    fn test_third_tap_inside_lock_window_is_ignored() {
        let mut t = tracker();
        let t0 = Instant::now();

        t.update(DICTATE, t0);
        t.update(NONE, t0 + ms(50));
        t.update(DICTATE, t0 + ms(100));
        t.update(NONE, t0 + ms(150));
        assert!(t.update(DICTATE, t0 + ms(250)).is_empty());
        assert!(t.update(NONE, t0 + ms(300)).is_empty());
        assert!(t.is_locked(DICTATE_ACTION));
        assert!(t.is_active(DICTATE_ACTION));
    }

    #[test]
    fn test_expired_tap_then_new_press_is_new_onset() {
        let mut t = tracker();
        let t0 = Instant::now();

        t.update(DICTATE, t0);
        t.update(NONE, t0 + ms(100));
        assert_eq!(
            edges(t.update(DICTATE, t0 + ms(450))),
            vec![deactivate(DICTATE_ACTION), activate(DICTATE_ACTION)]
        );
    }

    #[test]
    fn test_focus_lost_releases_everything() {
        let mut t = tracker();
        let t0 = Instant::now();

        t.update(&["control", "command"], t0);
        assert_eq!(
            edges(t.focus_lost(t0 + ms(1_000))),
            vec![deactivate(AGENT_DICTATE_ACTION)]
        );
    }

    #[test]
    fn test_action_without_combos_never_activates() {
        let mut t = HotkeyHoldTracker::new(&[HotkeyBinding {
            action_name: DICTATE_ACTION.into(),
            keys: Vec::new(),
        }]);
        assert!(t.update(NONE, Instant::now()).is_empty());
        assert!(t.update(&["control"], Instant::now()).is_empty());
        assert!(!t.is_active(DICTATE_ACTION));
    }

    #[test]
    fn test_rebinding_releases_active_actions() {
        let mut t = tracker();
        let t0 = Instant::now();
        t.update(DICTATE, t0);

        let released = t.set_bindings(&[]);
        assert_eq!(edges(released), vec![deactivate(DICTATE_ACTION)]);
        assert!(t.update(DICTATE, t0 + ms(10)).is_empty());
    }
}
