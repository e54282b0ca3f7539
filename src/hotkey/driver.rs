//! Hotkey driver task
//!
//! Owns the hold tracker, consumes key snapshots from the host (or the
//! local listener), and forwards activate/deactivate edges to a handler.
//! Wakes on its own when a deferred release is due.

use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info};

use super::tracker::{ActionTransition, HoldTransition, HotkeyHoldTracker};
use crate::config::HotkeyBinding;

/// Input to the hotkey driver
#[derive(Debug, Clone)]
pub enum HotkeyInput {
    /// Full snapshot of the keys held now
    KeysHeld(Vec<String>),
    /// The host lost focus; treat everything as released
    FocusLost,
    /// Bindings were edited
    BindingsChanged(Vec<HotkeyBinding>),
}

/// Receives hold edges per action
pub trait HoldHandler: Send + Sync {
    fn on_activate(&self, action: &str);
    fn on_deactivate(&self, action: &str);
}

pub struct HotkeyDriver<H> {
    tracker: HotkeyHoldTracker,
    handler: H,
    input_rx: mpsc::Receiver<HotkeyInput>,
}

impl<H: HoldHandler> HotkeyDriver<H> {
    pub fn new(
        bindings: &[HotkeyBinding],
        handler: H,
        input_rx: mpsc::Receiver<HotkeyInput>,
    ) -> Self {
        Self {
            tracker: HotkeyHoldTracker::new(bindings),
            handler,
            input_rx,
        }
    }

    /// Run until every input sender is dropped
    pub async fn run(mut self) {
        info!("hotkey driver started");
        loop {
            let deadline = self.tracker.next_deadline();
            tokio::select! {
                input = self.input_rx.recv() => match input {
                    Some(input) => self.handle(input, Instant::now()),
                    None => break,
                },
                _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    let transitions = self.tracker.poll(Instant::now());
                    self.dispatch(transitions);
                }
            }
        }
        info!("hotkey driver stopped");
    }

    fn handle(&mut self, input: HotkeyInput, now: Instant) {
        let transitions = match input {
            HotkeyInput::KeysHeld(keys) => self.tracker.update(keys.as_slice(), now),
            HotkeyInput::FocusLost => {
                debug!("focus lost, releasing held keys");
                self.tracker.focus_lost(now)
            }
            HotkeyInput::BindingsChanged(bindings) => self.tracker.set_bindings(&bindings),
        };
        self.dispatch(transitions);
    }

    fn dispatch(&self, transitions: Vec<ActionTransition>) {
        for ActionTransition { action, transition } in transitions {
            debug!(%action, ?transition, "hotkey transition");
            match transition {
                HoldTransition::Activate => self.handler.on_activate(&action),
                HoldTransition::Deactivate => self.handler.on_deactivate(&action),
            }
        }
    }
}
