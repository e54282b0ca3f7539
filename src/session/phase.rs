//! Overlay phase, recording mode, and the per-surface phase board
//!
//! Valid overlay transitions:
//! - Idle -> Recording (capture started)
//! - Recording -> Loading (capture stopped, output pending)
//! - Loading -> Idle (single turn delivered)
//! - Loading -> Recording (next agent turn)
//! - Recording -> Idle (start rolled back)

use std::fmt;
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::events::SessionEvent;

/// What the overlay shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlayPhase {
    #[default]
    Idle,
    Recording,
    Loading,
}

impl fmt::Display for OverlayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayPhase::Idle => write!(f, "idle"),
            OverlayPhase::Recording => write!(f, "recording"),
            OverlayPhase::Loading => write!(f, "loading"),
        }
    }
}

impl OverlayPhase {
    /// Returns whether moving from `self` to `target` keeps the overlay invariant.
    /// Re-asserting the current phase is always allowed.
    pub fn can_transition_to(&self, target: OverlayPhase) -> bool {
        *self == target
            || matches!(
                (self, target),
                (OverlayPhase::Idle, OverlayPhase::Recording)
                    | (OverlayPhase::Recording, OverlayPhase::Loading)
                    | (OverlayPhase::Loading, OverlayPhase::Idle)
                    | (OverlayPhase::Loading, OverlayPhase::Recording)
                    | (OverlayPhase::Recording, OverlayPhase::Idle)
            )
    }
}

/// Which window a phase is projected to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlaySurface {
    /// The main recording overlay
    Main,
    /// The separate agent conversation overlay
    Agent,
}

impl OverlaySurface {
    fn index(self) -> usize {
        match self {
            OverlaySurface::Main => 0,
            OverlaySurface::Agent => 1,
        }
    }
}

/// Recording mode bound when a session starts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingMode {
    /// Single-turn dictation pasted into the focused app
    Dictate,
    /// Multi-turn agent conversation
    Agent,
}

impl fmt::Display for RecordingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingMode::Dictate => write!(f, "dictate"),
            RecordingMode::Agent => write!(f, "agent"),
        }
    }
}

/// Current phase per surface, broadcasting every change to the UI sink
#[derive(Debug)]
pub struct PhaseBoard {
    phases: Mutex<[OverlayPhase; 2]>,
    events: broadcast::Sender<SessionEvent>,
}

impl PhaseBoard {
    pub fn new(events: broadcast::Sender<SessionEvent>) -> Self {
        Self {
            phases: Mutex::new([OverlayPhase::Idle; 2]),
            events,
        }
    }

    pub fn current(&self, surface: OverlaySurface) -> OverlayPhase {
        self.phases.lock().unwrap_or_else(PoisonError::into_inner)[surface.index()]
    }

    /// Record a phase change. Returns `false` when the transition breaks the
    /// overlay invariant; the phase is applied anyway so the UI never lags.
    pub fn record(&self, surface: OverlaySurface, phase: OverlayPhase) -> bool {
        let previous = {
            let mut phases = self.phases.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut phases[surface.index()], phase)
        };

        let valid = previous.can_transition_to(phase);
        if !valid {
            warn!(?surface, from = %previous, to = %phase, "unexpected overlay transition");
        }

        if previous != phase {
            debug!(?surface, from = %previous, to = %phase, "overlay phase");
            let _ = self.events.send(SessionEvent::PhaseChanged { surface, phase });
        }

        valid
    }
}
