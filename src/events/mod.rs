//! Events module for the UI sink
//!
//! Session and overlay changes are broadcast as `SessionEvent`s. The IPC
//! server pushes them to subscribed clients; nothing reads them back to
//! drive session logic.

use serde::{Deserialize, Serialize};

use crate::session::{OverlayPhase, OverlaySurface, RecordingMode};

/// Events emitted while sessions run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// An overlay surface changed phase
    PhaseChanged {
        surface: OverlaySurface,
        phase: OverlayPhase,
    },

    /// The bound recording mode changed (`None` once a conversation ends)
    ModeChanged { mode: Option<RecordingMode> },

    /// Native capture is running
    RecordingStarted {
        session_id: u64,
        mode: RecordingMode,
        sample_rate: u32,
    },

    /// Native capture stopped
    RecordingStopped {
        session_id: u64,
        /// Wall-clock length of the hold
        duration_ms: u64,
        captured: bool,
    },

    /// Raw transcription finished
    TranscriptReady { session_id: u64, chars: usize },

    /// The session's turn was fully delivered
    SessionEnded {
        session_id: u64,
        continues: bool,
    },

    /// Input levels while recording
    RecordingLevel { levels: Vec<f32> },

    /// A user-visible failure
    Error { message: String },
}

impl std::fmt::Display for SessionEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionEvent::PhaseChanged { surface, phase } => {
                write!(f, "PHASE_CHANGED ({:?} -> {})", surface, phase)
            }
            SessionEvent::ModeChanged { mode: Some(mode) } => write!(f, "MODE_CHANGED ({})", mode),
            SessionEvent::ModeChanged { mode: None } => write!(f, "MODE_CHANGED (none)"),
            SessionEvent::RecordingStarted { session_id, mode, .. } => {
                write!(f, "RECORDING_STARTED (#{} {})", session_id, mode)
            }
            SessionEvent::RecordingStopped {
                session_id,
                duration_ms,
                ..
            } => write!(f, "RECORDING_STOPPED (#{} {}ms)", session_id, duration_ms),
            SessionEvent::TranscriptReady { session_id, chars } => {
                write!(f, "TRANSCRIPT_READY (#{} {} chars)", session_id, chars)
            }
            SessionEvent::SessionEnded {
                session_id,
                continues,
            } => write!(f, "SESSION_ENDED (#{} continues={})", session_id, continues),
            SessionEvent::RecordingLevel { levels } => {
                write!(f, "RECORDING_LEVEL ({} bands)", levels.len())
            }
            SessionEvent::Error { message } => write!(f, "ERROR ({})", message),
        }
    }
}
