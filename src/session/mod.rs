//! Recording session orchestration
//!
//! Owns the single active recording session. `SessionController` is the
//! only component that creates native captures, moves overlay phases, or
//! binds and discards strategies.

mod controller;
mod phase;
mod token;

pub use controller::{ControllerStatus, SessionController};
pub use phase::{OverlayPhase, OverlaySurface, PhaseBoard, RecordingMode};
pub use token::{LoadingToken, LoadingTokens};
