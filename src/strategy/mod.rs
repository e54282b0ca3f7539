//! Mode-specific recording behavior
//!
//! A `Strategy` is bound when a session starts and decides what the
//! session looks like on screen and what happens to a finished
//! transcript. There are exactly two variants:
//! - `Dictation`: single turn, post-processed and pasted into the focused app
//! - `Agent`: multi-turn conversation shown in the agent overlay

mod agent;
mod dictation;

pub use agent::AgentStrategy;
pub use dictation::DictationStrategy;

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::PreferenceHandle;
use crate::events::SessionEvent;
use crate::native::{AgentBackend, AppTarget, Chime, NativeBridge, TextFieldInfo, Toast};
use crate::pipeline::history::{HistoryStore, StoreInput, TranscriptionRecord, UsageMeter};
use crate::pipeline::{TranscriptionMetadata, TranscriptionPipeline};
use crate::session::{LoadingToken, LoadingTokens, OverlayPhase, OverlaySurface, PhaseBoard, RecordingMode};

/// Collaborators and shared state available to every strategy
pub struct StrategyContext {
    pub bridge: Arc<dyn NativeBridge>,
    pub pipeline: Arc<TranscriptionPipeline>,
    pub agent: Option<Arc<dyn AgentBackend>>,
    pub history: Arc<dyn HistoryStore>,
    pub tokens: LoadingTokens,
    pub phases: Arc<PhaseBoard>,
    pub prefs: PreferenceHandle,
    pub usage: UsageMeter,
    pub events: broadcast::Sender<SessionEvent>,
}

impl StrategyContext {
    /// Record and project a phase. Projection failures are logged only.
    pub async fn publish_phase(&self, surface: OverlaySurface, phase: OverlayPhase) {
        self.phases.record(surface, phase);
        if let Err(e) = self.bridge.set_phase(surface, phase).await {
            warn!(error = %e, ?surface, %phase, "failed to project overlay phase");
        }
    }

    pub async fn toast(&self, toast: Toast) {
        self.emit(SessionEvent::Error {
            message: toast.message.clone(),
        });
        if let Err(e) = self.bridge.show_toast(toast).await {
            warn!(error = %e, "failed to show toast");
        }
    }

    /// Fire-and-forget audio cue
    pub fn chime(&self, chime: Chime) {
        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = bridge.play_chime(chime).await {
                warn!(error = %e, ?chime, "failed to play chime");
            }
        });
    }

    pub fn emit(&self, event: SessionEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Release `token` if it is still the live one
    pub fn release_token(&self, token: Option<LoadingToken>) -> bool {
        token.is_some_and(|token| self.tokens.release(token))
    }

    /// Persist a finished dictation without blocking the caller
    pub fn store_in_background(&self, input: StoreInput) {
        if self.prefs.snapshot().incognito {
            debug!("incognito, history not stored");
            return;
        }
        let Some(record) = TranscriptionRecord::build(input) else {
            debug!("no audio, history not stored");
            return;
        };

        let history = self.history.clone();
        let bridge = self.bridge.clone();
        tokio::spawn(async move {
            if let Err(e) = history.append(&record).await {
                warn!(error = %e, id = %record.id, "failed to store transcription");
                let toast = Toast::error("History", "Unable to save transcription");
                if let Err(e) = bridge.show_toast(toast).await {
                    warn!(error = %e, "failed to show toast");
                }
            }
        });
    }
}

/// Everything known once a turn's audio has been transcribed
#[derive(Debug, Clone, Default)]
pub struct HandleTranscriptParams {
    pub session_id: u64,
    pub raw_transcript: String,
    /// Tone override from the focused application
    pub tone_id: Option<String>,
    pub text_field: Option<TextFieldInfo>,
    pub current_app: Option<AppTarget>,
    pub token: Option<LoadingToken>,
    pub sample_rate: u32,
    pub sample_count: usize,
    pub transcription: TranscriptionMetadata,
    pub transcription_warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandleTranscriptResult {
    /// Keep the strategy and mode bound for another turn
    pub should_continue: bool,
}

impl HandleTranscriptResult {
    pub const CONTINUE: Self = Self {
        should_continue: true,
    };
    pub const DONE: Self = Self {
        should_continue: false,
    };
}

/// The bound recording behavior
pub enum Strategy {
    Dictation(DictationStrategy),
    Agent(AgentStrategy),
}

impl Strategy {
    pub fn for_mode(mode: RecordingMode, ctx: Arc<StrategyContext>) -> Self {
        match mode {
            RecordingMode::Dictate => Strategy::Dictation(DictationStrategy::new(ctx)),
            RecordingMode::Agent => Strategy::Agent(AgentStrategy::new(ctx)),
        }
    }

    pub fn mode(&self) -> RecordingMode {
        match self {
            Strategy::Dictation(_) => RecordingMode::Dictate,
            Strategy::Agent(_) => RecordingMode::Agent,
        }
    }

    /// The overlay this strategy's phase is projected to
    pub fn surface(&self) -> OverlaySurface {
        match self {
            Strategy::Dictation(_) => OverlaySurface::Main,
            Strategy::Agent(_) => OverlaySurface::Agent,
        }
    }

    fn context(&self) -> &StrategyContext {
        match self {
            Strategy::Dictation(s) => &s.ctx,
            Strategy::Agent(s) => &s.ctx,
        }
    }

    pub async fn on_before_start(&self) {
        match self {
            Strategy::Dictation(_) => {}
            Strategy::Agent(s) => s.on_before_start().await,
        }
    }

    /// Idempotent; never fails the session
    pub async fn set_phase(&self, phase: OverlayPhase) {
        self.context().publish_phase(self.surface(), phase).await;
    }

    pub async fn handle_transcript(&self, params: HandleTranscriptParams) -> HandleTranscriptResult {
        match self {
            Strategy::Dictation(s) => s.handle_transcript(params).await,
            Strategy::Agent(s) => s.handle_transcript(params).await,
        }
    }

    /// Safe to call more than once
    pub async fn cleanup(&self) {
        match self {
            Strategy::Dictation(_) => {}
            Strategy::Agent(s) => s.cleanup().await,
        }
    }
}


#[cfg(test)]
mod tests {
    use super::harness::Harness;
    use super::*;
    use crate::native::mock::{BridgeCall, MockTranscriber};

    #[tokio::test]
    async fn test_strategy_surface_follows_mode() {
        let h = Harness::new(MockTranscriber::replying(""));
        let ctx = h.context();

        let dictation = Strategy::for_mode(RecordingMode::Dictate, ctx.clone());
        dictation.set_phase(OverlayPhase::Recording).await;
        let agent = Strategy::for_mode(RecordingMode::Agent, ctx.clone());
        agent.set_phase(OverlayPhase::Recording).await;

        assert_eq!(dictation.mode(), RecordingMode::Dictate);
        assert_eq!(agent.mode(), RecordingMode::Agent);
        assert_eq!(ctx.phases.current(OverlaySurface::Main), OverlayPhase::Recording);
        assert_eq!(ctx.phases.current(OverlaySurface::Agent), OverlayPhase::Recording);
        assert_eq!(
            h.bridge.calls(),
            vec![
                BridgeCall::SetPhase(OverlaySurface::Main, OverlayPhase::Recording),
                BridgeCall::SetPhase(OverlaySurface::Agent, OverlayPhase::Recording),
            ]
        );
    }

    #[tokio::test]
    async fn test_stale_token_is_not_released() {
        let h = Harness::new(MockTranscriber::replying(""));
        let ctx = h.context();
        let old = ctx.tokens.mint();
        let new = ctx.tokens.mint();

        assert!(!ctx.release_token(Some(old)));
        assert!(!ctx.release_token(None));
        assert!(ctx.release_token(Some(new)));
    }

    #[tokio::test]
    async fn test_toast_emits_error_event() {
        let h = Harness::new(MockTranscriber::replying(""));
        let mut rx = h.events.subscribe();
        let ctx = h.context();

        ctx.toast(Toast::error("Recording", "boom")).await;

        assert_eq!(h.bridge.toasts().len(), 1);
        assert_eq!(
            rx.recv().await.unwrap(),
            SessionEvent::Error {
                message: "boom".into()
            }
        );
    }
}
