//! Recording session controller
//!
//! Owns the single active session and the bound strategy. `start()` and
//! `stop()` are the only entry points; each checks its gate and installs
//! its in-flight slot synchronously, so callers that fire them in order
//! get them serialized in order. Overlapping calls join the in-flight
//! future instead of issuing a second native call.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use futures_util::future::{self, BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::{LoadingToken, OverlayPhase, OverlaySurface, RecordingMode};
use crate::events::SessionEvent;
use crate::hotkey::{mode_for_action, HoldHandler};
use crate::native::{AppTarget, Chime, StopRecordingResponse, TextFieldInfo, Toast, ToastKind};
use crate::pipeline::history::StoreInput;
use crate::strategy::{HandleTranscriptParams, Strategy, StrategyContext};

/// Re-trigger suppression after a failed start
const START_FAILURE_SUPPRESSION: Duration = Duration::from_millis(1_000);

/// Re-trigger suppression after a failed stop
const STOP_FAILURE_SUPPRESSION: Duration = Duration::from_millis(700);

const WORD_LIMIT_TOAST_MS: u64 = 8_000;

type StartFuture = Shared<BoxFuture<'static, ()>>;
type TeardownFuture = Shared<BoxFuture<'static, ()>>;
type StopFuture = Shared<BoxFuture<'static, Option<Arc<Captured>>>>;

/// The live recording
struct Session {
    id: u64,
    strategy: Arc<Strategy>,
    sample_rate: u32,
    started_at: Instant,
}

/// What a stop produced, handed to finalize
struct Captured {
    session: Session,
    audio: Option<StopRecordingResponse>,
    text_field: Option<TextFieldInfo>,
    token: LoadingToken,
}

#[derive(Default)]
struct ControllerState {
    mode: Option<RecordingMode>,
    strategy: Option<Arc<Strategy>>,
    session: Option<Session>,
    start_pending: Option<StartFuture>,
    stop_pending: Option<StopFuture>,
    suppress_until: Option<Instant>,
    /// Strategy cleanup the next start must wait out
    teardown: Option<TeardownFuture>,
    /// The settings UI is recording a new hotkey
    hotkey_capture: bool,
    next_session_id: u64,
    /// Only this session may tear down the bound strategy
    latest_session: u64,
}

impl ControllerState {
    fn recording(&self) -> bool {
        self.session.is_some() || self.start_pending.is_some()
    }

    fn suppressed(&self) -> bool {
        self.suppress_until
            .is_some_and(|until| Instant::now() < until)
    }

    /// Drop the bound strategy if it is still `strategy`
    fn unbind(&mut self, strategy: &Arc<Strategy>) -> bool {
        if self
            .strategy
            .as_ref()
            .is_some_and(|bound| Arc::ptr_eq(bound, strategy))
        {
            self.strategy = None;
            self.mode = None;
            true
        } else {
            false
        }
    }
}

/// Point-in-time view for status queries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub recording: bool,
    pub mode: Option<RecordingMode>,
    pub session_id: Option<u64>,
    pub main_phase: OverlayPhase,
    pub agent_phase: OverlayPhase,
    pub suppressed: bool,
    pub hotkey_capture: bool,
    pub words_used: u64,
}

struct Inner {
    ctx: Arc<StrategyContext>,
    state: Mutex<ControllerState>,
}

/// Handle to the process-wide session controller
#[derive(Clone)]
pub struct SessionController {
    inner: Arc<Inner>,
}

impl SessionController {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self {
            inner: Arc::new(Inner {
                ctx,
                state: Mutex::new(ControllerState {
                    next_session_id: 1,
                    ..Default::default()
                }),
            }),
        }
    }

    fn ctx(&self) -> &Arc<StrategyContext> {
        &self.inner.ctx
    }

    fn lock(&self) -> MutexGuard<'_, ControllerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn status(&self) -> ControllerStatus {
        let state = self.lock();
        ControllerStatus {
            recording: state.recording(),
            mode: state.mode,
            session_id: state.session.as_ref().map(|s| s.id),
            main_phase: self.ctx().phases.current(OverlaySurface::Main),
            agent_phase: self.ctx().phases.current(OverlaySurface::Agent),
            suppressed: state.suppressed(),
            hotkey_capture: state.hotkey_capture,
            words_used: self.ctx().usage.words(),
        }
    }

    /// While set, hotkey holds do not start recordings
    pub fn set_hotkey_capture(&self, capturing: bool) {
        self.lock().hotkey_capture = capturing;
        debug!(capturing, "hotkey capture");
    }

    /// Start recording in `mode`. Joins an in-flight start; otherwise a
    /// no-op while suppressed, capturing a hotkey, already recording,
    /// stopping, not onboarded, or over the word limit.
    pub fn start(&self, mode: RecordingMode) -> BoxFuture<'static, ()> {
        let ctx = self.ctx().clone();
        let prefs = ctx.prefs.snapshot();
        let mut state = self.lock();

        if state.hotkey_capture {
            debug!("capturing a hotkey, start ignored");
            return future::ready(()).boxed();
        }
        if state.suppressed() {
            debug!("start suppressed");
            return future::ready(()).boxed();
        }
        if let Some(pending) = state.start_pending.clone() {
            debug!("start already in flight, joining");
            return pending.boxed();
        }
        if state.session.is_some() || state.stop_pending.is_some() {
            debug!("session busy, start ignored");
            return future::ready(()).boxed();
        }
        if !prefs.onboarded {
            debug!("onboarding incomplete, start ignored");
            return future::ready(()).boxed();
        }
        if ctx.usage.exceeds(prefs.word_limit) {
            drop(state);
            info!(words = ctx.usage.words(), limit = ?prefs.word_limit, "word limit reached");
            ctx.chime(Chime::LimitReached);
            return async move {
                ctx.toast(Toast {
                    title: "Word limit reached".to_string(),
                    message: "You've used all your free words for today.".to_string(),
                    kind: ToastKind::Error,
                    action: Some("upgrade".to_string()),
                    duration_ms: Some(WORD_LIMIT_TOAST_MS),
                })
                .await;
            }
            .boxed();
        }

        let reusable = state
            .strategy
            .as_ref()
            .filter(|bound| bound.mode() == mode)
            .cloned();
        let (strategy, replaced) = match reusable {
            Some(bound) => (bound, None),
            None => {
                let fresh = Arc::new(Strategy::for_mode(mode, ctx.clone()));
                let replaced = state.strategy.replace(fresh.clone());
                (fresh, replaced)
            }
        };
        let mode_changed = state.mode != Some(mode);
        state.mode = Some(mode);

        let id = state.next_session_id;
        state.next_session_id += 1;
        state.latest_session = id;
        let teardown = state.teardown.clone();

        let this = self.clone();
        let microphone = prefs.preferred_microphone;
        let pending = async move {
            this.run_start(id, strategy, replaced, teardown, microphone)
                .await;
        }
        .boxed()
        .shared();
        state.start_pending = Some(pending.clone());
        drop(state);

        if mode_changed {
            ctx.emit(SessionEvent::ModeChanged { mode: Some(mode) });
        }
        pending.boxed()
    }

    async fn run_start(
        &self,
        id: u64,
        strategy: Arc<Strategy>,
        replaced: Option<Arc<Strategy>>,
        teardown: Option<TeardownFuture>,
        microphone: Option<String>,
    ) {
        let ctx = self.ctx();
        if let Some(teardown) = teardown {
            teardown.await;
        }
        if let Some(previous) = replaced {
            debug!(mode = %previous.mode(), "replacing bound strategy");
            previous.cleanup().await;
        }

        ctx.tokens.reset();
        strategy.on_before_start().await;
        ctx.chime(Chime::StartRecording);

        let ((), started) = tokio::join!(
            strategy.set_phase(OverlayPhase::Recording),
            ctx.bridge.start_recording(microphone.as_deref()),
        );

        match started {
            Ok(response) => {
                let sample_rate = response.effective_sample_rate();
                let mode = strategy.mode();
                {
                    let mut state = self.lock();
                    state.session = Some(Session {
                        id,
                        strategy,
                        sample_rate,
                        started_at: Instant::now(),
                    });
                    state.start_pending = None;
                }
                info!(session_id = id, %mode, sample_rate, "recording started");
                ctx.emit(SessionEvent::RecordingStarted {
                    session_id: id,
                    mode,
                    sample_rate,
                });
            }
            Err(e) => {
                warn!(error = %e, session_id = id, "failed to start recording");
                self.lock().suppress_until = Some(Instant::now() + START_FAILURE_SUPPRESSION);

                strategy.set_phase(OverlayPhase::Idle).await;
                ctx.toast(Toast::error(
                    "Recording",
                    "Unable to start recording. Please try again.",
                ))
                .await;
                strategy.cleanup().await;

                let unbound = {
                    let mut state = self.lock();
                    state.start_pending = None;
                    state.unbind(&strategy)
                };
                if unbound {
                    ctx.emit(SessionEvent::ModeChanged { mode: None });
                }
            }
        }
    }

    /// Stop the active recording and deliver its transcript. Waits for an
    /// in-flight start first; joins an in-flight stop.
    pub fn stop(&self) -> BoxFuture<'static, ()> {
        let mut state = self.lock();

        if let Some(pending) = state.stop_pending.clone() {
            debug!("stop already in flight, joining");
            return pending.map(|_| ()).boxed();
        }
        if !state.recording() {
            return future::ready(()).boxed();
        }

        let start = state.start_pending.clone();
        let this = self.clone();
        let pending = async move { this.run_stop(start).await }
            .boxed()
            .shared();
        state.stop_pending = Some(pending.clone());
        drop(state);

        let this = self.clone();
        async move {
            if let Some(captured) = pending.await {
                this.finalize(&captured).await;
            }
        }
        .boxed()
    }

    async fn run_stop(&self, start: Option<StartFuture>) -> Option<Arc<Captured>> {
        if let Some(start) = start {
            start.await;
        }

        let session = self.lock().session.take();
        let Some(session) = session else {
            debug!("start produced no session, nothing to stop");
            self.lock().stop_pending = None;
            return None;
        };

        let ctx = self.ctx();
        let token = ctx.tokens.mint();
        ctx.chime(Chime::StopRecording);

        let (audio, text_field, ()) = tokio::join!(
            ctx.bridge.stop_recording(),
            self.text_field(),
            session.strategy.set_phase(OverlayPhase::Loading),
        );

        let audio = match audio {
            Ok(audio) => Some(audio),
            Err(e) => {
                warn!(error = %e, session_id = session.id, "failed to stop recording");
                self.lock().suppress_until = Some(Instant::now() + STOP_FAILURE_SUPPRESSION);
                ctx.toast(Toast::error(
                    "Recording",
                    "Unable to stop recording. Please try again.",
                ))
                .await;
                None
            }
        };

        let duration_ms = session
            .started_at
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX);
        info!(
            session_id = session.id,
            duration_ms,
            samples = audio.as_ref().map(|a| a.samples.len()),
            "recording stopped"
        );
        ctx.emit(SessionEvent::RecordingStopped {
            session_id: session.id,
            duration_ms,
            captured: audio.is_some(),
        });

        self.lock().stop_pending = None;
        Some(Arc::new(Captured {
            session,
            audio,
            text_field,
            token,
        }))
    }

    /// Accessibility info is best-effort
    async fn text_field(&self) -> Option<TextFieldInfo> {
        match self.ctx().bridge.get_accessibility_info().await {
            Ok(info) => info,
            Err(e) => {
                warn!(error = %e, "accessibility info unavailable");
                None
            }
        }
    }

    async fn current_app(&self) -> Option<AppTarget> {
        match self.ctx().bridge.current_app().await {
            Ok(app) => app,
            Err(e) => {
                warn!(error = %e, "failed to resolve current app");
                None
            }
        }
    }

    async fn finalize(&self, captured: &Captured) {
        let session = &captured.session;
        let should_continue = match captured.audio.as_ref().filter(|a| !a.samples.is_empty()) {
            Some(audio) => self.deliver(captured, audio).await,
            None => {
                debug!(session_id = session.id, "no audio captured");
                false
            }
        };
        self.release_turn(session, captured.token, should_continue)
            .await;
    }

    /// Transcribe and hand the result to the strategy
    async fn deliver(&self, captured: &Captured, audio: &StopRecordingResponse) -> bool {
        let ctx = self.ctx();
        let session = &captured.session;
        let sample_rate = audio
            .sample_rate
            .filter(|rate| *rate > 0)
            .unwrap_or(session.sample_rate);

        let (current_app, transcript) = tokio::join!(
            self.current_app(),
            ctx.pipeline.transcribe(&audio.samples, sample_rate),
        );

        if transcript.is_failed() {
            warn!(session_id = session.id, warnings = ?transcript.warnings, "transcription failed");
            if session.strategy.mode() == RecordingMode::Dictate {
                ctx.store_in_background(StoreInput {
                    sample_rate,
                    sample_count: audio.samples.len(),
                    raw_transcript: None,
                    transcript: None,
                    transcription: transcript.metadata,
                    post_process: Default::default(),
                    warnings: transcript.warnings,
                });
            }
            ctx.toast(Toast::error("Transcription", "Unable to transcribe audio."))
                .await;
            return false;
        }

        let raw_transcript = transcript.raw_transcript.unwrap_or_default();
        ctx.emit(SessionEvent::TranscriptReady {
            session_id: session.id,
            chars: raw_transcript.chars().count(),
        });

        let result = session
            .strategy
            .handle_transcript(HandleTranscriptParams {
                session_id: session.id,
                raw_transcript,
                tone_id: current_app.as_ref().and_then(|app| app.tone_id.clone()),
                text_field: captured.text_field.clone(),
                current_app,
                token: Some(captured.token),
                sample_rate,
                sample_count: audio.samples.len(),
                transcription: transcript.metadata,
                transcription_warnings: transcript.warnings,
            })
            .await;
        result.should_continue
    }

    /// Runs on every finalize path
    async fn release_turn(&self, session: &Session, token: LoadingToken, should_continue: bool) {
        let ctx = self.ctx();
        if !should_continue {
            if ctx.release_token(Some(token)) {
                session.strategy.set_phase(OverlayPhase::Idle).await;
            }
            self.tear_down(session).await;
        }

        info!(session_id = session.id, continues = should_continue, "session ended");
        ctx.emit(SessionEvent::SessionEnded {
            session_id: session.id,
            continues: should_continue,
        });
    }

    /// Unbind and clean up the session's strategy, unless a newer session
    /// has started since; that session owns the strategy now.
    async fn tear_down(&self, session: &Session) {
        let claimed = {
            let mut state = self.lock();
            if state.latest_session != session.id {
                None
            } else {
                let unbound = state.unbind(&session.strategy);
                let strategy = session.strategy.clone();
                let teardown = async move { strategy.cleanup().await }.boxed().shared();
                state.teardown = Some(teardown.clone());
                Some((teardown, unbound))
            }
        };

        let Some((teardown, unbound)) = claimed else {
            debug!(session_id = session.id, "newer session owns the strategy, teardown skipped");
            return;
        };

        teardown.clone().await;
        {
            let mut state = self.lock();
            if state
                .teardown
                .as_ref()
                .is_some_and(|pending| pending.ptr_eq(&teardown))
            {
                state.teardown = None;
            }
        }
        if unbound {
            debug!(session_id = session.id, "mode reset");
            self.ctx().emit(SessionEvent::ModeChanged { mode: None });
        }
    }

    /// Tear down an agent conversation waiting for its next turn.
    /// Returns `false` when there is none or a recording is in progress.
    pub async fn end_conversation(&self) -> bool {
        let strategy = {
            let mut state = self.lock();
            if state.recording() || state.stop_pending.is_some() {
                return false;
            }
            if state.mode != Some(RecordingMode::Agent) {
                return false;
            }
            state.mode = None;
            state.strategy.take()
        };

        if let Some(strategy) = strategy {
            strategy.cleanup().await;
        }
        info!("agent conversation ended");
        self.ctx().emit(SessionEvent::ModeChanged { mode: None });
        true
    }
}

impl HoldHandler for SessionController {
    fn on_activate(&self, action: &str) {
        match mode_for_action(action) {
            Some(mode) => {
                tokio::spawn(self.start(mode));
            }
            None => debug!(action, "no recording mode for action"),
        }
    }

    fn on_deactivate(&self, action: &str) {
        if mode_for_action(action).is_some() {
            tokio::spawn(self.stop());
        }
    }
}
