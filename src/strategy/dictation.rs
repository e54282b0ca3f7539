//! Single-turn dictation: post-process, store, paste

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use super::{HandleTranscriptParams, HandleTranscriptResult, StrategyContext};
use crate::native::Toast;
use crate::pipeline::history::{count_words, StoreInput};
use crate::pipeline::{dedup_warnings, PostProcessInput, PostProcessResult};
use crate::session::{OverlayPhase, OverlaySurface};

/// Gives the overlay a moment to hide before keystrokes are synthesized
const PASTE_DELAY: Duration = Duration::from_millis(20);

pub struct DictationStrategy {
    pub(super) ctx: Arc<StrategyContext>,
}

impl DictationStrategy {
    pub fn new(ctx: Arc<StrategyContext>) -> Self {
        Self { ctx }
    }

    pub(super) async fn handle_transcript(
        &self,
        params: HandleTranscriptParams,
    ) -> HandleTranscriptResult {
        let ctx = &self.ctx;
        let prefs = ctx.prefs.snapshot();

        let processed = if params.raw_transcript.is_empty() {
            PostProcessResult::default()
        } else {
            ctx.pipeline
                .post_process(PostProcessInput {
                    raw_transcript: &params.raw_transcript,
                    tone_id: params.tone_id.as_deref(),
                    text_field: params.text_field.as_ref(),
                })
                .await
        };
        let transcript = processed.transcript;

        let mut warnings = params.transcription_warnings;
        warnings.extend(processed.warnings);
        ctx.store_in_background(StoreInput {
            sample_rate: params.sample_rate,
            sample_count: params.sample_count,
            raw_transcript: Some(params.raw_transcript),
            transcript: Some(transcript.clone()),
            transcription: params.transcription,
            post_process: processed.metadata,
            warnings: dedup_warnings(warnings),
        });
        ctx.usage.add(count_words(&transcript));

        if ctx.release_token(params.token) {
            ctx.publish_phase(OverlaySurface::Main, OverlayPhase::Idle)
                .await;
        } else {
            debug!(session_id = params.session_id, "loading token is stale, phase left alone");
        }

        if !transcript.is_empty() {
            tokio::time::sleep(PASTE_DELAY).await;

            let text = if prefs.append_trailing_space {
                format!("{transcript} ")
            } else {
                transcript
            };
            let keybind = params
                .current_app
                .as_ref()
                .and_then(|app| app.paste_keybind.as_deref());

            match ctx.bridge.paste(&text, keybind).await {
                Ok(()) => info!(
                    session_id = params.session_id,
                    chars = text.chars().count(),
                    "transcript pasted"
                ),
                Err(e) => {
                    warn!(error = %e, session_id = params.session_id, "failed to paste transcription");
                    ctx.toast(Toast::error("Paste", "Unable to paste transcription."))
                        .await;
                }
            }
        }

        HandleTranscriptResult::DONE
    }
}
