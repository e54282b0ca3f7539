//! Two-stage transcription pipeline
//!
//! Stage one turns audio into a raw transcript. Stage two optionally
//! rewrites it through an LLM using the resolved tone. Both stages read a
//! preferences snapshot when called and never touch session state.

pub mod history;
pub mod prompt;

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::PreferenceHandle;
use crate::native::{
    GenerateTextRequest, JsonResponseSpec, TextFieldInfo, TextGenerator, TranscribeRequest,
    Transcriber,
};

use self::prompt::{
    build_post_processing_prompt, build_transcription_prompt, collect_dictionary_entries,
    parse_processed_transcription, post_processing_system_prompt, processed_transcription_schema,
    resolve_tone, transcription_language, PostProcessPrompt,
};

/// Post-processing mode recorded when the LLM stage did not run
pub const POST_PROCESS_MODE_NONE: &str = "none";

/// Audit metadata from the transcription stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptionMetadata {
    pub model_size: Option<String>,
    pub inference_device: Option<String>,
    pub transcription_prompt: Option<String>,
    pub transcription_mode: Option<String>,
    pub transcription_duration_ms: Option<u64>,
}

/// Output of the transcription stage
#[derive(Debug, Clone, Default)]
pub struct TranscriptResult {
    /// `None` when transcription failed
    pub raw_transcript: Option<String>,
    pub warnings: Vec<String>,
    pub metadata: TranscriptionMetadata,
}

impl TranscriptResult {
    /// No transcript and something to say about it. An empty transcript
    /// without warnings is a successful recording of silence.
    pub fn is_failed(&self) -> bool {
        self.raw_transcript.is_none() && !self.warnings.is_empty()
    }
}

/// Audit metadata from the post-processing stage
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostProcessMetadata {
    pub post_process_prompt: Option<String>,
    pub post_process_mode: Option<String>,
    pub post_process_device: Option<String>,
    pub postprocess_duration_ms: Option<u64>,
}

/// Output of the post-processing stage
#[derive(Debug, Clone, Default)]
pub struct PostProcessResult {
    pub transcript: String,
    pub warnings: Vec<String>,
    pub metadata: PostProcessMetadata,
}

/// Input to the post-processing stage
#[derive(Debug, Clone, Copy)]
pub struct PostProcessInput<'a> {
    pub raw_transcript: &'a str,
    pub tone_id: Option<&'a str>,
    pub text_field: Option<&'a TextFieldInfo>,
}

/// Drop repeated warnings, keeping first occurrences in order
pub fn dedup_warnings(warnings: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(warnings.len());
    for warning in warnings {
        if !out.contains(&warning) {
            out.push(warning);
        }
    }
    out
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis().try_into().unwrap_or(u64::MAX)
}

/// Sequential transcription and post-processing stages
pub struct TranscriptionPipeline {
    transcriber: Option<Arc<dyn Transcriber>>,
    generator: Option<Arc<dyn TextGenerator>>,
    prefs: PreferenceHandle,
}

impl TranscriptionPipeline {
    pub fn new(
        transcriber: Option<Arc<dyn Transcriber>>,
        generator: Option<Arc<dyn TextGenerator>>,
        prefs: PreferenceHandle,
    ) -> Self {
        Self {
            transcriber,
            generator,
            prefs,
        }
    }

    /// Transcribe captured audio into a raw transcript
    pub async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> TranscriptResult {
        let prefs = self.prefs.snapshot();
        let mut result = TranscriptResult {
            metadata: TranscriptionMetadata {
                model_size: prefs.model_size.clone().filter(|size| !size.is_empty()),
                ..Default::default()
            },
            ..Default::default()
        };

        let Some(transcriber) = &self.transcriber else {
            result.warnings.push("No transcription backend configured".to_string());
            return result;
        };

        let entries = collect_dictionary_entries(&prefs.dictionary);
        let prompt = build_transcription_prompt(&entries, &prefs.dictation_language);
        let language = transcription_language(&prefs.dictation_language);

        debug!(
            samples = samples.len(),
            sample_rate,
            %language,
            glossary = entries.sources.len(),
            "transcribing audio"
        );

        let started = Instant::now();
        let output = transcriber
            .transcribe(TranscribeRequest {
                samples,
                sample_rate,
                prompt: prompt.clone(),
                language,
            })
            .await;
        result.metadata.transcription_duration_ms = Some(elapsed_ms(started));
        result.metadata.transcription_prompt = Some(prompt);

        match output {
            Ok(output) => {
                let text = output.text.trim().to_string();
                info!(
                    chars = text.chars().count(),
                    duration_ms = result.metadata.transcription_duration_ms,
                    "transcription complete"
                );
                result.metadata.inference_device = output.inference_device;
                result.metadata.transcription_mode = output.mode;
                result.raw_transcript = Some(text);
            }
            Err(e) => {
                warn!(error = %e, "transcription failed");
                result.warnings.push(format!("Transcription failed: {e}"));
            }
        }

        result.warnings = dedup_warnings(result.warnings);
        result
    }

    /// Rewrite a raw transcript through the configured LLM. Any failure
    /// falls back to the raw transcript with a warning.
    pub async fn post_process(&self, input: PostProcessInput<'_>) -> PostProcessResult {
        let prefs = self.prefs.snapshot();
        let mut warnings = Vec::new();
        let mut metadata = PostProcessMetadata::default();
        let mut transcript = input.raw_transcript.trim().to_string();

        let tone = resolve_tone(&prefs, input.tone_id);
        let generator = self
            .generator
            .as_ref()
            .filter(|_| prefs.post_processing_enabled);

        match (tone, generator) {
            (Some(tone), _) if tone.disables_post_processing => {
                debug!(tone = %tone.id, "tone disables post-processing");
                metadata.post_process_mode = Some(POST_PROCESS_MODE_NONE.to_string());
            }
            (tone, Some(generator)) => {
                let prompt = build_post_processing_prompt(PostProcessPrompt {
                    transcript: input.raw_transcript,
                    user_name: prefs.user_name.as_deref(),
                    dictation_language: &prefs.dictation_language,
                    tone_template: tone.as_ref().map(|t| t.prompt_template.as_str()),
                    text_field: input.text_field,
                });

                let started = Instant::now();
                let output = generator
                    .generate_text(GenerateTextRequest {
                        system: post_processing_system_prompt(),
                        prompt: prompt.clone(),
                        json_response: Some(JsonResponseSpec {
                            name: "transcription_cleaning".to_string(),
                            description: "JSON response with the processed transcription"
                                .to_string(),
                            schema: processed_transcription_schema(),
                        }),
                    })
                    .await;
                metadata.postprocess_duration_ms = Some(elapsed_ms(started));
                metadata.post_process_prompt = Some(prompt);

                match output {
                    Ok(output) => {
                        match parse_processed_transcription(&output.text) {
                            Ok(processed) => transcript = processed,
                            Err(e) => {
                                warn!(error = %e, "post-processing response rejected");
                                warnings.push(e.to_string());
                            }
                        }
                        metadata.post_process_mode = output.mode;
                        metadata.post_process_device = output.inference_device;
                    }
                    Err(e) => {
                        warn!(error = %e, "post-processing request failed");
                        warnings.push(format!("Post-processing request failed: {e}"));
                    }
                }
            }
            (_, None) => {
                metadata.post_process_mode = Some(POST_PROCESS_MODE_NONE.to_string());
            }
        }

        PostProcessResult {
            transcript,
            warnings: dedup_warnings(warnings),
            metadata,
        }
    }
}
