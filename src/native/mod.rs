//! Collaborator seams
//!
//! Everything outside the orchestrator (audio capture, accessibility, paste,
//! overlays, transcription, LLM post-processing, agent backend) is reached
//! through these traits. The daemon wires them to the native host over IPC;
//! tests wire them to recording mocks.

#[cfg(test)]
pub(crate) mod mock;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::session::{OverlayPhase, OverlaySurface};

/// Sample rate assumed when the capture engine reports a bogus value
pub const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Errors returned by collaborator calls
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("{command} failed: {message}")]
    Call { command: String, message: String },

    #[error("native host disconnected")]
    Disconnected,

    #[error("malformed payload: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reply to `start_recording`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StartRecordingResponse {
    pub sample_rate: Option<f64>,
}

impl StartRecordingResponse {
    /// The reported sample rate, or the default when missing or invalid
    pub fn effective_sample_rate(&self) -> u32 {
        match self.sample_rate {
            Some(rate) if rate.is_finite() && rate >= 1.0 && rate <= u32::MAX as f64 => {
                rate.round() as u32
            }
            _ => DEFAULT_SAMPLE_RATE,
        }
    }
}

/// Reply to `stop_recording`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StopRecordingResponse {
    pub samples: Vec<f32>,
    pub sample_rate: Option<u32>,
    pub duration_ms: Option<u64>,
}

/// Focused text field as reported by the accessibility inspector
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TextFieldInfo {
    pub app_name: Option<String>,
    pub selected_text: Option<String>,
    pub preceding_text: Option<String>,
    pub following_text: Option<String>,
}

impl TextFieldInfo {
    pub fn has_selection(&self) -> bool {
        self.selected_text
            .as_deref()
            .is_some_and(|text| !text.trim().is_empty())
    }
}

/// The application in focus, with its per-app overrides
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppTarget {
    pub id: String,
    pub name: String,
    pub tone_id: Option<String>,
    pub paste_keybind: Option<String>,
}

/// Audio cues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Chime {
    StartRecording,
    StopRecording,
    LimitReached,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToastKind {
    Info,
    Error,
}

/// A user-visible notice rendered by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Toast {
    pub title: String,
    pub message: String,
    pub kind: ToastKind,
    pub action: Option<String>,
    pub duration_ms: Option<u64>,
}

impl Toast {
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            message: message.into(),
            kind: ToastKind::Error,
            action: None,
            duration_ms: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSender {
    Me,
    Agent,
}

/// One bubble in the agent overlay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentWindowMessage {
    pub text: String,
    pub sender: MessageSender,
    #[serde(default)]
    pub is_error: bool,
    #[serde(default)]
    pub tools: Vec<String>,
}

/// Full agent overlay contents
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentWindowState {
    pub messages: Vec<AgentWindowMessage>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    User,
    Assistant,
}

/// Model-facing conversation entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub role: AgentRole,
    pub content: String,
}

/// Result of one agent turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AgentReply {
    pub response: String,
    pub is_error: bool,
    /// The agent invoked its stop tool
    pub stop_requested: bool,
    pub tools: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscribeRequest<'a> {
    pub samples: &'a [f32],
    pub sample_rate: u32,
    pub prompt: String,
    pub language: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranscriberOutput {
    pub text: String,
    pub inference_device: Option<String>,
    pub mode: Option<String>,
}

/// Constrained JSON response requested from the LLM
#[derive(Debug, Clone, Serialize)]
pub struct JsonResponseSpec {
    pub name: String,
    pub description: String,
    pub schema: serde_json::Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateTextRequest {
    pub system: String,
    pub prompt: String,
    pub json_response: Option<JsonResponseSpec>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct GeneratedText {
    pub text: String,
    pub inference_device: Option<String>,
    pub mode: Option<String>,
}

/// Native capture, overlay, and output commands
#[async_trait]
pub trait NativeBridge: Send + Sync {
    async fn start_key_listener(&self) -> Result<(), BridgeError>;

    async fn stop_key_listener(&self) -> Result<(), BridgeError>;

    /// OS accessibility permission, which gates key listening
    async fn accessibility_permission(&self) -> Result<bool, BridgeError>;

    async fn start_recording(
        &self,
        preferred_microphone: Option<&str>,
    ) -> Result<StartRecordingResponse, BridgeError>;

    async fn stop_recording(&self) -> Result<StopRecordingResponse, BridgeError>;

    async fn get_accessibility_info(&self) -> Result<Option<TextFieldInfo>, BridgeError>;

    async fn set_phase(&self, surface: OverlaySurface, phase: OverlayPhase)
        -> Result<(), BridgeError>;

    async fn set_agent_window(&self, state: Option<AgentWindowState>) -> Result<(), BridgeError>;

    async fn paste(&self, text: &str, keybind: Option<&str>) -> Result<(), BridgeError>;

    async fn play_chime(&self, chime: Chime) -> Result<(), BridgeError>;

    async fn show_toast(&self, toast: Toast) -> Result<(), BridgeError>;

    /// Resolve (and register) the focused application
    async fn current_app(&self) -> Result<Option<AppTarget>, BridgeError>;
}

/// Speech-to-text backend
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, request: TranscribeRequest<'_>)
        -> Result<TranscriberOutput, BridgeError>;
}

/// LLM used for post-processing
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate_text(&self, request: GenerateTextRequest)
        -> Result<GeneratedText, BridgeError>;
}

/// Conversation backend behind agent mode
#[async_trait]
pub trait AgentBackend: Send + Sync {
    async fn run(&self, conversation: &[AgentMessage]) -> Result<AgentReply, BridgeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_rate_fallback() {
        let valid = StartRecordingResponse {
            sample_rate: Some(48_000.0),
        };
        assert_eq!(valid.effective_sample_rate(), 48_000);

        for bogus in [None, Some(0.0), Some(-1.0), Some(f64::NAN)] {
            let resp = StartRecordingResponse { sample_rate: bogus };
            assert_eq!(resp.effective_sample_rate(), DEFAULT_SAMPLE_RATE);
        }
    }

    #[test]
    fn test_stop_response_decodes_camel_case() {
        let json = r#"{"samples":[0.0,0.5],"sampleRate":16000,"durationMs":125}"#;
        let resp: StopRecordingResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.samples.len(), 2);
        assert_eq!(resp.sample_rate, Some(16_000));
        assert_eq!(resp.duration_ms, Some(125));
    }

    #[test]
    fn test_blank_selection_is_not_a_selection() {
        let info = TextFieldInfo {
            selected_text: Some("   ".into()),
            ..Default::default()
        };
        assert!(!info.has_selection());
    }
}
