//! Recording collaborators for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::Notify;

use super::*;
use crate::pipeline::history::{HistoryError, HistoryStore, TranscriptionRecord};

/// A call observed by `MockBridge`
#[derive(Debug, Clone, PartialEq)]
pub enum BridgeCall {
    StartKeyListener,
    StopKeyListener,
    StartRecording(Option<String>),
    StopRecording,
    AccessibilityInfo,
    SetPhase(OverlaySurface, OverlayPhase),
    AgentWindow(Option<AgentWindowState>),
    Paste(String, Option<String>),
    Chime(Chime),
    Toast(Toast),
    CurrentApp,
}

#[derive(Default)]
pub struct MockBridge {
    calls: Mutex<Vec<BridgeCall>>,
    start_gate: Mutex<Option<Arc<Notify>>>,
    stop_gate: Mutex<Option<Arc<Notify>>>,
    fail_start: AtomicBool,
    fail_stop: AtomicBool,
    fail_accessibility: AtomicBool,
    fail_paste: AtomicBool,
    permission: AtomicBool,
    sample_rate: Mutex<Option<f64>>,
    stop_response: Mutex<Option<StopRecordingResponse>>,
    app: Mutex<Option<AppTarget>>,
}

impl MockBridge {
    pub fn new() -> Arc<Self> {
        let bridge = Self::default();
        *bridge.sample_rate.lock().expect("mock lock") = Some(16_000.0);
        Arc::new(bridge)
    }

    pub fn calls(&self) -> Vec<BridgeCall> {
        self.calls.lock().expect("mock lock").clone()
    }

    pub fn count(&self, pred: impl Fn(&BridgeCall) -> bool) -> usize {
        self.calls().iter().filter(|call| pred(call)).count()
    }

    pub fn phases(&self, surface: OverlaySurface) -> Vec<OverlayPhase> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BridgeCall::SetPhase(s, phase) if s == surface => Some(phase),
                _ => None,
            })
            .collect()
    }

    pub fn pasted(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BridgeCall::Paste(text, _) => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn toasts(&self) -> Vec<Toast> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BridgeCall::Toast(toast) => Some(toast),
                _ => None,
            })
            .collect()
    }

    /// Hold `start_recording` until the returned notify fires
    pub fn hold_start(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.start_gate.lock().expect("mock lock") = Some(gate.clone());
        gate
    }

    /// Hold `stop_recording` until the returned notify fires
    pub fn hold_stop(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.stop_gate.lock().expect("mock lock") = Some(gate.clone());
        gate
    }

    pub fn fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    pub fn fail_stop(&self, fail: bool) {
        self.fail_stop.store(fail, Ordering::SeqCst);
    }

    pub fn fail_accessibility(&self, fail: bool) {
        self.fail_accessibility.store(fail, Ordering::SeqCst);
    }

    pub fn fail_paste(&self, fail: bool) {
        self.fail_paste.store(fail, Ordering::SeqCst);
    }

    pub fn set_permission(&self, granted: bool) {
        self.permission.store(granted, Ordering::SeqCst);
    }

    pub fn set_sample_rate(&self, rate: Option<f64>) {
        *self.sample_rate.lock().expect("mock lock") = rate;
    }

    pub fn set_stop_response(&self, response: StopRecordingResponse) {
        *self.stop_response.lock().expect("mock lock") = Some(response);
    }

    pub fn set_app(&self, app: AppTarget) {
        *self.app.lock().expect("mock lock") = Some(app);
    }

    fn record(&self, call: BridgeCall) {
        self.calls.lock().expect("mock lock").push(call);
    }

    fn fail(command: &str) -> BridgeError {
        BridgeError::Call {
            command: command.to_string(),
            message: "mock failure".to_string(),
        }
    }
}

/// Three seconds of 16 kHz silence
pub fn three_seconds() -> StopRecordingResponse {
    StopRecordingResponse {
        samples: vec![0.0; 48_000],
        sample_rate: Some(16_000),
        duration_ms: Some(3_000),
    }
}

#[async_trait]
impl NativeBridge for MockBridge {
    async fn start_key_listener(&self) -> Result<(), BridgeError> {
        self.record(BridgeCall::StartKeyListener);
        Ok(())
    }

    async fn stop_key_listener(&self) -> Result<(), BridgeError> {
        self.record(BridgeCall::StopKeyListener);
        Ok(())
    }

    async fn accessibility_permission(&self) -> Result<bool, BridgeError> {
        Ok(self.permission.load(Ordering::SeqCst))
    }

    async fn start_recording(
        &self,
        preferred_microphone: Option<&str>,
    ) -> Result<StartRecordingResponse, BridgeError> {
        self.record(BridgeCall::StartRecording(preferred_microphone.map(str::to_string)));
        let gate = self.start_gate.lock().expect("mock lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(Self::fail("start_recording"));
        }
        Ok(StartRecordingResponse {
            sample_rate: *self.sample_rate.lock().expect("mock lock"),
        })
    }

    async fn stop_recording(&self) -> Result<StopRecordingResponse, BridgeError> {
        self.record(BridgeCall::StopRecording);
        let gate = self.stop_gate.lock().expect("mock lock").clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        if self.fail_stop.load(Ordering::SeqCst) {
            return Err(Self::fail("stop_recording"));
        }
        Ok(self
            .stop_response
            .lock()
            .expect("mock lock")
            .clone()
            .unwrap_or_else(three_seconds))
    }

    async fn get_accessibility_info(&self) -> Result<Option<TextFieldInfo>, BridgeError> {
        self.record(BridgeCall::AccessibilityInfo);
        if self.fail_accessibility.load(Ordering::SeqCst) {
            return Err(Self::fail("get_accessibility_info"));
        }
        Ok(Some(TextFieldInfo {
            app_name: Some("Editor".into()),
            ..Default::default()
        }))
    }

    async fn set_phase(
        &self,
        surface: OverlaySurface,
        phase: OverlayPhase,
    ) -> Result<(), BridgeError> {
        self.record(BridgeCall::SetPhase(surface, phase));
        Ok(())
    }

    async fn set_agent_window(&self, state: Option<AgentWindowState>) -> Result<(), BridgeError> {
        self.record(BridgeCall::AgentWindow(state));
        Ok(())
    }

    async fn paste(&self, text: &str, keybind: Option<&str>) -> Result<(), BridgeError> {
        self.record(BridgeCall::Paste(text.to_string(), keybind.map(str::to_string)));
        if self.fail_paste.load(Ordering::SeqCst) {
            return Err(Self::fail("paste"));
        }
        Ok(())
    }

    async fn play_chime(&self, chime: Chime) -> Result<(), BridgeError> {
        self.record(BridgeCall::Chime(chime));
        Ok(())
    }

    async fn show_toast(&self, toast: Toast) -> Result<(), BridgeError> {
        self.record(BridgeCall::Toast(toast));
        Ok(())
    }

    async fn current_app(&self) -> Result<Option<AppTarget>, BridgeError> {
        self.record(BridgeCall::CurrentApp);
        Ok(self.app.lock().expect("mock lock").clone())
    }
}

/// What the transcriber was asked
#[derive(Debug, Clone)]
pub struct SeenTranscription {
    pub sample_count: usize,
    pub sample_rate: u32,
    pub prompt: String,
    pub language: String,
}

pub struct MockTranscriber {
    replies: Mutex<VecDeque<Result<String, String>>>,
    fallback: Result<String, String>,
    seen: Mutex<Vec<SeenTranscription>>,
    gate: Mutex<Option<Arc<Notify>>>,
}

impl MockTranscriber {
    pub fn replying(text: &str) -> Self {
        Self {
            replies: Mutex::new(VecDeque::new()),
            fallback: Ok(text.to_string()),
            seen: Mutex::new(Vec::new()),
            gate: Mutex::new(None),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            fallback: Err(message.to_string()),
            ..Self::replying("")
        }
    }

    /// Queue replies consumed before the fallback
    pub fn then(self, text: &str) -> Self {
        self.replies.lock().expect("mock lock").push_back(Ok(text.to_string()));
        self
    }

    /// Hold the next transcription until the returned notify fires
    pub fn hold(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.gate.lock().expect("mock lock") = Some(gate.clone());
        gate
    }

    pub fn calls(&self) -> usize {
        self.seen.lock().expect("mock lock").len()
    }

    pub fn last_request(&self) -> Option<SeenTranscription> {
        self.seen.lock().expect("mock lock").last().cloned()
    }
}

#[async_trait]
impl Transcriber for MockTranscriber {
    async fn transcribe(
        &self,
        request: TranscribeRequest<'_>,
    ) -> Result<TranscriberOutput, BridgeError> {
        self.seen.lock().expect("mock lock").push(SeenTranscription {
            sample_count: request.samples.len(),
            sample_rate: request.sample_rate,
            prompt: request.prompt.clone(),
            language: request.language.clone(),
        });
        let gate = self.gate.lock().expect("mock lock").take();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        let reply = self
            .replies
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());
        match reply {
            Ok(text) => Ok(TranscriberOutput {
                text,
                inference_device: Some("mock-device".into()),
                mode: Some("local".into()),
            }),
            Err(message) => Err(BridgeError::Call {
                command: "transcribe".into(),
                message,
            }),
        }
    }
}

pub struct MockGenerator {
    reply: Result<String, String>,
    systems: Mutex<Vec<String>>,
}

impl MockGenerator {
    pub fn replying(text: &str) -> Self {
        Self {
            reply: Ok(text.to_string()),
            systems: Mutex::new(Vec::new()),
        }
    }

    pub fn failing(message: &str) -> Self {
        Self {
            reply: Err(message.to_string()),
            systems: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> usize {
        self.systems.lock().expect("mock lock").len()
    }

    pub fn last_system(&self) -> Option<String> {
        self.systems.lock().expect("mock lock").last().cloned()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate_text(
        &self,
        request: GenerateTextRequest,
    ) -> Result<GeneratedText, BridgeError> {
        assert!(request.json_response.is_some());
        self.systems.lock().expect("mock lock").push(request.system);
        match &self.reply {
            Ok(text) => Ok(GeneratedText {
                text: text.clone(),
                inference_device: Some("mock-device".into()),
                mode: Some("mock".into()),
            }),
            Err(message) => Err(BridgeError::Call {
                command: "generate_text".into(),
                message: message.clone(),
            }),
        }
    }
}

/// Scripted agent backend
#[derive(Default)]
pub struct MockAgent {
    replies: Mutex<VecDeque<Result<AgentReply, String>>>,
    conversations: Mutex<Vec<Vec<AgentMessage>>>,
    calls: AtomicUsize,
}

impl MockAgent {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reply(self, response: &str) -> Self {
        self.push(Ok(AgentReply {
            response: response.to_string(),
            ..Default::default()
        }))
    }

    pub fn stop_after(self, response: &str) -> Self {
        self.push(Ok(AgentReply {
            response: response.to_string(),
            stop_requested: true,
            ..Default::default()
        }))
    }

    pub fn fail(self, message: &str) -> Self {
        self.push(Err(message.to_string()))
    }

    fn push(self, reply: Result<AgentReply, String>) -> Self {
        self.replies.lock().expect("mock lock").push_back(reply);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn last_conversation(&self) -> Vec<AgentMessage> {
        self.conversations
            .lock()
            .expect("mock lock")
            .last()
            .cloned()
            .unwrap_or_default()
    }
}

#[async_trait]
impl AgentBackend for MockAgent {
    async fn run(&self, conversation: &[AgentMessage]) -> Result<AgentReply, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.conversations
            .lock()
            .expect("mock lock")
            .push(conversation.to_vec());
        let reply = self
            .replies
            .lock()
            .expect("mock lock")
            .pop_front()
            .unwrap_or_else(|| Ok(AgentReply::default()));
        reply.map_err(|message| BridgeError::Call {
            command: "run_agent".into(),
            message,
        })
    }
}

/// In-memory history
#[derive(Default)]
pub struct MemoryHistory {
    records: Mutex<Vec<TranscriptionRecord>>,
    stored: Notify,
}

impl MemoryHistory {
    pub fn records(&self) -> Vec<TranscriptionRecord> {
        self.records.lock().expect("mock lock").clone()
    }

    /// Wait until at least `n` records were appended
    pub async fn wait_for(&self, n: usize) -> Vec<TranscriptionRecord> {
        loop {
            let notified = self.stored.notified();
            let records = self.records();
            if records.len() >= n {
                return records;
            }
            notified.await;
        }
    }
}

#[async_trait]
impl HistoryStore for MemoryHistory {
    async fn append(&self, record: &TranscriptionRecord) -> Result<(), HistoryError> {
        self.records.lock().expect("mock lock").push(record.clone());
        self.stored.notify_waiters();
        Ok(())
    }
}
