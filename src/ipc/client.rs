//! Client for the native host's command socket
//!
//! Requests carry an id and replies may arrive in any order. A reader task
//! routes each reply to its waiting caller; when the host goes away every
//! pending and future call fails with `BridgeError::Disconnected`. A reply
//! too large to accept fails only its own call.

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::sync::{oneshot, Mutex as AsyncMutex};
use tracing::{debug, info, warn};

use super::protocol::{read_host_frame, write_frame, HostFrame, HostReply, HostRequest, MAX_HOST_REPLY_LEN};
use crate::native::{
    AgentBackend, AgentMessage, AgentReply, AgentWindowState, AppTarget, BridgeError, Chime,
    GenerateTextRequest, GeneratedText, NativeBridge, StartRecordingResponse,
    StopRecordingResponse, TextFieldInfo, TextGenerator, Toast, TranscribeRequest,
    TranscriberOutput, Transcriber,
};
use crate::session::{OverlayPhase, OverlaySurface};

/// Waiting callers by request id; `None` once the host disconnected
type Pending = Arc<Mutex<Option<HashMap<u64, oneshot::Sender<HostReply>>>>>;

pub struct HostClient {
    writer: AsyncMutex<OwnedWriteHalf>,
    pending: Pending,
    next_id: AtomicU64,
}

impl HostClient {
    pub async fn connect(path: &Path) -> Result<Self, BridgeError> {
        let stream = UnixStream::connect(path).await?;
        info!(?path, "connected to native host");
        Ok(Self::from_stream(stream))
    }

    pub fn from_stream(stream: UnixStream) -> Self {
        Self::with_reply_limit(stream, MAX_HOST_REPLY_LEN)
    }

    fn with_reply_limit(stream: UnixStream, max_reply_len: usize) -> Self {
        let (reader, writer) = stream.into_split();
        let pending: Pending = Arc::new(Mutex::new(Some(HashMap::new())));
        tokio::spawn(route_replies(reader, pending.clone(), max_reply_len));

        Self {
            writer: AsyncMutex::new(writer),
            pending,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn is_connected(&self) -> bool {
        lock(&self.pending).is_some()
    }

    #[cfg(test)]
    fn pending_calls(&self) -> usize {
        lock(&self.pending).as_ref().map_or(0, HashMap::len)
    }

    async fn call<T: DeserializeOwned>(&self, command: &str, args: Value) -> Result<T, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        match lock(&self.pending).as_mut() {
            Some(pending) => pending.insert(id, tx),
            None => return Err(BridgeError::Disconnected),
        };
        let _guard = PendingGuard {
            pending: &self.pending,
            id,
        };

        let request = HostRequest { id, command, args };
        {
            let mut writer = self.writer.lock().await;
            write_frame(&mut *writer, &request).await?;
        }

        let reply = rx.await.map_err(|_| BridgeError::Disconnected)?;
        if let Some(message) = reply.error {
            return Err(BridgeError::Call {
                command: command.to_string(),
                message,
            });
        }
        Ok(serde_json::from_value(reply.result)?)
    }
}

/// Drops a call's entry when the call ends, however it ends
struct PendingGuard<'a> {
    pending: &'a Pending,
    id: u64,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(pending) = lock(self.pending).as_mut() {
            pending.remove(&self.id);
        }
    }
}

fn lock(
    pending: &Pending,
) -> std::sync::MutexGuard<'_, Option<HashMap<u64, oneshot::Sender<HostReply>>>> {
    pending.lock().unwrap_or_else(PoisonError::into_inner)
}

async fn route_replies(mut reader: OwnedReadHalf, pending: Pending, max_reply_len: usize) {
    loop {
        let frame = match read_host_frame(&mut reader, max_reply_len).await {
            Ok(Some(HostFrame::Reply(frame))) => frame,
            Ok(Some(HostFrame::Oversized { len, id })) => {
                warn!(len, ?id, "host reply too large, dropped");
                fail_oversized(&pending, len, id);
                continue;
            }
            Ok(None) => {
                info!("native host disconnected");
                break;
            }
            Err(e) => {
                warn!(error = %e, "native host connection failed");
                break;
            }
        };

        let reply: HostReply = match serde_json::from_slice(&frame) {
            Ok(reply) => reply,
            Err(e) => {
                warn!(error = %e, "malformed host reply");
                continue;
            }
        };

        let waiter = lock(&pending)
            .as_mut()
            .and_then(|pending| pending.remove(&reply.id));
        match waiter {
            Some(tx) => {
                let _ = tx.send(reply);
            }
            None => debug!(id = reply.id, "reply without a waiting caller"),
        }
    }

    // Dropping the senders fails every waiting call
    lock(&pending).take();
}

/// Fail the call an oversized reply belonged to. Without an id every
/// waiting call is failed, since any of them may be the one.
fn fail_oversized(pending: &Pending, len: usize, id: Option<u64>) {
    let waiters: Vec<_> = match lock(pending).as_mut() {
        Some(pending) => match id {
            Some(id) => pending.remove_entry(&id).into_iter().collect(),
            None => pending.drain().collect(),
        },
        None => return,
    };
    for (id, tx) in waiters {
        let _ = tx.send(HostReply {
            id,
            result: Value::Null,
            error: Some(format!("reply too large: {len} bytes")),
        });
    }
}

#[async_trait]
impl NativeBridge for HostClient {
    async fn start_key_listener(&self) -> Result<(), BridgeError> {
        self.call("start_key_listener", Value::Null).await
    }

    async fn stop_key_listener(&self) -> Result<(), BridgeError> {
        self.call("stop_key_listener", Value::Null).await
    }

    async fn accessibility_permission(&self) -> Result<bool, BridgeError> {
        self.call("get_accessibility_permission", Value::Null).await
    }

    async fn start_recording(
        &self,
        preferred_microphone: Option<&str>,
    ) -> Result<StartRecordingResponse, BridgeError> {
        self.call(
            "start_recording",
            json!({ "preferredMicrophone": preferred_microphone }),
        )
        .await
    }

    async fn stop_recording(&self) -> Result<StopRecordingResponse, BridgeError> {
        self.call("stop_recording", Value::Null).await
    }

    async fn get_accessibility_info(&self) -> Result<Option<TextFieldInfo>, BridgeError> {
        self.call("get_accessibility_info", Value::Null).await
    }

    async fn set_phase(
        &self,
        surface: OverlaySurface,
        phase: OverlayPhase,
    ) -> Result<(), BridgeError> {
        let command = match surface {
            OverlaySurface::Main => "set_phase",
            OverlaySurface::Agent => "set_agent_phase",
        };
        self.call(command, json!({ "phase": phase })).await
    }

    async fn set_agent_window(&self, state: Option<AgentWindowState>) -> Result<(), BridgeError> {
        self.call("set_agent_window", json!({ "state": state })).await
    }

    async fn paste(&self, text: &str, keybind: Option<&str>) -> Result<(), BridgeError> {
        self.call("paste", json!({ "text": text, "keybind": keybind }))
            .await
    }

    async fn play_chime(&self, chime: Chime) -> Result<(), BridgeError> {
        self.call("play_chime", json!({ "chime": chime })).await
    }

    async fn show_toast(&self, toast: Toast) -> Result<(), BridgeError> {
        self.call("show_toast", serde_json::to_value(toast)?).await
    }

    async fn current_app(&self) -> Result<Option<AppTarget>, BridgeError> {
        self.call("current_app", Value::Null).await
    }
}

#[async_trait]
impl Transcriber for HostClient {
    async fn transcribe(
        &self,
        request: TranscribeRequest<'_>,
    ) -> Result<TranscriberOutput, BridgeError> {
        let args = serde_json::to_value(&request)?;
        self.call("transcribe", args).await
    }
}

#[async_trait]
impl TextGenerator for HostClient {
    async fn generate_text(
        &self,
        request: GenerateTextRequest,
    ) -> Result<GeneratedText, BridgeError> {
        self.call("generate_text", serde_json::to_value(&request)?)
            .await
    }
}

#[async_trait]
impl AgentBackend for HostClient {
    async fn run(&self, conversation: &[AgentMessage]) -> Result<AgentReply, BridgeError> {
        self.call("run_agent", json!({ "conversation": conversation }))
            .await
    }
}
