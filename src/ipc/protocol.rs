//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.
//! The daemon serves `Request`/`Response` to UI and host clients and pushes
//! `Notification`s to subscribers. Calls to the native host use
//! `HostRequest`/`HostReply` on a second socket with the same framing.

use std::io;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::events::SessionEvent;
use crate::session::{ControllerStatus, OverlayPhase};

/// Frames larger than this are rejected
pub const MAX_MESSAGE_LEN: usize = 1024 * 1024;

/// Cap for host replies, which carry whole recordings as JSON samples
pub const MAX_HOST_REPLY_LEN: usize = 256 * 1024 * 1024;

/// Bytes kept from an oversized reply to recover its id
const REPLY_HEAD_LEN: usize = 64;

/// Requests from UI/host clients to the daemon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Subscribe to session event notifications
    Subscribe,

    /// Full snapshot of the keys held now
    KeysHeld { keys: Vec<String> },

    /// The host window lost focus
    FocusLost,

    /// Accessibility permission changed
    PermissionChanged { granted: bool },

    /// The settings UI started or stopped capturing a new hotkey
    SetHotkeyCapture { active: bool },

    /// Phase the host overlay is showing
    OverlayPhase { phase: OverlayPhase },

    /// Input levels from the capture engine
    RecordingLevel { levels: Vec<f32> },

    /// Re-read settings from disk
    ReloadSettings,

    /// Close an idle agent conversation
    EndAgentConversation,
}

/// Responses from daemon to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    /// Subscription confirmed
    Subscribed,

    /// Request applied
    Ok,

    /// Reply to `end_agent_conversation`
    ConversationEnded { ended: bool },

    /// Error response
    Error { code: String, message: String },
}

impl Response {
    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Response::Error {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Push notification to subscribed clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: SessionEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    /// Uptime in seconds
    pub uptime_secs: u64,

    pub session: ControllerStatus,

    /// `None` until the host reports it
    pub accessibility_granted: Option<bool>,

    /// Last phase the host overlay reported
    pub host_phase: Option<OverlayPhase>,

    pub recording_levels: Vec<f32>,
}

/// Command sent to the native host
#[derive(Debug, Clone, Serialize)]
pub struct HostRequest<'a> {
    pub id: u64,
    pub command: &'a str,
    pub args: serde_json::Value,
}

/// Host reply, matched to its request by `id`. The host writes `id` first.
#[derive(Debug, Clone, Deserialize)]
pub struct HostReply {
    pub id: u64,
    #[serde(default)]
    pub result: serde_json::Value,
    #[serde(default)]
    pub error: Option<String>,
}

/// Read one length-prefixed frame. `Ok(None)` on a clean disconnect.
pub async fn read_frame<R>(reader: &mut R) -> io::Result<Option<Vec<u8>>>
where
    R: AsyncRead + Unpin,
{
    let Some(len) = read_len(reader).await? else {
        return Ok(None);
    };
    if len > MAX_MESSAGE_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("message too large: {len} bytes"),
        ));
    }

    let mut msg_buf = vec![0u8; len];
    reader.read_exact(&mut msg_buf).await?;
    Ok(Some(msg_buf))
}

/// One frame from the host socket
#[derive(Debug, PartialEq, Eq)]
pub enum HostFrame {
    Reply(Vec<u8>),
    /// Body over the cap, already skipped. `id` is recovered from its head.
    Oversized { len: usize, id: Option<u64> },
}

/// Read one host frame. An oversized body is drained so the stream stays
/// in sync and only that reply is lost.
pub async fn read_host_frame<R>(reader: &mut R, max_len: usize) -> io::Result<Option<HostFrame>>
where
    R: AsyncRead + Unpin,
{
    let Some(len) = read_len(reader).await? else {
        return Ok(None);
    };
    if len <= max_len {
        let mut msg_buf = vec![0u8; len];
        reader.read_exact(&mut msg_buf).await?;
        return Ok(Some(HostFrame::Reply(msg_buf)));
    }

    let mut head = vec![0u8; len.min(REPLY_HEAD_LEN)];
    reader.read_exact(&mut head).await?;
    let rest = (len - head.len()) as u64;
    let skipped = tokio::io::copy(&mut (&mut *reader).take(rest), &mut tokio::io::sink()).await?;
    if skipped < rest {
        return Err(io::ErrorKind::UnexpectedEof.into());
    }
    Ok(Some(HostFrame::Oversized {
        len,
        id: leading_reply_id(&head),
    }))
}

async fn read_len<R>(reader: &mut R) -> io::Result<Option<usize>>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => Ok(Some(u32::from_le_bytes(len_buf) as usize)),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
        Err(e) => Err(e),
    }
}

/// `7` from `{"id":7,...`
fn leading_reply_id(head: &[u8]) -> Option<u64> {
    let text = String::from_utf8_lossy(head);
    let rest = text.trim_start().strip_prefix('{')?.trim_start();
    let rest = rest.strip_prefix("\"id\"")?.trim_start();
    let rest = rest.strip_prefix(':')?.trim_start();
    let end = rest
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(rest.len());
    rest[..end].parse().ok()
}

/// Send a length-prefixed JSON message
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let msg_bytes = serde_json::to_vec(msg)?;
    let msg_len = u32::try_from(msg_bytes.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "message too large"))?
        .to_le_bytes();

    writer.write_all(&msg_len).await?;
    writer.write_all(&msg_bytes).await?;
    writer.flush().await
}
