//! Unix domain socket server for IPC
//!
//! Provides request-response communication for the UI and native host, and
//! pushes session events to subscribed clients.

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc, Mutex as AsyncMutex};
use tracing::{debug, error, info, warn};

use super::protocol::{read_frame, write_frame, DaemonStatus, Notification, Request, Response};
use crate::config::{PreferenceHandle, Preferences};
use crate::events::SessionEvent;
use crate::hotkey::{HotkeyInput, KeyListenerGate};
use crate::session::{OverlayPhase, SessionController};

/// Everything a request can touch
pub struct ServerContext {
    controller: SessionController,
    hotkeys: mpsc::Sender<HotkeyInput>,
    gate: AsyncMutex<KeyListenerGate>,
    prefs: PreferenceHandle,
    settings_path: PathBuf,
    events: broadcast::Sender<SessionEvent>,
    levels: Mutex<Vec<f32>>,
    host_phase: Mutex<Option<OverlayPhase>>,
    started: Instant,
}

impl ServerContext {
    pub fn new(
        controller: SessionController,
        hotkeys: mpsc::Sender<HotkeyInput>,
        gate: KeyListenerGate,
        prefs: PreferenceHandle,
        settings_path: PathBuf,
        events: broadcast::Sender<SessionEvent>,
    ) -> Self {
        Self {
            controller,
            hotkeys,
            gate: AsyncMutex::new(gate),
            prefs,
            settings_path,
            events,
            levels: Mutex::new(Vec::new()),
            host_phase: Mutex::new(None),
            started: Instant::now(),
        }
    }

    /// Apply an accessibility permission value to the key listener gate
    pub async fn apply_permission(&self, granted: bool) -> Response {
        match self.gate.lock().await.apply(granted).await {
            Ok(_) => Response::Ok,
            Err(e) => {
                warn!(error = %e, granted, "failed to toggle key listener");
                Response::error("key_listener", e.to_string())
            }
        }
    }

    async fn status(&self) -> DaemonStatus {
        let accessibility_granted = self.gate.lock().await.granted();
        DaemonStatus {
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_secs: self.started.elapsed().as_secs(),
            session: self.controller.status(),
            accessibility_granted,
            host_phase: *self.host_phase.lock().unwrap_or_else(PoisonError::into_inner),
            recording_levels: self
                .levels
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone(),
        }
    }

    async fn forward(&self, input: HotkeyInput) -> Response {
        if self.hotkeys.send(input).await.is_err() {
            warn!("hotkey driver is gone");
            return Response::error("hotkeys_unavailable", "hotkey driver is not running");
        }
        Response::Ok
    }

    fn reload_settings(&self) -> Result<Preferences> {
        let prefs = Preferences::load(&self.settings_path)?;
        self.prefs.replace(prefs.clone());
        Ok(prefs)
    }

    /// Process a request and return a response.
    /// `Subscribe` is answered here; the caller starts the push stream.
    pub async fn process(&self, request: Request) -> Response {
        match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => Response::Status(self.status().await),

            Request::Subscribe => Response::Subscribed,

            Request::KeysHeld { keys } => self.forward(HotkeyInput::KeysHeld(keys)).await,

            Request::FocusLost => self.forward(HotkeyInput::FocusLost).await,

            Request::PermissionChanged { granted } => self.apply_permission(granted).await,

            Request::SetHotkeyCapture { active } => {
                self.controller.set_hotkey_capture(active);
                Response::Ok
            }

            Request::OverlayPhase { phase } => {
                *self.host_phase.lock().unwrap_or_else(PoisonError::into_inner) = Some(phase);
                if phase != OverlayPhase::Recording {
                    self.levels
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner)
                        .clear();
                }
                Response::Ok
            }

            Request::RecordingLevel { levels } => {
                let levels = sanitize_levels(levels);
                *self.levels.lock().unwrap_or_else(PoisonError::into_inner) = levels.clone();
                let _ = self.events.send(SessionEvent::RecordingLevel { levels });
                Response::Ok
            }

            Request::ReloadSettings => match self.reload_settings() {
                Ok(prefs) => {
                    info!(bindings = prefs.hotkeys.len(), "settings reloaded via IPC");
                    self.forward(HotkeyInput::BindingsChanged(prefs.hotkeys)).await
                }
                Err(e) => {
                    warn!(error = %e, "failed to reload settings");
                    Response::error("settings", format!("{e:#}"))
                }
            },

            Request::EndAgentConversation => Response::ConversationEnded {
                ended: self.controller.end_conversation().await,
            },
        }
    }
}

/// Non-finite samples become silence
pub fn sanitize_levels(levels: Vec<f32>) -> Vec<f32> {
    levels
        .into_iter()
        .map(|level| if level.is_finite() { level } else { 0.0 })
        .collect()
}

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: UnixListener,
    ctx: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

impl Server {
    pub fn new(socket_path: &Path, ctx: Arc<ServerContext>) -> Result<Self> {
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);
        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener,
            ctx,
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let ctx = Arc::clone(&self.ctx);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = handle_client(stream, ctx) => {
                                if let Err(e) = result {
                                    warn!(error = %e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }

    /// Gracefully shutdown the server
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(error = %e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Handle a single client connection
async fn handle_client(stream: UnixStream, ctx: Arc<ServerContext>) -> Result<()> {
    let (mut reader, mut writer) = stream.into_split();

    // Frames are read on their own task so a pushed event never interrupts
    // a partially read request.
    let (frame_tx, mut frame_rx) = mpsc::channel(16);
    let reader_task = tokio::spawn(async move {
        loop {
            let frame = read_frame(&mut reader).await;
            let done = !matches!(frame, Ok(Some(_)));
            if frame_tx.send(frame).await.is_err() || done {
                break;
            }
        }
    });

    let mut events: Option<broadcast::Receiver<SessionEvent>> = None;
    let result = loop {
        tokio::select! {
            frame = frame_rx.recv() => {
                let frame = match frame {
                    Some(Ok(Some(frame))) => frame,
                    Some(Ok(None)) | None => {
                        debug!("client disconnected");
                        break Ok(());
                    }
                    Some(Err(e)) => break Err(e.into()),
                };

                let response = match serde_json::from_slice::<Request>(&frame) {
                    Ok(request) => {
                        debug!(?request, "received request");
                        if request == Request::Subscribe && events.is_none() {
                            events = Some(ctx.events.subscribe());
                            debug!("client subscribed to notifications");
                        }
                        ctx.process(request).await
                    }
                    Err(e) => {
                        warn!(error = %e, "malformed request");
                        Response::error("bad_request", e.to_string())
                    }
                };
                if let Err(e) = write_frame(&mut writer, &response).await {
                    break Err(e.into());
                }
            }
            event = next_event(&mut events), if events.is_some() => {
                let Some(event) = event else {
                    events = None;
                    continue;
                };
                let note = Notification::Event { event };
                if let Err(e) = write_frame(&mut writer, &note).await {
                    break Err(e.into());
                }
            }
        }
    };

    reader_task.abort();
    result
}

/// Next event for a subscriber, skipping over lag. `None` once closed.
async fn next_event(events: &mut Option<broadcast::Receiver<SessionEvent>>) -> Option<SessionEvent> {
    let rx = events.as_mut()?;
    loop {
        match rx.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "subscriber lagged, events dropped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}
