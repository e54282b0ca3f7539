//! dictation-daemon: background daemon behind a push-to-talk dictation app
//!
//! The daemon runs next to a native host process and provides:
//! - Hotkey hold tracking with double-tap locking
//! - Recording sessions for dictation and agent conversations
//! - Transcription and post-processing through host-provided models
//! - IPC server for the host and settings UI, with event push
//!
//! Audio capture, overlays, paste and model inference live in the host; the
//! daemon drives them over the host command socket.

mod config;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod native;
mod pipeline;
mod session;
mod strategy;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, PreferenceHandle};
use crate::events::SessionEvent;
use crate::hotkey::{HotkeyDriver, KeyListenerGate};
use crate::ipc::{HostClient, Server, ServerContext};
use crate::lifecycle::ShutdownSignal;
use crate::native::{AgentBackend, NativeBridge, TextGenerator, Transcriber};
use crate::pipeline::history::{JsonlHistory, UsageMeter};
use crate::pipeline::TranscriptionPipeline;
use crate::session::{LoadingTokens, PhaseBoard, SessionController};
use crate::strategy::StrategyContext;

/// Upper bound on the startup permission query
const PERMISSION_TIMEOUT: Duration = Duration::from_secs(3);

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "dictation-daemon starting");

    let config = Config::load()?;
    config.ensure_dirs()?;
    info!(?config.socket_path, ?config.host_socket_path, "configuration loaded");

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    let prefs = PreferenceHandle::new(config.load_preferences()?);
    let host = Arc::new(
        HostClient::connect(&config.host_socket_path)
            .await
            .context("failed to connect to native host")?,
    );

    let (event_tx, _) = broadcast::channel::<SessionEvent>(256);
    let pipeline = TranscriptionPipeline::new(
        Some(host.clone() as Arc<dyn Transcriber>),
        Some(host.clone() as Arc<dyn TextGenerator>),
        prefs.clone(),
    );
    let ctx = Arc::new(StrategyContext {
        bridge: host.clone(),
        pipeline: Arc::new(pipeline),
        agent: Some(host.clone() as Arc<dyn AgentBackend>),
        history: Arc::new(JsonlHistory::new(&config.history_path)),
        tokens: LoadingTokens::new(),
        phases: Arc::new(PhaseBoard::new(event_tx.clone())),
        prefs: prefs.clone(),
        usage: UsageMeter::default(),
        events: event_tx.clone(),
    });
    let controller = SessionController::new(ctx);

    // Host snapshots and the local listener -> hotkey driver -> controller
    let (hotkey_tx, hotkey_rx) = mpsc::channel(64);
    let driver = HotkeyDriver::new(&prefs.snapshot().hotkeys, controller.clone(), hotkey_rx);
    tokio::spawn(driver.run());

    #[cfg(target_os = "macos")]
    let local_listener = start_local_listener(&prefs, hotkey_tx.clone());

    let server_ctx = Arc::new(ServerContext::new(
        controller,
        hotkey_tx,
        KeyListenerGate::new(host.clone()),
        prefs,
        config.settings_path.clone(),
        event_tx,
    ));

    // Permission stays unknown until the host reports it
    match timeout(PERMISSION_TIMEOUT, host.accessibility_permission()).await {
        Ok(Ok(granted)) => {
            info!(granted, "accessibility permission");
            server_ctx.apply_permission(granted).await;
        }
        Ok(Err(e)) => warn!(error = %e, "accessibility permission query failed"),
        Err(_) => warn!("accessibility permission query timed out"),
    }

    let server = Server::new(&config.socket_path, server_ctx)?;
    info!("daemon initialized, entering main loop");

    tokio::select! {
        result = server.run() => {
            if let Err(e) = result {
                error!(error = %e, "IPC server error");
            }
        }
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    info!("shutting down...");

    #[cfg(target_os = "macos")]
    {
        if let Some(listener) = local_listener {
            listener.stop();
        }
    }
    if host.is_connected() {
        if let Ok(Err(e)) = timeout(Duration::from_secs(1), host.stop_key_listener()).await {
            warn!(error = %e, "failed to stop host key listener");
        }
    }
    server.shutdown();

    info!("dictation-daemon stopped");

    Ok(())
}

/// Built-in modifier listener for hosts that do not forward key snapshots
#[cfg(target_os = "macos")]
fn start_local_listener(
    prefs: &PreferenceHandle,
    hotkey_tx: mpsc::Sender<crate::hotkey::HotkeyInput>,
) -> Option<crate::hotkey::HotkeyListener> {
    if !prefs.snapshot().local_key_listener {
        return None;
    }

    let listener = crate::hotkey::HotkeyListener::new(hotkey_tx);
    match listener.start() {
        Ok(()) => {
            info!("local hotkey listener started");
            Some(listener)
        }
        Err(e) => {
            error!(error = %e, "failed to start local hotkey listener");
            warn!("continuing with host key snapshots only");
            None
        }
    }
}
