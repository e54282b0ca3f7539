//! Local modifier listener using macOS CGEventTap
//!
//! Used when the host does not forward `keys_held` events. Watches
//! modifier flag changes on a dedicated thread with its own CFRunLoop and
//! feeds full snapshots to the hotkey driver.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use core_foundation::runloop::{kCFRunLoopCommonModes, kCFRunLoopDefaultMode, CFRunLoop};
use core_graphics::event::{
    CGEvent, CGEventFlags, CGEventTap, CGEventTapLocation, CGEventTapOptions,
    CGEventTapPlacement, CGEventTapProxy, CGEventType,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use super::driver::HotkeyInput;
use super::keys::ModifierState;

/// Global listener that turns modifier changes into key snapshots
pub struct HotkeyListener {
    input_tx: mpsc::Sender<HotkeyInput>,
    running: Arc<AtomicBool>,
}

impl HotkeyListener {
    pub fn new(input_tx: mpsc::Sender<HotkeyInput>) -> Self {
        Self {
            input_tx,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Spawn the listener thread
    pub fn start(&self) -> Result<(), HotkeyError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(HotkeyError::AlreadyRunning);
        }

        let input_tx = self.input_tx.clone();
        let running = Arc::clone(&self.running);

        thread::Builder::new()
            .name("hotkey-listener".to_string())
            .spawn(move || {
                info!("hotkey listener thread started");
                if let Err(e) = run_event_loop(input_tx, running.clone()) {
                    error!(error = %e, "hotkey listener error");
                }
                running.store(false, Ordering::SeqCst);
                info!("hotkey listener thread stopped");
            })
            .map_err(|e| HotkeyError::ThreadSpawn(e.to_string()))?;

        Ok(())
    }

    /// The run loop exits on its next tick
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum HotkeyError {
    #[error("hotkey listener is already running")]
    AlreadyRunning,

    #[error("failed to create event tap - check Accessibility permissions")]
    EventTapCreation,

    #[error("failed to spawn listener thread: {0}")]
    ThreadSpawn(String),
}

fn run_event_loop(
    input_tx: mpsc::Sender<HotkeyInput>,
    running: Arc<AtomicBool>,
) -> Result<(), HotkeyError> {
    let mut last_state = ModifierState::default();
    let (callback_tx, callback_rx) = std::sync::mpsc::channel::<CGEventFlags>();

    // Must stay fast and non-blocking
    let callback = move |_proxy: CGEventTapProxy,
                         event_type: CGEventType,
                         event: &CGEvent|
          -> Option<CGEvent> {
        match event_type {
            CGEventType::FlagsChanged => {
                let _ = callback_tx.send(event.get_flags());
            }
            CGEventType::TapDisabledByTimeout | CGEventType::TapDisabledByUserInput => {
                warn!("event tap disabled");
            }
            _ => {}
        }
        Some(event.clone())
    };

    let tap = CGEventTap::new(
        CGEventTapLocation::Session,
        CGEventTapPlacement::HeadInsertEventTap,
        CGEventTapOptions::ListenOnly,
        vec![CGEventType::FlagsChanged],
        callback,
    )
    .map_err(|_| HotkeyError::EventTapCreation)?;
    tap.enable();

    let source = tap
        .mach_port
        .create_runloop_source(0)
        .map_err(|_| HotkeyError::EventTapCreation)?;
    let run_loop = CFRunLoop::get_current();
    unsafe {
        run_loop.add_source(&source, kCFRunLoopCommonModes);
    }
    info!("event tap created and enabled");

    while running.load(Ordering::SeqCst) {
        unsafe {
            CFRunLoop::run_in_mode(kCFRunLoopDefaultMode, Duration::from_millis(100), true);
        }

        while let Ok(flags) = callback_rx.try_recv() {
            let state = ModifierState::from_flags(flags);
            if state == last_state {
                continue;
            }
            debug!(?last_state, ?state, "modifier state changed");

            if input_tx
                .blocking_send(HotkeyInput::KeysHeld(state.held_keys()))
                .is_err()
            {
                warn!("hotkey driver gone, stopping listener");
                return Ok(());
            }
            last_state = state;
        }
    }

    Ok(())
}
