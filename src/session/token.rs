//! Loading tokens guard phase resets against stale completions.
//!
//! A token is minted when a stop begins. Only the holder of the current
//! token may move the overlay out of `loading`; minting a newer token or
//! starting a new recording invalidates every older one.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// Opaque per-stop-cycle marker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LoadingToken(u64);

impl fmt::Display for LoadingToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "loading-{}", self.0)
    }
}

#[derive(Debug, Default)]
struct Slot {
    current: Option<LoadingToken>,
    minted: u64,
}

/// The single authority over which loading token is live
#[derive(Debug, Clone, Default)]
pub struct LoadingTokens {
    slot: Arc<Mutex<Slot>>,
}

impl LoadingTokens {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a fresh token and make it current
    pub fn mint(&self) -> LoadingToken {
        let mut slot = self.lock();
        slot.minted += 1;
        let token = LoadingToken(slot.minted);
        slot.current = Some(token);
        token
    }

    #[cfg(test)]
    pub fn is_current(&self, token: LoadingToken) -> bool {
        self.lock().current == Some(token)
    }

    /// Clear `token` if it is still current. Returns `true` when the caller
    /// may proceed with the guarded phase update.
    pub fn release(&self, token: LoadingToken) -> bool {
        let mut slot = self.lock();
        if slot.current == Some(token) {
            slot.current = None;
            true
        } else {
            false
        }
    }

    /// Invalidate any outstanding token
    pub fn reset(&self) {
        self.lock().current = None;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Slot> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
