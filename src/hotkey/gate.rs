//! Key listener gating on the accessibility permission

use std::sync::Arc;

use tracing::info;

use crate::native::{BridgeError, NativeBridge};

/// Starts or stops the host key listener when the permission flips
pub struct KeyListenerGate {
    bridge: Arc<dyn NativeBridge>,
    granted: Option<bool>,
}

impl KeyListenerGate {
    pub fn new(bridge: Arc<dyn NativeBridge>) -> Self {
        Self {
            bridge,
            granted: None,
        }
    }

    /// Last applied permission; `None` until known
    pub fn granted(&self) -> Option<bool> {
        self.granted
    }

    /// Apply a permission value. Returns `true` when a listener command was sent.
    pub async fn apply(&mut self, granted: bool) -> Result<bool, BridgeError> {
        if self.granted == Some(granted) {
            return Ok(false);
        }

        if granted {
            self.bridge.start_key_listener().await?;
            info!("key listener started");
        } else {
            self.bridge.stop_key_listener().await?;
            info!("key listener stopped, accessibility permission missing");
        }
        self.granted = Some(granted);
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::native::mock::{BridgeCall, MockBridge};

    #[tokio::test]
    async fn test_commands_only_on_change() {
        let bridge = MockBridge::new();
        let mut gate = KeyListenerGate::new(bridge.clone());
        assert_eq!(gate.granted(), None);

        assert!(gate.apply(true).await.unwrap());
        assert!(!gate.apply(true).await.unwrap());
        assert!(gate.apply(false).await.unwrap());
        assert!(!gate.apply(false).await.unwrap());

        assert_eq!(
            bridge.calls(),
            vec![BridgeCall::StartKeyListener, BridgeCall::StopKeyListener]
        );
        assert_eq!(gate.granted(), Some(false));
    }

    #[tokio::test]
    async fn test_first_denial_still_stops_listener() {
        let bridge = MockBridge::new();
        let mut gate = KeyListenerGate::new(bridge.clone());

        assert!(gate.apply(false).await.unwrap());
        assert_eq!(bridge.calls(), vec![BridgeCall::StopKeyListener]);
    }
}
