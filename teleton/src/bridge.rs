//! Bridge: the seam between the agent and the external chat platform.
//!
//! The real platform client lives outside this crate; anything that can
//! deliver [`InboundEvent`]s and accept outbound text implements [`Bridge`].
//! [`InProcessBridge`] is the channel-backed implementation used by the
//! daemon's dev mode and the test suite.

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::{mpsc, Mutex};

use crate::store::now_millis;

#[derive(Debug, Error)]
pub enum BridgeError {
    /// Send attempted while disconnected; retryable from the agent loop.
    #[error("BRIDGE_NOT_CONNECTED")]
    NotConnected,
    #[error("bridge connect failed: {0}")]
    Connect(String),
    #[error("bridge send failed: {0}")]
    Send(String),
}

/// One inbound chat event, normalised by the platform adapter.
#[derive(Clone, Debug)]
pub struct InboundEvent {
    pub chat_id: i64,
    pub sender_id: String,
    pub sender_name: String,
    pub text: String,
    pub is_group: bool,
    pub is_admin: bool,
    /// Unix millis at receipt.
    pub timestamp: i64,
}

impl InboundEvent {
    pub fn dm(chat_id: i64, sender_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            chat_id,
            sender_id: sender_id.into(),
            sender_name: String::new(),
            text: text.into(),
            is_group: false,
            is_admin: false,
            timestamp: now_millis(),
        }
    }
}

/// Strict async contract with the chat platform.
#[async_trait]
pub trait Bridge: Send + Sync {
    /// Connects and starts delivering inbound events on `events`. The
    /// supervisor applies a 30 s deadline around this call.
    async fn connect(&self, events: mpsc::Sender<InboundEvent>) -> Result<(), BridgeError>;

    /// Graceful disconnect; further sends fail with
    /// [`BridgeError::NotConnected`].
    async fn disconnect(&self) -> Result<(), BridgeError>;

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), BridgeError>;
}

/// Channel-backed bridge: inbound events are injected by the caller, outbound
/// messages are collected on an mpsc the caller drains.
pub struct InProcessBridge {
    inbound: Mutex<Option<mpsc::Sender<InboundEvent>>>,
    outbound: mpsc::Sender<(i64, String)>,
}

impl InProcessBridge {
    /// Returns the bridge and the receiver for outbound `(chat_id, text)`
    /// pairs.
    pub fn new() -> (Self, mpsc::Receiver<(i64, String)>) {
        let (outbound, rx) = mpsc::channel(64);
        (
            Self {
                inbound: Mutex::new(None),
                outbound,
            },
            rx,
        )
    }

    /// Injects an inbound event, as if the platform delivered it.
    pub async fn deliver(&self, event: InboundEvent) -> Result<(), BridgeError> {
        let guard = self.inbound.lock().await;
        match guard.as_ref() {
            Some(tx) => tx
                .send(event)
                .await
                .map_err(|e| BridgeError::Send(e.to_string())),
            None => Err(BridgeError::NotConnected),
        }
    }
}

#[async_trait]
impl Bridge for InProcessBridge {
    async fn connect(&self, events: mpsc::Sender<InboundEvent>) -> Result<(), BridgeError> {
        *self.inbound.lock().await = Some(events);
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), BridgeError> {
        *self.inbound.lock().await = None;
        Ok(())
    }

    async fn send_message(&self, chat_id: i64, text: &str) -> Result<(), BridgeError> {
        if self.inbound.lock().await.is_none() {
            return Err(BridgeError::NotConnected);
        }
        self.outbound
            .send((chat_id, text.to_string()))
            .await
            .map_err(|e| BridgeError::Send(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_before_connect_is_not_connected() {
        let (bridge, _rx) = InProcessBridge::new();
        let err = bridge.send_message(1, "hi").await.unwrap_err();
        assert!(matches!(err, BridgeError::NotConnected));
    }

    #[tokio::test]
    async fn deliver_and_send_round_trip() {
        let (bridge, mut out_rx) = InProcessBridge::new();
        let (tx, mut rx) = mpsc::channel(8);
        bridge.connect(tx).await.unwrap();

        bridge.deliver(InboundEvent::dm(7, "u", "hello")).await.unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.chat_id, 7);
        assert_eq!(event.text, "hello");

        bridge.send_message(7, "hi back").await.unwrap();
        assert_eq!(out_rx.recv().await.unwrap(), (7, "hi back".into()));

        bridge.disconnect().await.unwrap();
        assert!(matches!(
            bridge.send_message(7, "x").await.unwrap_err(),
            BridgeError::NotConnected
        ));
    }
}
