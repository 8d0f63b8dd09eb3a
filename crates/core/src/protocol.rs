//! Protocol capability — the seam between the dispatch core and the
//! wire-level messaging library.
//!
//! The core consumes this fixed operation set only; one concrete adapter
//! exists per underlying network library, and tests substitute a scripted
//! implementation. Events raised by the capability are drained through a
//! single channel consumed exclusively by the owning connection's task.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::info;
use uuid::Uuid;

use crate::error::RelayResult;

/// Result of resolving a target address on the network.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NumberCheck {
    pub resolved_id: String,
    pub exists: bool,
}

/// Provider identifiers returned by a successful send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendReceipt {
    pub provider_message_id: String,
    pub remote_id: String,
}

/// Connection-level phase reported by the capability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Open,
    Close,
}

/// Asynchronous event raised by the capability.
#[derive(Debug, Clone)]
pub enum ProtocolEvent {
    Qr(String),
    CredentialsUpdated,
    ConnectionUpdate {
        phase: ConnectionPhase,
        close_reason_code: Option<i32>,
    },
    MessageStatusUpdate(Vec<RawStatusUpdate>),
}

/// One raw delivery-status entry as the provider reports it.
#[derive(Debug, Clone)]
pub struct RawStatusUpdate {
    pub provider_message_id: String,
    pub raw_status_code: i32,
}

/// Fixed operation set the core consumes from the messaging network.
#[async_trait]
pub trait ProtocolCapability: Send + Sync {
    async fn initialize(&self) -> RelayResult<()>;

    /// Resolves `address` on the network; `exists == false` means the target
    /// cannot receive messages.
    async fn validate_number(&self, address: &str) -> RelayResult<NumberCheck>;

    async fn send(&self, resolved_id: &str, text: &str) -> RelayResult<SendReceipt>;

    async fn phone_number(&self) -> Option<String>;

    async fn display_name(&self) -> Option<String>;

    async fn destroy(&self) -> RelayResult<()>;

    /// True when the session was invalidated remotely; reconnecting is
    /// pointless until an operator re-authenticates.
    async fn is_logged_out(&self) -> bool;

    /// Hands over the capability's event stream. Callable once; the owning
    /// connection drains it from a single task.
    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<ProtocolEvent>>;
}

/// In-process capability that logs sends instead of hitting a real network.
/// Used by the binary for bring-up and by integration-style tests.
pub struct LoggingCapability {
    account_id: String,
    phone: String,
    events_tx: mpsc::UnboundedSender<ProtocolEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ProtocolEvent>>>,
}

impl LoggingCapability {
    pub fn new(account_id: impl Into<String>, phone: impl Into<String>) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            account_id: account_id.into(),
            phone: phone.into(),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        }
    }

    /// Sender half of the event stream, for wiring external callbacks.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ProtocolEvent> {
        self.events_tx.clone()
    }
}

#[async_trait]
impl ProtocolCapability for LoggingCapability {
    async fn initialize(&self) -> RelayResult<()> {
        info!(account = %self.account_id, "Initializing protocol session");
        let _ = self.events_tx.send(ProtocolEvent::ConnectionUpdate {
            phase: ConnectionPhase::Open,
            close_reason_code: None,
        });
        Ok(())
    }

    async fn validate_number(&self, address: &str) -> RelayResult<NumberCheck> {
        Ok(NumberCheck {
            resolved_id: format!("{address}@network"),
            exists: true,
        })
    }

    async fn send(&self, resolved_id: &str, text: &str) -> RelayResult<SendReceipt> {
        info!(
            account = %self.account_id,
            to = resolved_id,
            text_len = text.len(),
            "Sending text message"
        );
        Ok(SendReceipt {
            provider_message_id: Uuid::new_v4().to_string(),
            remote_id: resolved_id.to_string(),
        })
    }

    async fn phone_number(&self) -> Option<String> {
        Some(self.phone.clone())
    }

    async fn display_name(&self) -> Option<String> {
        Some(self.account_id.clone())
    }

    async fn destroy(&self) -> RelayResult<()> {
        info!(account = %self.account_id, "Destroying protocol session");
        Ok(())
    }

    async fn is_logged_out(&self) -> bool {
        false
    }

    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<ProtocolEvent>> {
        self.events_rx.lock().take()
    }
}
