//! Scripted protocol capability for exercising connection lifecycles
//! without a real network.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use relay_core::error::{RelayError, RelayResult};
use relay_core::protocol::{
    NumberCheck, ProtocolCapability, ProtocolEvent, SendReceipt,
};

pub struct ScriptedCapability {
    pub target_exists: AtomicBool,
    pub fail_send: AtomicBool,
    pub fail_initialize: AtomicBool,
    pub logged_out: AtomicBool,
    pub sent: Mutex<Vec<(String, String)>>,
    pub initialize_calls: Mutex<u32>,
    events_tx: mpsc::UnboundedSender<ProtocolEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ProtocolEvent>>>,
}

impl ScriptedCapability {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            target_exists: AtomicBool::new(true),
            fail_send: AtomicBool::new(false),
            fail_initialize: AtomicBool::new(false),
            logged_out: AtomicBool::new(false),
            sent: Mutex::new(Vec::new()),
            initialize_calls: Mutex::new(0),
            events_tx: tx,
            events_rx: Mutex::new(Some(rx)),
        }
    }

    /// Sender half of the event stream, for injecting capability events.
    pub fn event_sender(&self) -> mpsc::UnboundedSender<ProtocolEvent> {
        self.events_tx.clone()
    }

    pub fn send_count(&self) -> usize {
        self.sent.lock().len()
    }
}

impl Default for ScriptedCapability {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProtocolCapability for ScriptedCapability {
    async fn initialize(&self) -> RelayResult<()> {
        *self.initialize_calls.lock() += 1;
        if self.fail_initialize.load(Ordering::SeqCst) {
            return Err(RelayError::Protocol("scripted initialize failure".into()));
        }
        Ok(())
    }

    async fn validate_number(&self, address: &str) -> RelayResult<NumberCheck> {
        Ok(NumberCheck {
            resolved_id: format!("{address}@test"),
            exists: self.target_exists.load(Ordering::SeqCst),
        })
    }

    async fn send(&self, resolved_id: &str, text: &str) -> RelayResult<SendReceipt> {
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(RelayError::Protocol("scripted send failure".into()));
        }
        self.sent
            .lock()
            .push((resolved_id.to_string(), text.to_string()));
        Ok(SendReceipt {
            provider_message_id: Uuid::new_v4().to_string(),
            remote_id: resolved_id.to_string(),
        })
    }

    async fn phone_number(&self) -> Option<String> {
        Some("5511999990000".into())
    }

    async fn display_name(&self) -> Option<String> {
        Some("scripted".into())
    }

    async fn destroy(&self) -> RelayResult<()> {
        Ok(())
    }

    async fn is_logged_out(&self) -> bool {
        self.logged_out.load(Ordering::SeqCst)
    }

    fn take_event_stream(&self) -> Option<mpsc::UnboundedReceiver<ProtocolEvent>> {
        self.events_rx.lock().take()
    }
}
