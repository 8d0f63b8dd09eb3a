//! Unified event bus — trait for publishing lifecycle and delivery events
//! from any module.
//!
//! Modules accept an `Arc<dyn EventSink>` and emit events toward the
//! control-plane surface (an external collaborator). The core never blocks
//! on a sink.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::{ConnectionStatus, DeliveryStatus};

/// Event published upward by the dispatch core.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelayEvent {
    /// A connection changed state.
    Status {
        connection_id: String,
        new_state: ConnectionStatus,
        reason: String,
        at: DateTime<Utc>,
    },
    /// The protocol capability needs out-of-band authentication.
    Qr {
        connection_id: String,
        payload: String,
    },
    /// Unified delivery-status update, merged with tracked metadata when the
    /// provider message id is known. The id is absent for sends that failed
    /// before the provider assigned one.
    MessageStatus {
        correlation_id: Option<String>,
        provider_message_id: Option<String>,
        status: DeliveryStatus,
        target: Option<String>,
        connection_id: Option<String>,
    },
}

/// Trait for publishing relay events.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: RelayEvent);
}

/// No-op sink for tests and modules that don't need event emission.
pub struct NoOpSink;

impl EventSink for NoOpSink {
    fn emit(&self, _event: RelayEvent) {}
}

/// In-memory sink that captures events for testing.
#[derive(Default)]
pub struct CaptureSink {
    events: Mutex<Vec<RelayEvent>>,
}

impl CaptureSink {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    pub fn events(&self) -> Vec<RelayEvent> {
        self.events.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.events.lock().len()
    }

    /// Status-change events only, as `(connection_id, new_state)` pairs.
    pub fn status_changes(&self) -> Vec<(String, ConnectionStatus)> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                RelayEvent::Status {
                    connection_id,
                    new_state,
                    ..
                } => Some((connection_id.clone(), *new_state)),
                _ => None,
            })
            .collect()
    }

    /// Delivery-status events only.
    pub fn message_statuses(&self) -> Vec<RelayEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| matches!(e, RelayEvent::MessageStatus { .. }))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for CaptureSink {
    fn emit(&self, event: RelayEvent) {
        self.events.lock().push(event);
    }
}

/// Convenience: create a no-op event bus for modules that don't need it.
pub fn noop_sink() -> Arc<dyn EventSink> {
    Arc::new(NoOpSink)
}

/// Convenience: create a capture sink for tests.
pub fn capture_sink() -> Arc<CaptureSink> {
    Arc::new(CaptureSink::new())
}
