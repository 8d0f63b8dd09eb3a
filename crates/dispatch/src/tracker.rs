//! Message tracker — joins provider message ids to campaign correlation
//! data and republishes unified delivery-status events.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};

use relay_core::event_bus::{EventSink, RelayEvent};
use relay_core::protocol::RawStatusUpdate;
use relay_core::tracking::DeliveryTracker;
use relay_core::types::{DeliveryStatus, MessageRecord};

/// Correlates provider-level message identifiers with campaign-level
/// correlation data. Records live for the life of the process.
pub struct MessageTracker {
    records: DashMap<String, MessageRecord>,
    event_sink: Arc<dyn EventSink>,
}

impl MessageTracker {
    pub fn new(event_sink: Arc<dyn EventSink>) -> Self {
        Self {
            records: DashMap::new(),
            event_sink,
        }
    }

    pub fn record(&self, provider_message_id: &str) -> Option<MessageRecord> {
        self.records.get(provider_message_id).map(|r| r.clone())
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

impl DeliveryTracker for MessageTracker {
    fn track_send(&self, record: MessageRecord) {
        debug!(
            provider_message_id = %record.provider_message_id,
            connection = %record.connection_id,
            "Tracking sent message"
        );
        // Created once per send; a duplicate id keeps the original record.
        self.records
            .entry(record.provider_message_id.clone())
            .or_insert(record);
    }

    fn on_status_update(&self, connection_id: &str, updates: &[RawStatusUpdate]) {
        for update in updates {
            let Some(status) = DeliveryStatus::from_raw_code(update.raw_status_code) else {
                warn!(
                    connection = %connection_id,
                    provider_message_id = %update.provider_message_id,
                    raw = update.raw_status_code,
                    "Unknown provider status code"
                );
                continue;
            };

            match self.records.get_mut(&update.provider_message_id) {
                Some(mut record) => {
                    // The vocabulary is ordered; never regress a message.
                    if status > record.status {
                        record.status = status;
                        record.updated_at = Utc::now();
                    }
                    self.event_sink.emit(RelayEvent::MessageStatus {
                        correlation_id: record.correlation.as_ref().map(|c| c.key()),
                        provider_message_id: Some(record.provider_message_id.clone()),
                        status,
                        target: Some(record.target.clone()),
                        connection_id: Some(record.connection_id.clone()),
                    });
                }
                None => {
                    // Not ours, still worth forwarding with what we have.
                    self.event_sink.emit(RelayEvent::MessageStatus {
                        correlation_id: None,
                        provider_message_id: Some(update.provider_message_id.clone()),
                        status,
                        target: None,
                        connection_id: Some(connection_id.to_string()),
                    });
                }
            }
        }
    }
}
