//! Delivery-tracking seam — connections report sends and raw provider
//! status updates through this trait; the dispatch layer's tracker
//! correlates them with campaign metadata.

use crate::protocol::RawStatusUpdate;
use crate::types::MessageRecord;

pub trait DeliveryTracker: Send + Sync {
    /// Called once per successful send, before the connection returns to the
    /// dispatcher.
    fn track_send(&self, record: MessageRecord);

    /// Called for each batch of raw delivery-status entries the provider
    /// reports.
    fn on_status_update(&self, connection_id: &str, updates: &[RawStatusUpdate]);
}

/// No-op tracker for connections running without a dispatch layer.
pub struct NoOpTracker;

impl DeliveryTracker for NoOpTracker {
    fn track_send(&self, _record: MessageRecord) {}
    fn on_status_update(&self, _connection_id: &str, _updates: &[RawStatusUpdate]) {}
}
