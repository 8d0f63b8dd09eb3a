use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single messaging-network account ("chip").
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Init,
    Authenticating,
    Connected,
    Ready,
    Idle,
    Sending,
    Cooldown,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    /// States in which a connection may accept a new outbound message.
    pub fn can_send(&self) -> bool {
        matches!(self, ConnectionStatus::Ready | ConnectionStatus::Idle)
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ConnectionStatus::Init => "init",
            ConnectionStatus::Authenticating => "authenticating",
            ConnectionStatus::Connected => "connected",
            ConnectionStatus::Ready => "ready",
            ConnectionStatus::Idle => "idle",
            ConnectionStatus::Sending => "sending",
            ConnectionStatus::Cooldown => "cooldown",
            ConnectionStatus::Disconnected => "disconnected",
            ConnectionStatus::Error => "error",
        };
        f.write_str(s)
    }
}

/// Delivery progression reported by the provider. Ordered: a later variant
/// supersedes an earlier one for the same message. `Failed` is terminal.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Sent,
    Delivered,
    Read,
    Played,
    Failed,
}

impl DeliveryStatus {
    /// Maps a raw provider ack code into the unified vocabulary.
    pub fn from_raw_code(code: i32) -> Option<Self> {
        match code {
            1 => Some(DeliveryStatus::Sent),
            2 => Some(DeliveryStatus::Delivered),
            3 => Some(DeliveryStatus::Read),
            4 => Some(DeliveryStatus::Played),
            _ => None,
        }
    }
}

/// Composite key joining a campaign, a contact, and a client-side message id.
/// Reconciles asynchronous delivery events with the originating dispatch.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Correlation {
    pub campaign_id: String,
    pub contact_id: String,
    pub client_message_id: String,
}

impl Correlation {
    pub fn key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.campaign_id, self.contact_id, self.client_message_id
        )
    }
}

/// One outbound message as handed to the dispatcher. Text rendering and
/// variant selection happen upstream; `text` is final.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub target: String,
    pub text: String,
    pub correlation: Option<Correlation>,
    /// Per-call override of the message-spacing bounds, ms.
    pub delay_override: Option<DelayOverride>,
    #[serde(default)]
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct DelayOverride {
    pub min_delay_ms: Option<u64>,
    pub max_delay_ms: Option<u64>,
}

/// Acceptance level returned to the dispatcher's caller.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DispatchStatus {
    /// Accepted by the protocol layer; delivery not yet confirmed.
    ServerAck,
    /// Dry run: delays computed, nothing sent.
    DryRun,
}

/// Result of a completed dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchReceipt {
    pub status: DispatchStatus,
    pub connection_id: Option<String>,
    pub provider_message_id: Option<String>,
    pub remote_id: Option<String>,
    pub typing_delay_ms: u64,
    pub post_send_delay_ms: u64,
}

/// Tracked lifetime of one sent message. Created once per send, updated in
/// place by later status events, never deleted for the life of the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageRecord {
    pub correlation: Option<Correlation>,
    pub provider_message_id: String,
    pub target: String,
    pub connection_id: String,
    pub status: DeliveryStatus,
    pub sent_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
