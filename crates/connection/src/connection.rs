//! Per-account connection — a finite-state machine wrapping one protocol
//! capability, with its own send history, cooldown timer, and reconnect
//! counter.
//!
//! Single-writer discipline: every mutation of connection state goes
//! through the per-connection async mutex, and all capability callbacks are
//! drained from one channel by the connection's own event task. Status
//! polling reads a snapshot cell updated under the same mutex, so pollers
//! never observe a torn state.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use relay_compliance::ComplianceEngine;
use relay_core::config::ConnectionConfig;
use relay_core::error::{RelayError, RelayResult};
use relay_core::event_bus::{EventSink, RelayEvent};
use relay_core::protocol::{ConnectionPhase, ProtocolCapability, ProtocolEvent, SendReceipt};
use relay_core::tracking::DeliveryTracker;
use relay_core::types::{ConnectionStatus, Correlation, DeliveryStatus, MessageRecord};

use crate::state;

/// Read-only view of a connection for display and selection.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub id: String,
    pub status: ConnectionStatus,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub reconnect_attempts: u32,
    pub sends_last_24h: usize,
    pub phone_number: Option<String>,
    pub display_name: Option<String>,
}

/// Metadata recorded for one send, keyed by provider message id.
#[derive(Debug, Clone)]
pub struct TrackedSend {
    pub correlation: Option<Correlation>,
    pub target: String,
    pub sent_at: DateTime<Utc>,
}

struct ConnState {
    status: ConnectionStatus,
    cooldown_until: Option<DateTime<Utc>>,
    send_history: Vec<DateTime<Utc>>,
    reconnect_attempts: u32,
    message_index: HashMap<String, TrackedSend>,
    // Bumped on every Ready entry so a stale idle timer fires a no-op.
    idle_generation: u64,
}

struct ConnectionInner {
    id: String,
    capability: Arc<dyn ProtocolCapability>,
    compliance: ComplianceEngine,
    config: ConnectionConfig,
    event_sink: Arc<dyn EventSink>,
    tracker: Arc<dyn DeliveryTracker>,
    state: Mutex<ConnState>,
    status_cell: RwLock<ConnectionStatus>,
}

/// One logical, independently-authenticated link to the messaging network.
/// Cheap to clone; all clones share the same underlying account state.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("status", &self.current_status())
            .finish()
    }
}

impl Connection {
    pub fn new(
        id: impl Into<String>,
        capability: Arc<dyn ProtocolCapability>,
        compliance: ComplianceEngine,
        config: ConnectionConfig,
        event_sink: Arc<dyn EventSink>,
        tracker: Arc<dyn DeliveryTracker>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                id: id.into(),
                capability,
                compliance,
                config,
                event_sink,
                tracker,
                state: Mutex::new(ConnState {
                    status: ConnectionStatus::Init,
                    cooldown_until: None,
                    send_history: Vec::new(),
                    reconnect_attempts: 0,
                    message_index: HashMap::new(),
                    idle_generation: 0,
                }),
                status_cell: RwLock::new(ConnectionStatus::Init),
            }),
        }
    }

    pub fn id(&self) -> &str {
        &self.inner.id
    }

    /// Current status without contending on the state mutex.
    pub fn current_status(&self) -> ConnectionStatus {
        *self.inner.status_cell.read()
    }

    pub async fn info(&self) -> ConnectionInfo {
        let phone_number = self.inner.capability.phone_number().await;
        let display_name = self.inner.capability.display_name().await;
        let mut st = self.inner.state.lock().await;
        // History is otherwise pruned only on send; an idle connection
        // must not overcount stale entries.
        let cutoff = Utc::now() - Duration::hours(24);
        st.send_history.retain(|t| *t > cutoff);
        ConnectionInfo {
            id: self.inner.id.clone(),
            status: st.status,
            cooldown_until: st.cooldown_until,
            reconnect_attempts: st.reconnect_attempts,
            sends_last_24h: st.send_history.len(),
            phone_number,
            display_name,
        }
    }

    pub async fn phone_number(&self) -> Option<String> {
        self.inner.capability.phone_number().await
    }

    pub async fn display_name(&self) -> Option<String> {
        self.inner.capability.display_name().await
    }

    /// Starts the connection: spawns the event task, enters
    /// `Authenticating`, and kicks off protocol initialization.
    pub async fn start(&self) -> RelayResult<()> {
        if let Some(rx) = self.inner.capability.take_event_stream() {
            let conn = self.clone();
            tokio::spawn(async move {
                conn.run_event_loop(rx).await;
            });
        }

        {
            let mut st = self.inner.state.lock().await;
            self.apply_transition(&mut st, ConnectionStatus::Authenticating, "startup");
        }

        if let Err(e) = self.inner.capability.initialize().await {
            let mut st = self.inner.state.lock().await;
            self.apply_transition(&mut st, ConnectionStatus::Error, "initialize failed");
            return Err(e);
        }
        Ok(())
    }

    /// Tears down the protocol session.
    pub async fn destroy(&self) -> RelayResult<()> {
        {
            let mut st = self.inner.state.lock().await;
            self.apply_transition(&mut st, ConnectionStatus::Disconnected, "shutdown");
        }
        self.inner.capability.destroy().await
    }

    /// Blocks until the connection can accept a send, or times out.
    pub async fn wait_until_ready(&self, timeout_ms: u64) -> RelayResult<()> {
        let wait = async {
            loop {
                if self.current_status().can_send() {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), wait)
            .await
            .map_err(|_| RelayError::ReadyTimeout { timeout_ms })
    }

    /// Sends one message through this account.
    ///
    /// Gates, in order: status must be `Ready` (an `Idle` connection is
    /// promoted first), no active cooldown, hourly and daily caps not
    /// reached. The state mutex is held across the protocol call, so the
    /// in-flight send is the single writer for its whole duration.
    pub async fn send_message(
        &self,
        target: &str,
        text: &str,
        correlation: Option<Correlation>,
    ) -> RelayResult<SendReceipt> {
        let mut st = self.inner.state.lock().await;

        if st.status == ConnectionStatus::Idle {
            self.apply_transition(&mut st, ConnectionStatus::Ready, "send requested");
        }
        if st.status != ConnectionStatus::Ready {
            return Err(RelayError::State {
                status: st.status,
                operation: "send_message".into(),
            });
        }

        let now = Utc::now();
        if let Some(until) = st.cooldown_until {
            if until > now {
                return Err(RelayError::CooldownActive { until });
            }
        }

        self.enforce_rate_limits(&mut st, now)?;

        self.apply_transition(&mut st, ConnectionStatus::Sending, "send");

        let check = match self.inner.capability.validate_number(target).await {
            Ok(check) => check,
            Err(e) => {
                self.fail_send(&mut st, target, correlation.as_ref(), "validation failed");
                return Err(e);
            }
        };
        if !check.exists {
            self.fail_send(&mut st, target, correlation.as_ref(), "target invalid");
            return Err(RelayError::TargetInvalid {
                target: target.to_string(),
            });
        }

        let receipt = match self.inner.capability.send(&check.resolved_id, text).await {
            Ok(receipt) => receipt,
            Err(e) => {
                self.fail_send(&mut st, target, correlation.as_ref(), "protocol send failed");
                return Err(e);
            }
        };

        let sent_at = Utc::now();
        st.message_index.insert(
            receipt.provider_message_id.clone(),
            TrackedSend {
                correlation: correlation.clone(),
                target: target.to_string(),
                sent_at,
            },
        );
        st.send_history.push(sent_at);
        self.inner.tracker.track_send(MessageRecord {
            correlation,
            provider_message_id: receipt.provider_message_id.clone(),
            target: target.to_string(),
            connection_id: self.inner.id.clone(),
            status: DeliveryStatus::Sent,
            sent_at,
            updated_at: sent_at,
        });

        self.apply_transition(&mut st, ConnectionStatus::Ready, "send complete");
        Ok(receipt)
    }

    /// Holds the connection in `Cooldown` for at least `duration_ms`.
    ///
    /// An existing later `cooldown_until` is never shortened. On wake the
    /// connection returns to `Ready` only if it is still in `Cooldown`;
    /// a state reached by other means in the meantime wins.
    pub async fn enter_cooldown(&self, duration_ms: u64, reason: &str) -> RelayResult<()> {
        {
            let mut st = self.inner.state.lock().await;
            let proposed = Utc::now() + Duration::milliseconds(duration_ms as i64);
            st.cooldown_until = Some(match st.cooldown_until {
                Some(existing) => existing.max(proposed),
                None => proposed,
            });
            if st.status != ConnectionStatus::Cooldown {
                let status = self.apply_transition(&mut st, ConnectionStatus::Cooldown, reason);
                if status != ConnectionStatus::Cooldown {
                    return Err(RelayError::State {
                        status,
                        operation: "enter_cooldown".into(),
                    });
                }
            }
        }

        tokio::time::sleep(std::time::Duration::from_millis(duration_ms)).await;

        let mut st = self.inner.state.lock().await;
        // A longer overlapping cooldown keeps holding the connection.
        let elapsed = st.cooldown_until.map_or(true, |u| u <= Utc::now());
        if st.status == ConnectionStatus::Cooldown && elapsed {
            self.apply_transition(&mut st, ConnectionStatus::Ready, "cooldown complete");
        }
        Ok(())
    }

    /// Metadata recorded for a provider message id, if this connection
    /// sent it.
    pub async fn lookup_send(&self, provider_message_id: &str) -> Option<TrackedSend> {
        let st = self.inner.state.lock().await;
        st.message_index.get(provider_message_id).cloned()
    }

    // ─── Rate limiting ──────────────────────────────────────────────────

    fn enforce_rate_limits(&self, st: &mut ConnState, now: DateTime<Utc>) -> RelayResult<()> {
        st.send_history.retain(|t| *t > now - Duration::hours(24));

        let hour_ago = now - Duration::hours(1);
        let hourly = st.send_history.iter().filter(|t| **t > hour_ago).count();
        if hourly >= self.inner.compliance.max_per_hour() as usize {
            let oldest = st
                .send_history
                .iter()
                .filter(|t| **t > hour_ago)
                .min()
                .copied()
                .unwrap_or(now);
            return Err(self.rate_limit_cooldown(st, "hourly", oldest + Duration::hours(1)));
        }

        let daily = st.send_history.len();
        if daily >= self.inner.compliance.max_per_day() as usize {
            let oldest = st.send_history.iter().min().copied().unwrap_or(now);
            return Err(self.rate_limit_cooldown(st, "daily", oldest + Duration::hours(24)));
        }
        Ok(())
    }

    /// Sets the jittered resume time, enters `Cooldown`, and schedules the
    /// return to `Ready` once the window rolls.
    fn rate_limit_cooldown(
        &self,
        st: &mut ConnState,
        window: &'static str,
        window_end: DateTime<Utc>,
    ) -> RelayError {
        let jitter = self.inner.compliance.jitter_ms(
            self.inner.config.rate_limit_jitter_min_ms,
            self.inner.config.rate_limit_jitter_max_ms,
        );
        let resume = window_end + Duration::milliseconds(jitter as i64);
        // Conservative: never resume earlier than already scheduled.
        let resume = match st.cooldown_until {
            Some(existing) => existing.max(resume),
            None => resume,
        };
        st.cooldown_until = Some(resume);
        self.apply_transition(
            st,
            ConnectionStatus::Cooldown,
            &format!("{window} rate limit"),
        );

        let conn = self.clone();
        let wait = (resume - Utc::now()).to_std().unwrap_or_default();
        tokio::spawn(async move {
            tokio::time::sleep(wait).await;
            let mut st = conn.inner.state.lock().await;
            let elapsed = st.cooldown_until.map_or(true, |u| u <= Utc::now());
            if st.status == ConnectionStatus::Cooldown && elapsed {
                conn.apply_transition(&mut st, ConnectionStatus::Ready, "rate limit window rolled");
            }
        });

        warn!(
            connection = %self.inner.id,
            window,
            resume = %resume,
            "Rate limit reached, cooling down"
        );
        RelayError::RateLimited {
            window: window.to_string(),
            resume_at: resume,
        }
    }

    // ─── Transitions ────────────────────────────────────────────────────

    /// The single guarded mutation point for `status`. A disallowed target
    /// forces `Error` and surfaces the fault to status observers.
    fn apply_transition(
        &self,
        st: &mut ConnState,
        to: ConnectionStatus,
        reason: &str,
    ) -> ConnectionStatus {
        let from = st.status;
        if state::is_allowed(from, to) {
            st.status = to;
            debug!(connection = %self.inner.id, %from, %to, reason, "State transition");
            self.publish_status(st, reason);
            if to == ConnectionStatus::Ready {
                self.arm_idle_timer(st);
            }
        } else {
            warn!(
                connection = %self.inner.id,
                %from,
                requested = %to,
                "Invalid transition, forcing error state"
            );
            st.status = ConnectionStatus::Error;
            self.publish_status(st, &format!("invalid transition {from} -> {to}"));
        }
        st.status
    }

    fn publish_status(&self, st: &ConnState, reason: &str) {
        *self.inner.status_cell.write() = st.status;
        self.inner.event_sink.emit(RelayEvent::Status {
            connection_id: self.inner.id.clone(),
            new_state: st.status,
            reason: reason.to_string(),
            at: Utc::now(),
        });
    }

    /// Re-arms the inactivity timer. Each Ready entry supersedes the
    /// previous timer via the generation counter: most recent transition
    /// wins, a stale timer is a no-op.
    fn arm_idle_timer(&self, st: &mut ConnState) {
        st.idle_generation = st.idle_generation.wrapping_add(1);
        let generation = st.idle_generation;
        let idle_after = std::time::Duration::from_millis(self.inner.config.idle_timeout_ms);
        let conn = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(idle_after).await;
            let mut st = conn.inner.state.lock().await;
            if st.idle_generation == generation && st.status == ConnectionStatus::Ready {
                conn.apply_transition(&mut st, ConnectionStatus::Idle, "inactivity");
            }
        });
    }

    fn fail_send(
        &self,
        st: &mut ConnState,
        target: &str,
        correlation: Option<&Correlation>,
        reason: &str,
    ) {
        self.apply_transition(st, ConnectionStatus::Error, reason);
        if let Some(correlation) = correlation {
            self.inner.event_sink.emit(RelayEvent::MessageStatus {
                correlation_id: Some(correlation.key()),
                provider_message_id: None,
                status: DeliveryStatus::Failed,
                target: Some(target.to_string()),
                connection_id: Some(self.inner.id.clone()),
            });
        }
    }

    // ─── Capability events ──────────────────────────────────────────────

    async fn run_event_loop(self, mut rx: mpsc::UnboundedReceiver<ProtocolEvent>) {
        while let Some(event) = rx.recv().await {
            match event {
                ProtocolEvent::Qr(payload) => {
                    self.inner.event_sink.emit(RelayEvent::Qr {
                        connection_id: self.inner.id.clone(),
                        payload,
                    });
                }
                ProtocolEvent::CredentialsUpdated => {
                    debug!(connection = %self.inner.id, "Credentials updated");
                }
                ProtocolEvent::ConnectionUpdate {
                    phase: ConnectionPhase::Open,
                    ..
                } => {
                    self.handle_open().await;
                }
                ProtocolEvent::ConnectionUpdate {
                    phase: ConnectionPhase::Close,
                    close_reason_code,
                } => {
                    self.handle_close(close_reason_code).await;
                }
                ProtocolEvent::MessageStatusUpdate(updates) => {
                    self.inner.tracker.on_status_update(&self.inner.id, &updates);
                }
            }
        }
        debug!(connection = %self.inner.id, "Capability event stream closed");
    }

    async fn handle_open(&self) {
        let mut st = self.inner.state.lock().await;
        let status = self.apply_transition(&mut st, ConnectionStatus::Connected, "connection open");
        if status == ConnectionStatus::Connected {
            self.apply_transition(&mut st, ConnectionStatus::Ready, "connection open");
            if st.reconnect_attempts > 0 {
                info!(
                    connection = %self.inner.id,
                    attempts = st.reconnect_attempts,
                    "Reconnected"
                );
            }
            st.reconnect_attempts = 0;
        }
    }

    /// Reconnect policy: a logged-out session is terminal; otherwise retry
    /// after a jittered wait, up to the configured attempt bound.
    async fn handle_close(&self, close_reason_code: Option<i32>) {
        if self.inner.capability.is_logged_out().await {
            let mut st = self.inner.state.lock().await;
            self.apply_transition(&mut st, ConnectionStatus::Error, "logged out");
            return;
        }

        let wait_ms = {
            let mut st = self.inner.state.lock().await;
            let reason = match close_reason_code {
                Some(code) => format!("connection closed ({code})"),
                None => "connection closed".to_string(),
            };
            self.apply_transition(&mut st, ConnectionStatus::Disconnected, &reason);

            st.reconnect_attempts += 1;
            if st.reconnect_attempts > self.inner.config.max_reconnect_attempts {
                self.apply_transition(
                    &mut st,
                    ConnectionStatus::Error,
                    "reconnect attempts exhausted",
                );
                return;
            }
            self.inner.compliance.jitter_ms(
                self.inner.config.reconnect_jitter_min_ms,
                self.inner.config.reconnect_jitter_max_ms,
            )
        };

        info!(connection = %self.inner.id, wait_ms, "Scheduling reconnect");
        let conn = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(wait_ms)).await;
            {
                let mut st = conn.inner.state.lock().await;
                if st.status != ConnectionStatus::Disconnected {
                    // Superseded while waiting (operator action, logout).
                    return;
                }
                conn.apply_transition(&mut st, ConnectionStatus::Authenticating, "reconnect");
            }
            if let Err(e) = conn.inner.capability.initialize().await {
                warn!(connection = %conn.inner.id, error = %e, "Reconnect initialization failed");
                let mut st = conn.inner.state.lock().await;
                conn.apply_transition(&mut st, ConnectionStatus::Error, "reconnect failed");
            }
        });
    }

    // ─── Test hooks ─────────────────────────────────────────────────────

    /// Forces a transition through the guarded path. Intended for tests and
    /// operator tooling; production flows use the lifecycle operations.
    pub async fn force_transition(&self, to: ConnectionStatus, reason: &str) -> ConnectionStatus {
        let mut st = self.inner.state.lock().await;
        self.apply_transition(&mut st, to, reason)
    }

    #[cfg(test)]
    async fn push_history_entry(&self, at: DateTime<Utc>) {
        self.inner.state.lock().await.send_history.push(at);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::testing::ScriptedCapability;
    use relay_core::config::{ComplianceConfig, TypingConfig};
    use relay_core::event_bus::{capture_sink, CaptureSink};
    use relay_core::tracking::NoOpTracker;
    use std::sync::atomic::Ordering;
    use std::time::Duration as StdDuration;

    fn test_config() -> ConnectionConfig {
        ConnectionConfig {
            idle_timeout_ms: 10_000,
            max_reconnect_attempts: 5,
            reconnect_jitter_min_ms: 10,
            reconnect_jitter_max_ms: 20,
            ready_wait_timeout_ms: 1_000,
            rate_limit_jitter_min_ms: 10,
            rate_limit_jitter_max_ms: 20,
        }
    }

    fn test_engine(max_per_hour: u32, max_per_day: u32) -> ComplianceEngine {
        ComplianceEngine::new(
            ComplianceConfig {
                min_delay_ms: 0,
                max_delay_ms: 1,
                max_per_hour,
                max_per_day,
            },
            TypingConfig::default(),
        )
    }

    struct Harness {
        conn: Connection,
        cap: Arc<ScriptedCapability>,
        sink: Arc<CaptureSink>,
        events: mpsc::UnboundedSender<ProtocolEvent>,
    }

    fn harness_with(config: ConnectionConfig, engine: ComplianceEngine) -> Harness {
        let cap = Arc::new(ScriptedCapability::new());
        let sink = capture_sink();
        let events = cap.event_sender();
        let conn = Connection::new(
            "chip-1",
            cap.clone(),
            engine,
            config,
            sink.clone(),
            Arc::new(NoOpTracker),
        );
        Harness {
            conn,
            cap,
            sink,
            events,
        }
    }

    fn harness() -> Harness {
        harness_with(test_config(), test_engine(20, 200))
    }

    async fn bring_ready(h: &Harness) {
        h.conn.start().await.unwrap();
        h.events
            .send(ProtocolEvent::ConnectionUpdate {
                phase: ConnectionPhase::Open,
                close_reason_code: None,
            })
            .unwrap();
        h.conn.wait_until_ready(1_000).await.unwrap();
    }

    #[tokio::test]
    async fn test_invalid_transition_forces_error() {
        let h = harness();
        // Init -> Ready is not in the table.
        let status = h
            .conn
            .force_transition(ConnectionStatus::Ready, "test")
            .await;
        assert_eq!(status, ConnectionStatus::Error);

        let changes = h.sink.status_changes();
        assert_eq!(changes.last().unwrap().1, ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_send_rejected_outside_ready_and_never_hits_protocol() {
        let h = harness();
        // Still Init.
        let err = h.conn.send_message("551100", "hi", None).await.unwrap_err();
        assert!(matches!(err, RelayError::State { .. }));
        assert_eq!(h.cap.send_count(), 0);
    }

    #[tokio::test]
    async fn test_lifecycle_reaches_ready_and_sends() {
        let h = harness();
        bring_ready(&h).await;
        assert_eq!(h.conn.current_status(), ConnectionStatus::Ready);

        let receipt = h.conn.send_message("551100", "hello", None).await.unwrap();
        assert!(!receipt.provider_message_id.is_empty());
        assert_eq!(h.cap.send_count(), 1);
        assert_eq!(h.conn.current_status(), ConnectionStatus::Ready);

        // Provider id is indexed with its target and send time.
        let tracked = h
            .conn
            .lookup_send(&receipt.provider_message_id)
            .await
            .unwrap();
        assert!(tracked.correlation.is_none());
        assert_eq!(tracked.target, "551100");
        assert!(tracked.sent_at <= Utc::now());
    }

    #[tokio::test]
    async fn test_info_prunes_stale_history() {
        let h = harness();
        bring_ready(&h).await;
        h.conn
            .push_history_entry(Utc::now() - Duration::hours(25))
            .await;
        h.conn.push_history_entry(Utc::now()).await;

        let info = h.conn.info().await;
        assert_eq!(info.sends_last_24h, 1);
    }

    #[tokio::test]
    async fn test_hourly_rate_limit_trips_into_cooldown() {
        let h = harness_with(test_config(), test_engine(1, 2));
        bring_ready(&h).await;

        h.conn.send_message("551100", "first", None).await.unwrap();
        let err = h
            .conn
            .send_message("551100", "second", None)
            .await
            .unwrap_err();

        match err {
            RelayError::RateLimited { window, resume_at } => {
                assert_eq!(window, "hourly");
                assert!(resume_at > Utc::now());
            }
            other => panic!("expected RateLimited, got {other}"),
        }
        assert_eq!(h.conn.current_status(), ConnectionStatus::Cooldown);

        let info = h.conn.info().await;
        assert!(info.cooldown_until.unwrap() >= Utc::now());
        assert_eq!(h.cap.send_count(), 1);
    }

    #[tokio::test]
    async fn test_daily_rate_limit_uses_24h_window() {
        let h = harness_with(test_config(), test_engine(100, 1));
        bring_ready(&h).await;

        h.conn.send_message("551100", "first", None).await.unwrap();
        let err = h
            .conn
            .send_message("551100", "second", None)
            .await
            .unwrap_err();
        assert!(
            matches!(err, RelayError::RateLimited { ref window, .. } if window == "daily"),
            "got {err}"
        );
        assert_eq!(h.conn.current_status(), ConnectionStatus::Cooldown);
    }

    #[tokio::test]
    async fn test_forced_error_then_send_rejects() {
        let h = harness();
        bring_ready(&h).await;
        let status = h
            .conn
            .force_transition(ConnectionStatus::Error, "test")
            .await;
        assert_eq!(status, ConnectionStatus::Error);

        let err = h.conn.send_message("551100", "hi", None).await.unwrap_err();
        assert!(matches!(err, RelayError::State { .. }));
        assert_eq!(h.cap.send_count(), 0);
    }

    #[tokio::test]
    async fn test_enter_cooldown_blocks_then_returns_to_ready() {
        let h = harness();
        bring_ready(&h).await;

        let conn = h.conn.clone();
        let task = tokio::spawn(async move { conn.enter_cooldown(50, "post-send").await });

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(h.conn.current_status(), ConnectionStatus::Cooldown);

        // Sends are refused while the cooldown holds.
        let err = h.conn.send_message("551100", "hi", None).await.unwrap_err();
        assert!(matches!(err, RelayError::State { .. }));

        task.await.unwrap().unwrap();
        assert_eq!(h.conn.current_status(), ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn test_cooldown_until_never_shortened() {
        let h = harness();
        bring_ready(&h).await;

        let conn = h.conn.clone();
        let long = tokio::spawn(async move { conn.enter_cooldown(200, "long").await });
        tokio::time::sleep(StdDuration::from_millis(10)).await;

        let until_before = h.conn.info().await.cooldown_until.unwrap();
        // A shorter overlapping cooldown must not pull the deadline in.
        let conn = h.conn.clone();
        let short = tokio::spawn(async move { conn.enter_cooldown(20, "short").await });
        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert!(h.conn.info().await.cooldown_until.unwrap() >= until_before);

        short.await.unwrap().unwrap();
        // The short wake does not release the longer hold.
        assert_eq!(h.conn.current_status(), ConnectionStatus::Cooldown);

        long.await.unwrap().unwrap();
        assert_eq!(h.conn.current_status(), ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn test_idle_demotion_and_promote_on_send() {
        let mut config = test_config();
        config.idle_timeout_ms = 30;
        let h = harness_with(config, test_engine(20, 200));
        bring_ready(&h).await;

        tokio::time::sleep(StdDuration::from_millis(80)).await;
        assert_eq!(h.conn.current_status(), ConnectionStatus::Idle);

        // Sending from Idle promotes to Ready first, then proceeds.
        h.conn.send_message("551100", "hi", None).await.unwrap();
        assert_eq!(h.conn.current_status(), ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn test_idle_timer_superseded_by_later_ready() {
        let mut config = test_config();
        config.idle_timeout_ms = 60;
        let h = harness_with(config, test_engine(20, 200));
        bring_ready(&h).await;

        // Re-enter Ready halfway through; the first timer must not demote
        // at its original deadline.
        tokio::time::sleep(StdDuration::from_millis(35)).await;
        h.conn.send_message("551100", "hi", None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(35)).await;
        assert_eq!(h.conn.current_status(), ConnectionStatus::Ready);
    }

    #[tokio::test]
    async fn test_target_invalid_fails_send_and_emits_failed() {
        let h = harness();
        bring_ready(&h).await;
        h.cap.target_exists.store(false, Ordering::SeqCst);

        let correlation = Correlation {
            campaign_id: "camp-1".into(),
            contact_id: "contact-1".into(),
            client_message_id: "msg-1".into(),
        };
        let err = h
            .conn
            .send_message("551100", "hi", Some(correlation))
            .await
            .unwrap_err();
        assert!(matches!(err, RelayError::TargetInvalid { .. }));
        assert_eq!(h.conn.current_status(), ConnectionStatus::Error);
        assert_eq!(h.cap.send_count(), 0);

        let failed: Vec<_> = h
            .sink
            .message_statuses()
            .into_iter()
            .filter(|e| {
                matches!(
                    e,
                    RelayEvent::MessageStatus {
                        status: DeliveryStatus::Failed,
                        ..
                    }
                )
            })
            .collect();
        assert_eq!(failed.len(), 1);
    }

    #[tokio::test]
    async fn test_protocol_send_failure_transitions_to_error() {
        let h = harness();
        bring_ready(&h).await;
        h.cap.fail_send.store(true, Ordering::SeqCst);

        let err = h.conn.send_message("551100", "hi", None).await.unwrap_err();
        assert!(matches!(err, RelayError::Protocol(_)));
        assert_eq!(h.conn.current_status(), ConnectionStatus::Error);
    }

    #[tokio::test]
    async fn test_close_triggers_jittered_reconnect() {
        let h = harness();
        bring_ready(&h).await;
        assert_eq!(*h.cap.initialize_calls.lock(), 1);

        h.events
            .send(ProtocolEvent::ConnectionUpdate {
                phase: ConnectionPhase::Close,
                close_reason_code: Some(428),
            })
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(10)).await;
        assert_eq!(h.conn.current_status(), ConnectionStatus::Disconnected);

        // Jitter window is 10-20ms in the test config.
        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(*h.cap.initialize_calls.lock(), 2);

        // Provider reopens; counter resets and the chip is usable again.
        h.events
            .send(ProtocolEvent::ConnectionUpdate {
                phase: ConnectionPhase::Open,
                close_reason_code: None,
            })
            .unwrap();
        h.conn.wait_until_ready(1_000).await.unwrap();
        assert_eq!(h.conn.info().await.reconnect_attempts, 0);
    }

    #[tokio::test]
    async fn test_logged_out_close_is_terminal() {
        let h = harness();
        bring_ready(&h).await;
        h.cap.logged_out.store(true, Ordering::SeqCst);

        h.events
            .send(ProtocolEvent::ConnectionUpdate {
                phase: ConnectionPhase::Close,
                close_reason_code: Some(401),
            })
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(h.conn.current_status(), ConnectionStatus::Error);
        // No reconnect is attempted.
        assert_eq!(*h.cap.initialize_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_reconnect_attempts_exhausted() {
        let mut config = test_config();
        config.max_reconnect_attempts = 0;
        let h = harness_with(config, test_engine(20, 200));
        bring_ready(&h).await;

        h.events
            .send(ProtocolEvent::ConnectionUpdate {
                phase: ConnectionPhase::Close,
                close_reason_code: None,
            })
            .unwrap();

        tokio::time::sleep(StdDuration::from_millis(50)).await;
        assert_eq!(h.conn.current_status(), ConnectionStatus::Error);
        assert_eq!(*h.cap.initialize_calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_wait_until_ready_times_out() {
        let h = harness();
        // Never started; stays Init.
        let err = h.conn.wait_until_ready(60).await.unwrap_err();
        assert!(matches!(err, RelayError::ReadyTimeout { timeout_ms: 60 }));
    }
}
