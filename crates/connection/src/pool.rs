//! Connection pool — creates, restores, and tears down per-account
//! connections, and exposes the readiness barrier dispatchers wait on.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{info, warn};

use relay_compliance::ComplianceEngine;
use relay_core::config::ConnectionConfig;
use relay_core::error::{RelayError, RelayResult};
use relay_core::event_bus::EventSink;
use relay_core::protocol::ProtocolCapability;
use relay_core::session::SessionStore;
use relay_core::tracking::DeliveryTracker;

use crate::connection::{Connection, ConnectionInfo};

/// Builds one protocol capability per account id.
pub trait CapabilityFactory: Send + Sync {
    fn create(&self, account_id: &str) -> Arc<dyn ProtocolCapability>;
}

impl<F> CapabilityFactory for F
where
    F: Fn(&str) -> Arc<dyn ProtocolCapability> + Send + Sync,
{
    fn create(&self, account_id: &str) -> Arc<dyn ProtocolCapability> {
        self(account_id)
    }
}

/// Owns every account connection. Connections are created idempotently and
/// initialized in the background; `wait_for_ready` gates callers until
/// enough of them can accept sends.
pub struct ConnectionPool {
    connections: DashMap<String, Connection>,
    // Insertion order, for display and fair selection.
    order: Mutex<Vec<String>>,
    factory: Arc<dyn CapabilityFactory>,
    compliance: ComplianceEngine,
    config: ConnectionConfig,
    event_sink: Arc<dyn EventSink>,
    tracker: Arc<dyn DeliveryTracker>,
}

impl ConnectionPool {
    pub fn new(
        factory: Arc<dyn CapabilityFactory>,
        compliance: ComplianceEngine,
        config: ConnectionConfig,
        event_sink: Arc<dyn EventSink>,
        tracker: Arc<dyn DeliveryTracker>,
    ) -> Self {
        Self {
            connections: DashMap::new(),
            order: Mutex::new(Vec::new()),
            factory,
            compliance,
            config,
            event_sink,
            tracker,
        }
    }

    /// Creates and starts the connection for `account_id`, or returns the
    /// existing one. Initialization runs in the background; the caller is
    /// never blocked on authentication.
    pub fn ensure_connection(&self, account_id: &str) -> Connection {
        if let Some(existing) = self.connections.get(account_id) {
            return existing.clone();
        }

        match self.connections.entry(account_id.to_string()) {
            dashmap::mapref::entry::Entry::Occupied(entry) => entry.get().clone(),
            dashmap::mapref::entry::Entry::Vacant(entry) => {
                let capability = self.factory.create(account_id);
                let conn = Connection::new(
                    account_id,
                    capability,
                    self.compliance,
                    self.config,
                    self.event_sink.clone(),
                    self.tracker.clone(),
                );
                entry.insert(conn.clone());
                self.order.lock().push(account_id.to_string());
                info!(connection = %account_id, "Connection added to pool");

                let started = conn.clone();
                tokio::spawn(async move {
                    if let Err(e) = started.start().await {
                        warn!(connection = %started.id(), error = %e, "Connection start failed");
                    }
                });
                conn
            }
        }
    }

    /// Starts every previously-known account exactly once.
    pub async fn restore(&self, store: &dyn SessionStore) -> RelayResult<usize> {
        let ids = store.list_account_ids().await?;
        let mut started = 0;
        for id in ids {
            if !self.connections.contains_key(&id) {
                self.ensure_connection(&id);
                started += 1;
            }
        }
        info!(restored = started, "Pool restored from session store");
        Ok(started)
    }

    pub fn get(&self, account_id: &str) -> Option<Connection> {
        self.connections.get(account_id).map(|c| c.clone())
    }

    /// All connections, in insertion order.
    pub fn list(&self) -> Vec<Connection> {
        let order = self.order.lock();
        order
            .iter()
            .filter_map(|id| self.connections.get(id).map(|c| c.clone()))
            .collect()
    }

    /// Connections currently able to accept a send.
    pub fn available(&self) -> Vec<Connection> {
        self.list()
            .into_iter()
            .filter(|c| c.current_status().can_send())
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.available().len()
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    pub async fn infos(&self) -> Vec<ConnectionInfo> {
        let mut infos = Vec::new();
        for conn in self.list() {
            infos.push(conn.info().await);
        }
        infos
    }

    /// Resolves once at least `min_ready` connections can send, or fails
    /// after `timeout_ms`.
    pub async fn wait_for_ready(&self, min_ready: usize, timeout_ms: u64) -> RelayResult<()> {
        let wait = async {
            loop {
                if self.ready_count() >= min_ready {
                    return;
                }
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
        };
        tokio::time::timeout(std::time::Duration::from_millis(timeout_ms), wait)
            .await
            .map_err(|_| RelayError::ReadyTimeout { timeout_ms })
    }

    /// Destroys one connection and removes it from the pool.
    pub async fn remove(&self, account_id: &str) -> RelayResult<()> {
        if let Some((_, conn)) = self.connections.remove(account_id) {
            self.order.lock().retain(|id| id != account_id);
            conn.destroy().await?;
            info!(connection = %account_id, "Connection removed from pool");
        }
        Ok(())
    }

    /// Tears down every connection.
    pub async fn shutdown(&self) {
        for conn in self.list() {
            if let Err(e) = conn.destroy().await {
                warn!(connection = %conn.id(), error = %e, "Destroy failed during shutdown");
            }
        }
        self.connections.clear();
        self.order.lock().clear();
    }
}
