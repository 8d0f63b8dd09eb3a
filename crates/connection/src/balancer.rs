//! Load balancer — picks the next eligible connection for an outbound
//! message.
//!
//! Round-robin over a snapshot of the pool, so selection stays correct
//! while connections are added or removed concurrently. A connection in
//! `Disconnected` or `Error` is never returned.

use std::sync::atomic::{AtomicUsize, Ordering};

use relay_core::types::ConnectionStatus;

use crate::connection::Connection;
use crate::pool::ConnectionPool;

#[derive(Default)]
pub struct LoadBalancer {
    cursor: AtomicUsize,
}

impl LoadBalancer {
    pub fn new() -> Self {
        Self {
            cursor: AtomicUsize::new(0),
        }
    }

    /// Next connection eligible for dispatch, or `None` when every account
    /// is down. Prefers connections that can send right now; falls back to
    /// ones mid-lifecycle (the dispatcher's ready-wait covers those). The
    /// advancing cursor guarantees no eligible connection starves.
    pub fn next(&self, pool: &ConnectionPool) -> Option<Connection> {
        let snapshot = pool.list();
        if snapshot.is_empty() {
            return None;
        }

        let n = snapshot.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed);

        for i in 0..n {
            let conn = &snapshot[(start + i) % n];
            if conn.current_status().can_send() {
                return Some(conn.clone());
            }
        }
        for i in 0..n {
            let conn = &snapshot[(start + i) % n];
            if !matches!(
                conn.current_status(),
                ConnectionStatus::Disconnected | ConnectionStatus::Error
            ) {
                return Some(conn.clone());
            }
        }
        None
    }
}
