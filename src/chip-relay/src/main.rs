//! Chip Relay — multi-account outbound message dispatcher.
//!
//! Main entry point: loads configuration, brings up the connection pool,
//! and keeps the accounts alive until shutdown. The control-plane surface
//! (ingestion, HTTP, UI) lives outside this process core.

use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};

use relay_compliance::ComplianceEngine;
use relay_connection::pool::{CapabilityFactory, ConnectionPool};
use relay_core::config::AppConfig;
use relay_core::event_bus::{EventSink, RelayEvent};
use relay_core::protocol::{LoggingCapability, ProtocolCapability};
use relay_core::session::MemorySessionStore;
use relay_dispatch::{Dispatcher, MessageTracker};

#[derive(Parser, Debug)]
#[command(name = "chip-relay")]
#[command(about = "Multi-account outbound message dispatcher")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "CHIP_RELAY__NODE_ID")]
    node_id: Option<String>,

    /// Account ids to bring up at startup
    #[arg(long, value_delimiter = ',', default_value = "chip-01")]
    accounts: Vec<String>,

    /// Minimum connections that must be ready before serving
    #[arg(long, default_value_t = 1)]
    min_ready: usize,
}

/// Publishes core events into the structured log, standing in for the
/// control-plane surface.
struct LogSink;

impl EventSink for LogSink {
    fn emit(&self, event: RelayEvent) {
        match event {
            RelayEvent::Status {
                connection_id,
                new_state,
                reason,
                ..
            } => info!(connection = %connection_id, state = %new_state, reason, "Status"),
            RelayEvent::Qr {
                connection_id,
                payload,
            } => info!(connection = %connection_id, payload_len = payload.len(), "QR code"),
            RelayEvent::MessageStatus {
                provider_message_id,
                status,
                connection_id,
                ..
            } => info!(
                provider_message_id = provider_message_id.as_deref().unwrap_or("-"),
                status = ?status,
                connection = connection_id.as_deref().unwrap_or("-"),
                "Message status"
            ),
        }
    }
}

struct InProcessFactory;

impl CapabilityFactory for InProcessFactory {
    fn create(&self, account_id: &str) -> Arc<dyn ProtocolCapability> {
        Arc::new(LoggingCapability::new(account_id, "unprovisioned"))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chip_relay=info,relay_connection=info,relay_dispatch=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("Chip Relay starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }

    info!(
        node_id = %config.node_id,
        accounts = cli.accounts.len(),
        min_ready = cli.min_ready,
        max_per_hour = config.compliance.max_per_hour,
        max_per_day = config.compliance.max_per_day,
        "Configuration loaded"
    );

    let event_sink: Arc<dyn EventSink> = Arc::new(LogSink);
    let compliance = ComplianceEngine::new(config.compliance, config.typing);
    let tracker = Arc::new(MessageTracker::new(event_sink.clone()));

    let pool = Arc::new(ConnectionPool::new(
        Arc::new(InProcessFactory),
        compliance,
        config.connection,
        event_sink.clone(),
        tracker.clone(),
    ));

    // Bring up every known account without blocking on any single one.
    let store = MemorySessionStore::new(cli.accounts.clone());
    pool.restore(&store).await?;

    if let Err(e) = pool
        .wait_for_ready(cli.min_ready, config.connection.ready_wait_timeout_ms)
        .await
    {
        error!(error = %e, "Pool did not reach minimum readiness");
        return Err(e.into());
    }

    let _dispatcher = Dispatcher::new(
        pool.clone(),
        compliance,
        config.connection.ready_wait_timeout_ms,
    );

    info!(ready = pool.ready_count(), "Chip Relay is ready to dispatch");

    // Serve until shutdown (dispatch requests arrive via the external
    // control plane, which hands DispatchRequests to the dispatcher).
    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    pool.shutdown().await;

    Ok(())
}
