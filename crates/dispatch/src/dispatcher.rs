//! Dispatcher — orchestrates one outbound message end-to-end: pick an
//! account, wait for readiness, apply humanized delays, send, and space
//! the next send with a post-send cooldown.

use std::sync::Arc;

use tracing::{debug, info};

use relay_compliance::ComplianceEngine;
use relay_connection::balancer::LoadBalancer;
use relay_connection::pool::ConnectionPool;
use relay_core::error::{RelayError, RelayResult};
use relay_core::types::{DispatchReceipt, DispatchRequest, DispatchStatus};

/// Sends one message at a time; connection lifecycles run concurrently
/// underneath. The caller owns per-target bookkeeping and decides what to
/// do with each propagated failure.
pub struct Dispatcher {
    pool: Arc<ConnectionPool>,
    balancer: LoadBalancer,
    compliance: ComplianceEngine,
    ready_wait_timeout_ms: u64,
}

impl Dispatcher {
    pub fn new(
        pool: Arc<ConnectionPool>,
        compliance: ComplianceEngine,
        ready_wait_timeout_ms: u64,
    ) -> Self {
        Self {
            pool,
            balancer: LoadBalancer::new(),
            compliance,
            ready_wait_timeout_ms,
        }
    }

    /// Dispatches one message. `request.text` is final; rendering happened
    /// upstream. Failures propagate untouched.
    pub async fn dispatch(&self, request: DispatchRequest) -> RelayResult<DispatchReceipt> {
        let conn = self
            .balancer
            .next(&self.pool)
            .ok_or(RelayError::NoAvailableConnection)?;

        conn.wait_until_ready(self.ready_wait_timeout_ms).await?;

        let engine = self.compliance.merged(request.delay_override);
        let typing_delay_ms = engine.typing_delay_ms(&request.text);
        let post_send_delay_ms = engine.variable_delay_ms();

        if request.dry_run {
            debug!(
                connection = %conn.id(),
                target = %request.target,
                typing_delay_ms,
                post_send_delay_ms,
                "Dry run, skipping send"
            );
            return Ok(DispatchReceipt {
                status: DispatchStatus::DryRun,
                connection_id: Some(conn.id().to_string()),
                provider_message_id: None,
                remote_id: None,
                typing_delay_ms,
                post_send_delay_ms,
            });
        }

        metrics::counter!("dispatch.attempted").increment(1);
        metrics::histogram!("dispatch.typing_delay_ms").record(typing_delay_ms as f64);
        metrics::histogram!("dispatch.post_send_delay_ms").record(post_send_delay_ms as f64);

        // Simulated typing before the send hits the wire.
        tokio::time::sleep(std::time::Duration::from_millis(typing_delay_ms)).await;

        let receipt = match conn
            .send_message(&request.target, &request.text, request.correlation.clone())
            .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                metrics::counter!("dispatch.failed").increment(1);
                return Err(e);
            }
        };

        info!(
            connection = %conn.id(),
            target = %request.target,
            provider_message_id = %receipt.provider_message_id,
            "Message dispatched"
        );
        metrics::counter!("dispatch.sent").increment(1);

        // Humanized spacing before this account sends again.
        conn.enter_cooldown(post_send_delay_ms, "post-send spacing")
            .await?;

        Ok(DispatchReceipt {
            status: DispatchStatus::ServerAck,
            connection_id: Some(conn.id().to_string()),
            provider_message_id: Some(receipt.provider_message_id),
            remote_id: Some(receipt.remote_id),
            typing_delay_ms,
            post_send_delay_ms,
        })
    }
}
