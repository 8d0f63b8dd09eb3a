use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::types::ConnectionStatus;

pub type RelayResult<T> = Result<T, RelayError>;

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Operation invalid in state {status}: {operation}")]
    State {
        status: ConnectionStatus,
        operation: String,
    },

    #[error("Rate limit reached ({window}): resumes at {resume_at}")]
    RateLimited {
        window: String,
        resume_at: DateTime<Utc>,
    },

    #[error("Cooldown active until {until}")]
    CooldownActive { until: DateTime<Utc> },

    #[error("Target {target} does not exist on the network")]
    TargetInvalid { target: String },

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Reconnect attempts exhausted after {attempts} tries")]
    ReconnectExhausted { attempts: u32 },

    #[error("Account logged out, re-authentication required")]
    LoggedOut,

    #[error("No available connection")]
    NoAvailableConnection,

    #[error("Connection not ready within {timeout_ms}ms")]
    ReadyTimeout { timeout_ms: u64 },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RelayError {
    /// Errors recovered purely by the passage of time.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            RelayError::RateLimited { .. } | RelayError::CooldownActive { .. }
        )
    }

    /// Errors requiring an operator to re-authenticate the account.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RelayError::ReconnectExhausted { .. } | RelayError::LoggedOut
        )
    }
}
