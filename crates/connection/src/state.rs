//! Transition table for the connection state machine.
//!
//! A finite map from each state to its allowed successors. Requesting any
//! transition not listed here forces `Error` — fail-safe, never silently
//! ignored.

use relay_core::types::ConnectionStatus;

use ConnectionStatus::*;

/// Allowed successor states for `from`.
pub fn allowed_targets(from: ConnectionStatus) -> &'static [ConnectionStatus] {
    match from {
        Init => &[Authenticating, Error],
        Authenticating => &[Connected, Error, Disconnected],
        Connected => &[Ready, Error, Disconnected],
        Ready => &[Sending, Idle, Cooldown, Error, Disconnected],
        Idle => &[Ready, Sending, Cooldown, Error, Disconnected],
        Sending => &[Cooldown, Ready, Error, Disconnected],
        Cooldown => &[Ready, Idle, Error, Disconnected],
        Disconnected => &[Authenticating, Error],
        Error => &[Authenticating, Disconnected],
    }
}

/// Returns `true` if `from → to` is a permitted transition.
pub fn is_allowed(from: ConnectionStatus, to: ConnectionStatus) -> bool {
    allowed_targets(from).contains(&to)
}
