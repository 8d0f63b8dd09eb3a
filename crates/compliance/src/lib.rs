//! Compliance engine — humanized message spacing, typing-latency modeling,
//! and the jitter windows used by rate-limit resume and reconnect backoff.

pub mod engine;

pub use engine::ComplianceEngine;
