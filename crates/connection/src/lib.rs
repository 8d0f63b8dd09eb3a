//! Connection lifecycle — the per-account state machine, rate
//! limiter/cooldown, connection pool, and load balancer.

pub mod balancer;
pub mod connection;
pub mod pool;
pub mod state;
pub mod testing;

pub use balancer::LoadBalancer;
pub use connection::Connection;
pub use pool::{CapabilityFactory, ConnectionPool};
