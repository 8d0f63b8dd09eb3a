pub mod config;
pub mod error;
pub mod event_bus;
pub mod protocol;
pub mod session;
pub mod tracking;
pub mod types;

pub use config::AppConfig;
pub use error::{RelayError, RelayResult};
