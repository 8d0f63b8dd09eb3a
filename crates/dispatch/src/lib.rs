//! Dispatch pipeline — per-message orchestration across the connection
//! pool, and correlation of provider delivery events with campaign
//! metadata.

pub mod dispatcher;
pub mod tracker;

pub use dispatcher::Dispatcher;
pub use tracker::MessageTracker;
