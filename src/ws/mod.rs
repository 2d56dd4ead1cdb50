//! Core WebSocket infrastructure.
//!
//! # Architecture
//!
//! - [`ConnectionManager`]: connection lifecycle, heartbeat, reconnection with capped
//!   exponential backoff and subscription replay, all driven by one background task
//! - [`subscription::SubscriptionRegistry`]: the topics replayed after every open
//! - [`config::ReconnectBackoff`]: the delay schedule between reconnection attempts

pub mod config;
pub mod connection;
pub mod error;
pub mod subscription;

pub use connection::ConnectionManager;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
