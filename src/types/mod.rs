//! Wire frames exchanged with the notification server.
//!
//! [`request`] holds everything the client writes; [`response`] holds the inbound
//! frame wrapper, the typed event payloads and [`response::parse_frame`].

/// Date and time types used for frame timestamps.
pub use chrono::{DateTime, Utc};
/// Untyped JSON value, used for custom frames and payload extras.
pub use serde_json::Value;

pub mod request;
pub mod response;
