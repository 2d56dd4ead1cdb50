#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod client;
pub mod error;
pub mod events;
pub(crate) mod serde_helpers;
pub mod types;
pub mod ws;

use crate::error::Error;

pub use crate::client::{Client, ConnectionStatus, endpoint_from_base_url};
pub use crate::events::{CloseInfo, Event, EventKind, Listener};
pub use crate::ws::connection::ConnectionState;

pub type Result<T> = std::result::Result<T, Error>;
