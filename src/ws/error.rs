#![expect(
    clippy::module_name_repetitions,
    reason = "Error types include the module name to indicate their scope"
)]

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

/// WebSocket error variants.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum WsError {
    /// Error connecting to or communicating with the WebSocket server.
    ///
    /// Shared because every caller awaiting the same connection attempt receives it.
    Connection(Arc<tokio_tungstenite::tungstenite::Error>),
    /// Error parsing a WebSocket message
    MessageParse(Arc<serde_json::Error>),
    /// WebSocket connection was closed, or the client has been dropped
    ConnectionClosed,
    /// A pending connection attempt was abandoned because `disconnect` was called
    Aborted,
    /// Reconnection gave up after the configured number of attempts
    RetriesExhausted {
        /// Number of reconnection attempts that were made
        attempts: u32,
    },
}

impl fmt::Display for WsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connection(e) => write!(f, "WebSocket connection error: {e}"),
            Self::MessageParse(e) => write!(f, "Failed to parse WebSocket message: {e}"),
            Self::ConnectionClosed => write!(f, "WebSocket connection closed"),
            Self::Aborted => write!(f, "WebSocket connection attempt aborted by disconnect"),
            Self::RetriesExhausted { attempts } => {
                write!(f, "WebSocket reconnection gave up after {attempts} attempts")
            }
        }
    }
}

impl StdError for WsError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        match self {
            Self::Connection(e) => Some(e.as_ref()),
            Self::MessageParse(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

// Integration with main Error type
impl From<WsError> for crate::error::Error {
    fn from(e: WsError) -> Self {
        crate::error::Error::with_source(crate::error::Kind::WebSocket, e)
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for crate::error::Error {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        crate::error::Error::with_source(
            crate::error::Kind::WebSocket,
            WsError::Connection(Arc::new(e)),
        )
    }
}
