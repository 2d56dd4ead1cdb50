//! Typed events and the listener registry they are delivered through.
//!
//! Lifecycle events ([`Event::Connected`], [`Event::Disconnected`], [`Event::Error`]) and
//! server payload events share one bus, so callers can react to transport state changes
//! without polling.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use dashmap::DashMap;

use crate::types::response::{
    ComputationComplete, ServerError, StatusUpdate, StudyUpdate, ValidationResult, VersionUpdate,
};

/// Close details carried by [`Event::Disconnected`].
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    /// WebSocket close code, if the peer sent one
    pub code: Option<u16>,
    /// Close reason, empty when none was given
    pub reason: String,
    /// `true` when the close was requested through `disconnect`
    pub manual: bool,
}

/// Every event that can be delivered to a [`Listener`].
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum Event {
    /// The socket opened, the credential and all tracked subscriptions were sent
    Connected,
    /// An open socket closed
    Disconnected(CloseInfo),
    /// A connection attempt failed
    Error {
        /// Human-readable failure description
        message: String,
    },
    StatusUpdate(StatusUpdate),
    StudyUpdate(StudyUpdate),
    VersionUpdate(VersionUpdate),
    ComputationComplete(ComputationComplete),
    ValidationResult(ValidationResult),
    /// The server reported an application error; the connection stays open
    ServerError(ServerError),
}

impl Event {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected(_) => EventKind::Disconnected,
            Self::Error { .. } => EventKind::Error,
            Self::StatusUpdate(_) => EventKind::StatusUpdate,
            Self::StudyUpdate(_) => EventKind::StudyUpdate,
            Self::VersionUpdate(_) => EventKind::VersionUpdate,
            Self::ComputationComplete(_) => EventKind::ComputationComplete,
            Self::ValidationResult(_) => EventKind::ValidationResult,
            Self::ServerError(_) => EventKind::ServerError,
        }
    }
}

/// Event name listeners register against.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum_macros::Display)]
#[strum(serialize_all = "camelCase")]
pub enum EventKind {
    Connected,
    Disconnected,
    Error,
    StatusUpdate,
    StudyUpdate,
    VersionUpdate,
    ComputationComplete,
    ValidationResult,
    ServerError,
}

/// Callback handle. Identity (the `Arc` allocation) is what [`EventBus::off`] removes by.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

/// Mapping from event kind to the set of registered listeners.
///
/// Emission iterates over a snapshot taken before the first callback runs, so listeners
/// may call [`EventBus::on`] or [`EventBus::off`] from inside a callback without skipping
/// or double-invoking others.
#[derive(Default)]
pub struct EventBus {
    listeners: DashMap<EventKind, Vec<Listener>>,
}

impl EventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `listener` for `kind`. Registering the same handle twice has no effect.
    pub fn on(&self, kind: EventKind, listener: Listener) {
        let mut entry = self.listeners.entry(kind).or_default();
        if !entry.iter().any(|existing| Arc::ptr_eq(existing, &listener)) {
            entry.push(listener);
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(event = %kind, "Added event listener");
    }

    /// Remove exactly `listener` from `kind`. Returns `true` if it was registered.
    pub fn off(&self, kind: EventKind, listener: &Listener) -> bool {
        let Some(mut entry) = self.listeners.get_mut(&kind) else {
            return false;
        };
        let before = entry.len();
        entry.retain(|existing| !Arc::ptr_eq(existing, listener));
        let removed = entry.len() != before;

        if removed {
            #[cfg(feature = "tracing")]
            tracing::debug!(event = %kind, "Removed event listener");
        }

        removed
    }

    /// Deliver `event` to every listener registered for its kind.
    ///
    /// A panicking listener is logged and skipped; the remaining listeners still run.
    pub fn emit(&self, event: &Event) {
        let kind = event.kind();
        // The shard guard must be released before callbacks run, they may re-enter the bus.
        let snapshot: Vec<Listener> = self
            .listeners
            .get(&kind)
            .map(|entry| entry.value().clone())
            .unwrap_or_default();

        for listener in snapshot {
            if catch_unwind(AssertUnwindSafe(|| listener(event))).is_err() {
                #[cfg(feature = "tracing")]
                tracing::error!(event = %kind, "Event listener panicked");
            }
        }
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.get(&kind).map_or(0, |entry| entry.len())
    }

    pub fn clear(&self) {
        self.listeners.clear();

        #[cfg(feature = "tracing")]
        tracing::debug!("Cleared all event listeners");
    }
}
