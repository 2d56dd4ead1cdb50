use std::sync::Arc;

use serde_json::Value;
use url::Url;

use crate::Result;
use crate::auth::{Anonymous, CredentialProvider};
use crate::error::Error;
use crate::events::{Event, EventBus, EventKind, Listener};
use crate::types::request::OutboundMessage;
use crate::ws::ConnectionManager;
use crate::ws::config::Config;
pub use crate::ws::connection::ConnectionStatus;
use crate::ws::subscription::{STATUS_COMPUTATION_TOPIC, STATUS_VALIDATION_TOPIC, study_topics};

/// Path of the status-updates socket relative to the API host.
pub const STATUS_UPDATES_PATH: &str = "/ws/status-updates";

/// Derive the notification socket URL from an HTTP API base URL.
///
/// `http` becomes `ws` and `https` becomes `wss`; any path on `base` is replaced by
/// [`STATUS_UPDATES_PATH`].
///
/// # Errors
///
/// Returns a validation error if `base` is not an absolute `http`/`https` URL.
pub fn endpoint_from_base_url(base: &str) -> Result<Url> {
    let mut url = Url::parse(base)?;
    let scheme = match url.scheme() {
        "http" => "ws",
        "https" => "wss",
        other => {
            return Err(Error::validation(format!(
                "Unsupported base URL scheme {other}, expected http or https"
            )));
        }
    };

    url.set_scheme(scheme)
        .map_err(|()| Error::validation(format!("Unable to convert {base} to a WebSocket URL")))?;
    url.set_path(STATUS_UPDATES_PATH);
    url.set_query(None);
    url.set_fragment(None);

    Ok(url)
}

/// Real-time notification client for study status updates.
///
/// Cheap to clone; every clone shares one connection, one subscription set and one set
/// of listeners. Nothing connects until [`Client::connect`] is called.
///
/// # Examples
///
/// ```rust, no_run
/// use study_notifications::{Client, EventKind};
/// use study_notifications::ws::config::Config;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::new("wss://example.com/ws/status-updates", Config::default())?;
///
///     client.on(EventKind::StatusUpdate, |event| println!("{event:?}"));
///     client.subscribe_to_study("42");
///     client.connect().await?;
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

struct ClientInner {
    endpoint: Url,
    connection: ConnectionManager,
    bus: Arc<EventBus>,
}

impl Client {
    /// Create an anonymous client for `endpoint` (a `ws://` or `wss://` URL).
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `endpoint` is not a valid WebSocket URL.
    pub fn new(endpoint: &str, config: Config) -> Result<Self> {
        Self::with_credentials(endpoint, config, Anonymous)
    }

    /// Create a client that sends `credentials` in an `authenticate` frame after every open.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `endpoint` is not a valid WebSocket URL.
    pub fn with_credentials<C: CredentialProvider>(
        endpoint: &str,
        config: Config,
        credentials: C,
    ) -> Result<Self> {
        let endpoint = Url::parse(endpoint)?;
        if !matches!(endpoint.scheme(), "ws" | "wss") {
            return Err(Error::validation(format!(
                "Unsupported endpoint scheme {}, expected ws or wss",
                endpoint.scheme()
            )));
        }

        let bus = Arc::new(EventBus::new());
        let connection = ConnectionManager::new(
            endpoint.clone(),
            config,
            Arc::new(credentials),
            Arc::clone(&bus),
        );

        Ok(Self {
            inner: Arc::new(ClientInner {
                endpoint,
                connection,
                bus,
            }),
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &Url {
        &self.inner.endpoint
    }

    /// Open the connection. See [`ConnectionManager::connect`].
    ///
    /// # Errors
    ///
    /// The returned future fails with a [`crate::error::Kind::WebSocket`] error when the
    /// open fails or [`Client::disconnect`] cancels it. Automatic reconnection is
    /// scheduled either way unless the attempt was cancelled.
    pub fn connect(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        self.inner.connection.connect()
    }

    /// Close the connection, cancel any pending reconnect and forget every subscription.
    pub fn disconnect(&self) {
        self.inner.connection.disconnect();
    }

    /// Send a custom frame. Dropped (and logged) unless connected.
    pub fn send<T: Into<String>>(&self, msg_type: T, data: Value) {
        self.inner
            .connection
            .send(&OutboundMessage::new(msg_type, data));
    }

    pub fn subscribe(&self, topic: &str) {
        self.inner.connection.subscribe(topic);
    }

    pub fn unsubscribe(&self, topic: &str) {
        self.inner.connection.unsubscribe(topic);
    }

    /// Register a closure for `kind` and return its handle for [`Client::off`].
    pub fn on<F>(&self, kind: EventKind, listener: F) -> Listener
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let listener: Listener = Arc::new(listener);
        self.inner.bus.on(kind, Arc::clone(&listener));
        listener
    }

    /// Register an existing handle. Registering the same handle twice has no effect.
    pub fn on_listener(&self, kind: EventKind, listener: Listener) {
        self.inner.bus.on(kind, listener);
    }

    /// Remove `listener` from `kind`. Returns `true` if it was registered.
    pub fn off(&self, kind: EventKind, listener: &Listener) -> bool {
        self.inner.bus.off(kind, listener)
    }

    #[must_use]
    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.inner.bus.listener_count(kind)
    }

    pub fn clear_all_listeners(&self) {
        self.inner.bus.clear();
    }

    /// Synchronous snapshot of the connection; never blocks on I/O.
    #[must_use]
    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.connection.status()
    }

    /// Subscribe to `study.{id}`, `study.{id}.status` and `study.{id}.versions`.
    pub fn subscribe_to_study(&self, study_id: &str) {
        for topic in study_topics(study_id) {
            self.subscribe(&topic);
        }
    }

    /// Unsubscribe from the three topics added by [`Client::subscribe_to_study`].
    pub fn unsubscribe_from_study(&self, study_id: &str) {
        for topic in study_topics(study_id) {
            self.unsubscribe(&topic);
        }
    }

    /// Subscribe to global status computation and validation results.
    pub fn subscribe_to_status_computation(&self) {
        self.subscribe(STATUS_COMPUTATION_TOPIC);
        self.subscribe(STATUS_VALIDATION_TOPIC);
    }

    /// Ask the server to recompute the status of `study_id` now.
    pub fn request_status_computation(&self, study_id: &str) {
        self.inner
            .connection
            .send(&OutboundMessage::request_status_computation(study_id));
    }

    pub fn request_health_check(&self) {
        self.inner.connection.send(&OutboundMessage::health_check());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::error::Kind;

    #[test]
    fn endpoint_from_https_base() {
        let url = endpoint_from_base_url("https://api.example.com/api/v1").unwrap();

        assert_eq!(url.as_str(), "wss://api.example.com/ws/status-updates");
    }

    #[test]
    fn endpoint_from_http_base_keeps_port() {
        let url = endpoint_from_base_url("http://localhost:8080").unwrap();

        assert_eq!(url.as_str(), "ws://localhost:8080/ws/status-updates");
    }

    #[test]
    fn endpoint_from_unsupported_scheme_fails() {
        let error = endpoint_from_base_url("ftp://example.com").unwrap_err();

        assert_eq!(error.kind(), Kind::Validation);
    }

    #[tokio::test]
    async fn rejects_non_websocket_endpoint() {
        let Err(error) = Client::new("https://example.com", Config::default()) else {
            panic!("https endpoint must be rejected");
        };

        assert_eq!(error.kind(), Kind::Validation);
    }

    #[tokio::test]
    async fn study_helpers_round_trip() {
        let client = Client::new("ws://127.0.0.1:9/ws", Config::default()).unwrap();

        client.subscribe_to_study("42");
        assert_eq!(
            client.connection_status().subscribed_topics,
            vec!["study.42", "study.42.status", "study.42.versions"]
        );

        client.unsubscribe_from_study("42");
        assert!(client.connection_status().subscribed_topics.is_empty());
    }

    #[tokio::test]
    async fn status_computation_topics() {
        let client = Client::new("ws://127.0.0.1:9/ws", Config::default()).unwrap();

        client.subscribe_to_status_computation();

        let status = client.connection_status();
        assert!(!status.is_connected);
        assert_eq!(status.reconnect_attempts, 0);
        assert_eq!(
            status.subscribed_topics,
            vec![STATUS_COMPUTATION_TOPIC, STATUS_VALIDATION_TOPIC]
        );
    }

    #[tokio::test]
    async fn on_returns_handle_for_off() {
        let client = Client::new("ws://127.0.0.1:9/ws", Config::default()).unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);

        let handle = client.on(EventKind::Connected, move |_event| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        client.on_listener(EventKind::Connected, Arc::clone(&handle));
        assert_eq!(client.listener_count(EventKind::Connected), 1);

        assert!(client.off(EventKind::Connected, &handle));
        assert_eq!(client.listener_count(EventKind::Connected), 0);

        client.on(EventKind::Error, |_event| {});
        client.clear_all_listeners();
        assert_eq!(client.listener_count(EventKind::Error), 0);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
