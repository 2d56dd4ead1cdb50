#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use backoff::backoff::Backoff as _;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt as _, StreamExt as _};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{MissedTickBehavior, interval_at, sleep};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use url::Url;

use super::config::{Config, ReconnectBackoff};
use super::error::WsError;
use super::subscription::SubscriptionRegistry;
use crate::Result;
use crate::auth::CredentialProvider;
use crate::events::{CloseInfo, Event, EventBus};
use crate::types::request::OutboundMessage;
use crate::types::response::{InboundFrame, parse_frame};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsRead = SplitStream<WsStream>;
type Reply = oneshot::Sender<std::result::Result<(), WsError>>;

const MANUAL_CLOSE_REASON: &str = "Manual disconnect";

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected, and no attempt is pending
    #[default]
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Successfully connected
    Connected {
        /// When the connection was established
        since: Instant,
    },
    /// Waiting out the backoff delay before the next attempt
    Reconnecting {
        /// Current reconnection attempt number
        attempt: u32,
        /// Delay scheduled before this attempt
        delay: Duration,
    },
}

impl ConnectionState {
    /// Check if the connection is currently active.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Connected { .. })
    }
}

/// Synchronous snapshot of the connection, safe to take from inside a listener.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionStatus {
    /// Whether the socket is open and every tracked subscription has been replayed
    pub is_connected: bool,
    /// Reconnection attempts scheduled since the last successful open
    pub reconnect_attempts: u32,
    /// Every topic currently tracked, in replay order
    pub subscribed_topics: Vec<String>,
    /// Raw transport state
    pub state: ConnectionState,
}

/// State shared between the handles and the driver task, always accessed under one mutex.
#[derive(Debug, Default)]
struct Shared {
    state: ConnectionState,
    reconnect_attempts: u32,
    subscriptions: SubscriptionRegistry,
}

// Shared has no intermediate state that a panicking holder could leave inconsistent.
fn lock(shared: &Mutex<Shared>) -> MutexGuard<'_, Shared> {
    shared.lock().unwrap_or_else(PoisonError::into_inner)
}

enum Command {
    Connect(Reply),
    Disconnect,
    Send(String),
}

/// Manages the WebSocket connection lifecycle, reconnection, heartbeat and subscription replay.
///
/// A single background task (the driver) exclusively owns the socket, the heartbeat ticker and
/// the reconnect timer. Handles talk to it over a command channel; the connection state and the
/// subscription registry live behind one mutex so status reads and `disconnect` take effect
/// synchronously.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Mutex<Shared>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl ConnectionManager {
    /// Create a new connection manager and spawn its driver task.
    ///
    /// No connection is opened until [`ConnectionManager::connect`] is called.
    /// Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(
        endpoint: Url,
        config: Config,
        credentials: Arc<dyn CredentialProvider>,
        bus: Arc<EventBus>,
    ) -> Self {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Mutex::new(Shared::default()));

        let driver = Driver {
            endpoint,
            backoff: ReconnectBackoff::from(&config.reconnect),
            config,
            credentials,
            bus,
            shared: Arc::clone(&shared),
            commands: command_rx,
            waiters: Vec::new(),
        };
        tokio::spawn(driver.run());

        Self { shared, commands }
    }

    /// Open the connection.
    ///
    /// The request is queued immediately, so the returned future may be dropped for
    /// fire-and-forget use. Calls made while an attempt is in flight share that attempt's
    /// outcome instead of opening a second socket; calls made while connected resolve at once.
    pub fn connect(&self) -> impl Future<Output = Result<()>> + Send + 'static {
        let (reply_tx, reply_rx) = oneshot::channel();
        let queued = self.commands.send(Command::Connect(reply_tx)).is_ok();

        async move {
            if !queued {
                return Err(WsError::ConnectionClosed.into());
            }
            match reply_rx.await {
                Ok(outcome) => outcome.map_err(Into::into),
                Err(_closed) => Err(WsError::ConnectionClosed.into()),
            }
        }
    }

    /// Close the connection with a normal-closure code and forget every tracked topic.
    ///
    /// Cancels any pending reconnect and stops the heartbeat. Safe to call when already
    /// disconnected.
    pub fn disconnect(&self) {
        {
            let mut shared = lock(&self.shared);
            shared.state = ConnectionState::Disconnected;
            shared.subscriptions.clear();
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Disconnecting WebSocket");

        // The driver is gone only once every handle has been dropped.
        _ = self.commands.send(Command::Disconnect);
    }

    /// Write `message` if connected; otherwise log and drop it.
    pub fn send(&self, message: &OutboundMessage) {
        let shared = lock(&self.shared);
        if !shared.state.is_connected() {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                msg_type = %message.msg_type,
                "Cannot send message: WebSocket not connected"
            );
            return;
        }
        self.enqueue(message);
    }

    /// Track `topic`, sending a `subscribe` frame right away when connected.
    pub fn subscribe(&self, topic: &str) {
        let mut shared = lock(&self.shared);
        let added = shared.subscriptions.insert(topic);

        #[cfg(feature = "tracing")]
        tracing::debug!(%topic, added, "Subscribing to topic");

        if added && shared.state.is_connected() {
            self.enqueue(&OutboundMessage::subscribe(topic));
        }
    }

    /// Stop tracking `topic`, sending an `unsubscribe` frame right away when connected.
    pub fn unsubscribe(&self, topic: &str) {
        let mut shared = lock(&self.shared);
        let removed = shared.subscriptions.remove(topic);

        #[cfg(feature = "tracing")]
        tracing::debug!(%topic, removed, "Unsubscribing from topic");

        if removed && shared.state.is_connected() {
            self.enqueue(&OutboundMessage::unsubscribe(topic));
        }
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        lock(&self.shared).state
    }

    #[must_use]
    pub fn status(&self) -> ConnectionStatus {
        let shared = lock(&self.shared);
        ConnectionStatus {
            is_connected: shared.state.is_connected(),
            reconnect_attempts: shared.reconnect_attempts,
            subscribed_topics: shared.subscriptions.snapshot(),
            state: shared.state,
        }
    }

    // Callers hold the shared lock so the frame is ordered after any replay already under way.
    fn enqueue(&self, message: &OutboundMessage) {
        match message.to_json() {
            Ok(json) => {
                _ = self.commands.send(Command::Send(json));
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::error!(msg_type = %message.msg_type, error = %e, "Failed to serialize message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }
}

/// Where the driver goes next.
enum Step {
    Idle,
    Connect,
    Wait(Duration),
    Shutdown,
}

/// How an open connection ended.
enum Closed {
    Manual,
    Lost { code: Option<u16>, reason: String },
}

impl Closed {
    fn lost<S: Into<String>>(reason: S) -> Self {
        Self::Lost {
            code: None,
            reason: reason.into(),
        }
    }
}

struct Driver {
    endpoint: Url,
    config: Config,
    backoff: ReconnectBackoff,
    credentials: Arc<dyn CredentialProvider>,
    bus: Arc<EventBus>,
    shared: Arc<Mutex<Shared>>,
    commands: mpsc::UnboundedReceiver<Command>,
    /// Callers awaiting the in-flight connection attempt
    waiters: Vec<Reply>,
}

impl Driver {
    async fn run(mut self) {
        let mut step = Step::Idle;
        loop {
            step = match step {
                Step::Idle => self.idle().await,
                Step::Connect => self.connect().await,
                Step::Wait(delay) => self.wait(delay).await,
                Step::Shutdown => break,
            };
        }

        #[cfg(feature = "tracing")]
        tracing::debug!("WebSocket driver stopped");
    }

    async fn idle(&mut self) -> Step {
        loop {
            match self.commands.recv().await {
                Some(Command::Connect(reply)) => {
                    self.waiters.push(reply);
                    self.backoff.reset();
                    let mut shared = lock(&self.shared);
                    shared.reconnect_attempts = 0;
                    shared.state = ConnectionState::Connecting;
                    return Step::Connect;
                }
                Some(Command::Disconnect) => {}
                Some(Command::Send(_)) => Self::log_dropped(),
                None => return Step::Shutdown,
            }
        }
    }

    async fn connect(&mut self) -> Step {
        #[cfg(feature = "tracing")]
        tracing::info!(endpoint = %self.endpoint, "Connecting to WebSocket");

        let attempt = connect_async(self.endpoint.to_string());
        tokio::pin!(attempt);

        let outcome = loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Connect(reply)) => self.waiters.push(reply),
                    Some(Command::Disconnect) => {
                        self.resolve_waiters(&Err(WsError::Aborted));
                        return Step::Idle;
                    }
                    Some(Command::Send(_)) => Self::log_dropped(),
                    None => return Step::Shutdown,
                },
                result = &mut attempt => break result,
            }
        };

        match outcome {
            Ok((stream, _response)) => self.connected(stream).await,
            Err(e) => {
                let error = Arc::new(e);

                #[cfg(feature = "tracing")]
                tracing::warn!(
                    endpoint = %self.endpoint,
                    attempt = self.backoff.attempt(),
                    error = %error,
                    "Unable to connect"
                );

                self.resolve_waiters(&Err(WsError::Connection(Arc::clone(&error))));
                self.bus.emit(&Event::Error {
                    message: error.to_string(),
                });
                self.schedule_retry()
            }
        }
    }

    async fn connected(&mut self, stream: WsStream) -> Step {
        let (mut write, mut read) = stream.split();

        let topics = {
            let mut shared = lock(&self.shared);
            if matches!(shared.state, ConnectionState::Connecting) {
                shared.state = ConnectionState::Connected {
                    since: Instant::now(),
                };
                shared.reconnect_attempts = 0;
                Some(shared.subscriptions.snapshot())
            } else {
                None
            }
        };

        // disconnect() ran while the handshake was completing
        let Some(topics) = topics else {
            _ = write.send(Message::Close(Some(manual_close_frame()))).await;
            self.resolve_waiters(&Err(WsError::Aborted));
            return Step::Idle;
        };
        self.backoff.reset();

        let closed = match self.replay(&mut write, &topics).await {
            Ok(()) => {
                #[cfg(feature = "tracing")]
                tracing::info!(topics = topics.len(), "WebSocket connected");

                self.resolve_waiters(&Ok(()));
                self.bus.emit(&Event::Connected);
                self.pump(&mut write, &mut read).await
            }
            Err(e) => Closed::lost(e.to_string()),
        };

        self.closed(closed)
    }

    /// Credential first, then one `subscribe` per tracked topic, before any other frame.
    async fn replay(&self, write: &mut WsSink, topics: &[String]) -> Result<()> {
        if let Some(token) = self.credentials.token() {
            #[cfg(feature = "tracing")]
            tracing::debug!("Sending authentication");
            send_frame(write, &OutboundMessage::authenticate(&token)).await?;
        }

        for topic in topics {
            #[cfg(feature = "tracing")]
            tracing::debug!(%topic, "Re-subscribing to topic");
            send_frame(write, &OutboundMessage::subscribe(topic)).await?;
        }

        Ok(())
    }

    async fn pump(&mut self, write: &mut WsSink, read: &mut WsRead) -> Closed {
        let period = self.config.heartbeat_interval;
        let mut heartbeat = interval_at(tokio::time::Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    Some(Command::Send(json)) => {
                        if let Err(e) = write.send(Message::Text(json.into())).await {
                            return Closed::lost(e.to_string());
                        }
                    }
                    Some(Command::Connect(reply)) => {
                        _ = reply.send(Ok(()));
                    }
                    Some(Command::Disconnect) | None => {
                        _ = write.send(Message::Close(Some(manual_close_frame()))).await;
                        return Closed::Manual;
                    }
                },

                message = read.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = self.dispatch(write, text.as_str()).await {
                            return Closed::lost(e.to_string());
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        return match frame {
                            Some(frame) => Closed::Lost {
                                code: Some(u16::from(frame.code)),
                                reason: frame.reason.as_str().to_owned(),
                            },
                            None => Closed::lost(""),
                        };
                    }
                    Some(Ok(_)) => {
                        // Binary frames are not part of the protocol; ping/pong is handled by tungstenite.
                    }
                    Some(Err(e)) => return Closed::lost(e.to_string()),
                    None => return Closed::lost("stream ended"),
                },

                _ = heartbeat.tick() => {
                    // disconnect() flips the state before the driver sees its command.
                    let connected = lock(&self.shared).state.is_connected();
                    if !connected {
                        continue;
                    }
                    if let Err(e) = send_frame(write, &OutboundMessage::heartbeat()).await {
                        return Closed::lost(e.to_string());
                    }
                }
            }
        }
    }

    /// Route one inbound text frame. Only a failed `heartbeat_ack` write is an error.
    async fn dispatch(&self, write: &mut WsSink, text: &str) -> Result<()> {
        match parse_frame(text.as_bytes()) {
            Ok(InboundFrame::Event(event)) => {
                if let Event::ServerError(error) = &event {
                    #[cfg(feature = "tracing")]
                    tracing::warn!(?error, "WebSocket server error");
                    #[cfg(not(feature = "tracing"))]
                    let _ = error;
                }

                #[cfg(feature = "tracing")]
                tracing::trace!(kind = %event.kind(), "Dispatching event");

                self.bus.emit(&event);
            }
            Ok(InboundFrame::Heartbeat) => {
                send_frame(write, &OutboundMessage::heartbeat_ack()).await?;
            }
            Ok(InboundFrame::HeartbeatAck) => {
                #[cfg(feature = "tracing")]
                tracing::trace!("Heartbeat acknowledged");
            }
            Ok(InboundFrame::SubscriptionConfirmed { topic }) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(?topic, "Subscription confirmed");
                #[cfg(not(feature = "tracing"))]
                let _ = &topic;
            }
            Ok(InboundFrame::Unknown { msg_type }) => {
                #[cfg(feature = "tracing")]
                tracing::debug!(%msg_type, "Unknown message type");
                #[cfg(not(feature = "tracing"))]
                let _ = &msg_type;
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(%text, error = %e, "Failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = (&text, &e);
            }
        }

        Ok(())
    }

    fn closed(&mut self, closed: Closed) -> Step {
        // Only callers that joined after a failed replay can still be waiting here.
        self.resolve_waiters(&Err(WsError::ConnectionClosed));

        let (code, reason, requested) = match closed {
            Closed::Manual => (
                Some(u16::from(CloseCode::Normal)),
                MANUAL_CLOSE_REASON.to_owned(),
                true,
            ),
            Closed::Lost { code, reason } => (code, reason, false),
        };

        // disconnect() may have flipped the state while the socket was failing
        let manual =
            requested || matches!(lock(&self.shared).state, ConnectionState::Disconnected);

        let step = if manual {
            lock(&self.shared).state = ConnectionState::Disconnected;

            #[cfg(feature = "tracing")]
            tracing::info!("WebSocket disconnected");

            Step::Idle
        } else {
            #[cfg(feature = "tracing")]
            tracing::warn!(?code, %reason, "WebSocket connection closed");

            self.schedule_retry()
        };

        self.bus.emit(&Event::Disconnected(CloseInfo {
            code,
            reason,
            manual,
        }));

        step
    }

    fn retries_exhausted(&self) -> bool {
        self.config
            .reconnect
            .max_attempts
            .is_some_and(|max| self.backoff.attempt() >= max)
    }

    /// Reconnection controller: decide whether and when to retry after a failure.
    fn schedule_retry(&mut self) -> Step {
        let mut shared = lock(&self.shared);

        if matches!(shared.state, ConnectionState::Disconnected) {
            // disconnect() terminated the reconnect path
            return Step::Idle;
        }

        if self.retries_exhausted() {
            shared.state = ConnectionState::Disconnected;
            drop(shared);

            #[cfg(feature = "tracing")]
            tracing::error!(
                attempts = self.backoff.attempt(),
                "Reconnection attempts exhausted, giving up"
            );

            self.resolve_waiters(&Err(WsError::RetriesExhausted {
                attempts: self.backoff.attempt(),
            }));
            return Step::Idle;
        }

        let delay = self
            .backoff
            .next_backoff()
            .unwrap_or(self.config.reconnect.max_backoff);
        let attempt = self.backoff.attempt();
        shared.state = ConnectionState::Reconnecting { attempt, delay };
        shared.reconnect_attempts = attempt;
        drop(shared);

        #[cfg(feature = "tracing")]
        tracing::info!(
            attempt,
            max_attempts = ?self.config.reconnect.max_attempts,
            ?delay,
            "Scheduling reconnection"
        );

        Step::Wait(delay)
    }

    async fn wait(&mut self, delay: Duration) -> Step {
        let timer = sleep(delay);
        tokio::pin!(timer);

        loop {
            tokio::select! {
                biased;

                command = self.commands.recv() => match command {
                    // Joins the scheduled attempt
                    Some(Command::Connect(reply)) => self.waiters.push(reply),
                    Some(Command::Disconnect) => {
                        self.resolve_waiters(&Err(WsError::Aborted));
                        return Step::Idle;
                    }
                    Some(Command::Send(_)) => Self::log_dropped(),
                    None => return Step::Shutdown,
                },
                () = &mut timer => {
                    let mut shared = lock(&self.shared);
                    if !matches!(shared.state, ConnectionState::Reconnecting { .. }) {
                        return Step::Idle;
                    }
                    shared.state = ConnectionState::Connecting;
                    return Step::Connect;
                }
            }
        }
    }

    fn resolve_waiters(&mut self, outcome: &std::result::Result<(), WsError>) {
        for waiter in self.waiters.drain(..) {
            _ = waiter.send(outcome.clone());
        }
    }

    fn log_dropped() {
        #[cfg(feature = "tracing")]
        tracing::warn!("Dropping message: WebSocket not connected");
    }
}

fn manual_close_frame() -> CloseFrame {
    CloseFrame {
        code: CloseCode::Normal,
        reason: MANUAL_CLOSE_REASON.into(),
    }
}

async fn send_frame(write: &mut WsSink, message: &OutboundMessage) -> Result<()> {
    let json = message.to_json()?;
    write.send(Message::Text(json.into())).await?;
    Ok(())
}
