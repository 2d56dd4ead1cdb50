//! Watch live status notifications for one study.
//!
//! Subscribes to a study's topics plus the global computation topics, asks the server
//! for a fresh status computation, and prints every event for a minute.
//!
//! Run with tracing enabled:
//! ```sh
//! NOTIFICATIONS_URL=ws://localhost:8080/ws/status-updates \
//!     RUST_LOG=info cargo run --example study_status -- 42
//! ```
//!
//! Set `NOTIFICATIONS_TOKEN` to send an `authenticate` frame after every open.

use std::env;
use std::time::Duration;

use study_notifications::auth::{SecretString, StaticToken};
use study_notifications::ws::config::Config;
use study_notifications::{Client, Event, EventKind};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const EVENT_KINDS: [EventKind; 9] = [
    EventKind::Connected,
    EventKind::Disconnected,
    EventKind::Error,
    EventKind::StatusUpdate,
    EventKind::StudyUpdate,
    EventKind::VersionUpdate,
    EventKind::ComputationComplete,
    EventKind::ValidationResult,
    EventKind::ServerError,
];

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let endpoint = env::var("NOTIFICATIONS_URL")
        .unwrap_or_else(|_| "ws://localhost:8080/ws/status-updates".to_owned());
    let study_id = env::args().nth(1).unwrap_or_else(|| "1".to_owned());

    let mut config = Config::default();
    config.reconnect.max_attempts = None;

    let client = match env::var("NOTIFICATIONS_TOKEN") {
        Ok(token) => Client::with_credentials(&endpoint, config, StaticToken::new(token))?,
        Err(_) => Client::with_credentials(&endpoint, config, || None::<SecretString>)?,
    };

    let (tx, mut rx) = mpsc::unbounded_channel::<Event>();
    for kind in EVENT_KINDS {
        let tx = tx.clone();
        client.on(kind, move |event| {
            _ = tx.send(event.clone());
        });
    }

    client.subscribe_to_study(&study_id);
    client.subscribe_to_status_computation();

    if let Err(e) = client.connect().await {
        warn!(error = %e, "Initial connect failed, reconnecting in the background");
    }

    let status = client.connection_status();
    info!(
        connected = status.is_connected,
        topics = ?status.subscribed_topics,
        "Connection status"
    );

    client.request_status_computation(&study_id);
    client.request_health_check();

    while let Ok(Some(event)) = timeout(Duration::from_secs(60), rx.recv()).await {
        match event {
            Event::StatusUpdate(update) => info!(
                study = ?update.study_id,
                from = ?update.previous_status,
                to = ?update.status,
                "Status changed"
            ),
            Event::Disconnected(close) => warn!(code = ?close.code, reason = %close.reason, "Disconnected"),
            other => info!(event = %other.kind(), payload = ?other),
        }
    }

    client.disconnect();
    info!(status = ?client.connection_status(), "Done");

    Ok(())
}
