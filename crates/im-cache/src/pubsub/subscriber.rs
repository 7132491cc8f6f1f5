//! Redis Pub/Sub subscriber.
//!
//! Listens on the presence channel and re-broadcasts every decoded change to
//! local receivers. The connection is re-established after any error until
//! the shutdown token fires.

use futures_util::StreamExt;
use im_core::PresenceChange;
use redis::Client;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Error type for subscriber operations
#[derive(Debug, thiserror::Error)]
pub enum SubscriberError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Pub/Sub stream ended")]
    StreamEnded,
}

/// Result type for subscriber operations
pub type SubscriberResult<T> = Result<T, SubscriberError>;

/// Subscriber configuration
#[derive(Debug, Clone)]
pub struct SubscriberConfig {
    /// Redis connection URL
    pub redis_url: String,
    /// Channel to listen on
    pub channel: String,
    /// Reconnection delay in milliseconds
    pub reconnect_delay_ms: u64,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            channel: super::USER_ONLINE_CHANNEL.to_string(),
            reconnect_delay_ms: 1000,
        }
    }
}

/// Background presence-channel listener
#[derive(Debug)]
pub struct Subscriber {
    handle: JoinHandle<()>,
}

impl Subscriber {
    /// Spawn the listener; decoded changes are sent on `changes`
    #[must_use]
    pub fn start(
        config: SubscriberConfig,
        changes: broadcast::Sender<PresenceChange>,
        shutdown: CancellationToken,
    ) -> Self {
        let handle = tokio::spawn(Self::listener_loop(config, changes, shutdown));
        Self { handle }
    }

    /// Whether the background task has exited
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    async fn listener_loop(
        config: SubscriberConfig,
        changes: broadcast::Sender<PresenceChange>,
        shutdown: CancellationToken,
    ) {
        let delay = Duration::from_millis(config.reconnect_delay_ms);

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                result = Self::run_listener(&config, &changes) => {
                    if let Err(e) = result {
                        tracing::error!(error = %e, channel = %config.channel, "Subscriber error, reconnecting...");
                    }
                }
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(delay) => {}
            }
        }

        tracing::info!(channel = %config.channel, "Subscriber shutting down");
    }

    /// Run the listener until the connection fails
    async fn run_listener(
        config: &SubscriberConfig,
        changes: &broadcast::Sender<PresenceChange>,
    ) -> SubscriberResult<()> {
        let client = Client::open(config.redis_url.as_str())?;
        let mut pubsub = client.get_async_pubsub().await?;
        pubsub.subscribe(&config.channel).await?;

        tracing::info!(channel = %config.channel, "Subscriber connected to Redis");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let payload: String = match msg.get_payload() {
                Ok(payload) => payload,
                Err(e) => {
                    tracing::warn!(error = %e, "Unreadable Pub/Sub payload");
                    continue;
                }
            };

            match decode_change(&payload) {
                Some(change) => {
                    tracing::trace!(user_id = %change.user_id, "Received presence change");
                    // No receivers is not an error
                    let _ = changes.send(change);
                }
                None => tracing::warn!(payload = %payload, "Malformed presence change"),
            }
        }

        Err(SubscriberError::StreamEnded)
    }
}

fn decode_change(payload: &str) -> Option<PresenceChange> {
    serde_json::from_str(payload).ok()
}
