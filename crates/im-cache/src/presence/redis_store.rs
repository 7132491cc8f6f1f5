//! User presence storage in Redis.
//!
//! Each user has a set of online platform IDs under `im:online:{userID}`.
//! After an update the resulting set is published on the presence channel so
//! every gateway, this one included, sees the change through its subscriber.

use async_trait::async_trait;
use futures::stream::BoxStream;
use im_core::{DomainError, DomainResult, PlatformId, PresenceChange, PresenceEvent, PresenceStore};
use redis::AsyncCommands;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::pool::{RedisPool, RedisResult};
use crate::pubsub::{Subscriber, SubscriberConfig, USER_ONLINE_CHANNEL};

/// Key prefix for per-user online platform sets
pub const ONLINE_KEY_PREFIX: &str = "im:online:";

/// Capacity of the local change broadcast
const CHANGE_BUFFER: usize = 1024;

/// Key holding the online platform set of a user
#[must_use]
pub fn online_key(user_id: &str) -> String {
    format!("{ONLINE_KEY_PREFIX}{user_id}")
}

/// Redis-backed presence store shared by every gateway instance
pub struct RedisPresenceStore {
    pool: RedisPool,
    ttl_secs: i64,
    changes: broadcast::Sender<PresenceChange>,
    _subscriber: Subscriber,
}

impl RedisPresenceStore {
    /// Create the store and start listening for changes published by any gateway
    ///
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(pool: RedisPool, ttl_secs: u64, shutdown: CancellationToken) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        let subscriber = Subscriber::start(
            SubscriberConfig {
                redis_url: pool.url().to_string(),
                ..SubscriberConfig::default()
            },
            changes.clone(),
            shutdown,
        );

        Self {
            pool,
            ttl_secs: i64::try_from(ttl_secs).unwrap_or(i64::MAX),
            changes,
            _subscriber: subscriber,
        }
    }

    /// Create the store from im-common config
    pub fn from_config(
        config: &im_common::RedisConfig,
        ttl_secs: u64,
        shutdown: CancellationToken,
    ) -> RedisResult<Self> {
        Ok(Self::new(RedisPool::from_config(config)?, ttl_secs, shutdown))
    }

    /// Apply one event and return the user's resulting platform set
    async fn apply(&self, event: &PresenceEvent) -> RedisResult<Vec<PlatformId>> {
        let key = online_key(&event.user_id);
        let offline: Vec<i32> = event.offline.iter().map(|p| p.as_i32()).collect();
        let online: Vec<i32> = event.online.iter().map(|p| p.as_i32()).collect();

        let mut pipe = redis::pipe();
        pipe.atomic();
        if !offline.is_empty() {
            pipe.srem(&key, &offline).ignore();
        }
        if !online.is_empty() {
            pipe.sadd(&key, &online).ignore();
            pipe.expire(&key, self.ttl_secs).ignore();
        }
        pipe.smembers(&key);

        let mut conn = self.pool.get().await?;
        let (members,): (Vec<i32>,) = pipe.query_async(&mut conn).await?;

        let mut platforms: Vec<PlatformId> = members.into_iter().map(PlatformId::new).collect();
        platforms.sort_unstable();
        Ok(platforms)
    }

    async fn publish(&self, change: &PresenceChange) -> RedisResult<()> {
        let payload = serde_json::to_string(change)?;
        let mut conn = self.pool.get().await?;
        conn.publish::<_, _, ()>(USER_ONLINE_CHANNEL, payload).await?;
        Ok(())
    }
}

impl std::fmt::Debug for RedisPresenceStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPresenceStore")
            .field("pool", &self.pool)
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

#[async_trait]
impl PresenceStore for RedisPresenceStore {
    async fn set_user_online_status(&self, batch: &[PresenceEvent]) -> DomainResult<()> {
        for event in batch {
            let platforms = self.apply(event).await?;
            self.publish(&PresenceChange::new(event.user_id.clone(), platforms))
                .await?;
        }

        tracing::debug!(count = batch.len(), "Presence batch stored");
        Ok(())
    }

    async fn get_user_online_platforms(&self, user_id: &str) -> DomainResult<Vec<PlatformId>> {
        let mut conn = self.pool.get().await?;
        let members: Vec<i32> = conn
            .smembers(online_key(user_id))
            .await
            .map_err(DomainError::internal)?;

        let mut platforms: Vec<PlatformId> = members.into_iter().map(PlatformId::new).collect();
        platforms.sort_unstable();
        Ok(platforms)
    }

    fn watch_changes(&self) -> BoxStream<'static, PresenceChange> {
        super::change_stream(self.changes.subscribe())
    }
}
