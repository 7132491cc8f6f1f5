//! Pooled Redis connections for presence writes.

use deadpool_redis::{Config, Pool, Runtime};
use im_common::RedisConfig;

/// Error type for Redis presence operations
#[derive(Debug, thiserror::Error)]
pub enum RedisPoolError {
    #[error("Failed to create Redis pool: {0}")]
    CreatePool(String),

    #[error("Failed to get connection from pool: {0}")]
    GetConnection(#[from] deadpool_redis::PoolError),

    #[error("Redis command error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl From<RedisPoolError> for im_core::DomainError {
    fn from(err: RedisPoolError) -> Self {
        match err {
            RedisPoolError::GetConnection(deadpool_redis::PoolError::Timeout(_)) => Self::Timeout {
                service: "presence store",
            },
            other => Self::internal(other),
        }
    }
}

pub type RedisResult<T> = Result<T, RedisPoolError>;

/// Connection pool shared by presence writes
///
/// Every stage of checkout is bounded by the configured timeout so a stalled
/// server delays one presence flush instead of the whole broadcaster.
#[derive(Clone)]
pub struct RedisPool {
    pool: Pool,
    url: String,
}

impl std::fmt::Debug for RedisPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisPool")
            .field("url", &redact(&self.url))
            .field("status", &self.pool.status())
            .finish()
    }
}

impl RedisPool {
    pub fn from_config(config: &RedisConfig) -> RedisResult<Self> {
        let timeout = Some(config.timeout());
        let pool = Config::from_url(&config.url)
            .builder()
            .map_err(|e| RedisPoolError::CreatePool(e.to_string()))?
            .max_size(config.max_connections as usize)
            .wait_timeout(timeout)
            .create_timeout(timeout)
            .recycle_timeout(timeout)
            .runtime(Runtime::Tokio1)
            .build()
            .map_err(|e| RedisPoolError::CreatePool(e.to_string()))?;

        tracing::info!(
            url = %redact(&config.url),
            max_connections = config.max_connections,
            timeout_ms = config.timeout_ms,
            "Redis pool created"
        );

        Ok(Self {
            pool,
            url: config.url.clone(),
        })
    }

    pub async fn get(&self) -> RedisResult<deadpool_redis::Connection> {
        Ok(self.pool.get().await?)
    }

    /// URL the pool connects to; the Pub/Sub subscriber dials the same server
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }
}

/// Strip credentials from a Redis URL for logging
fn redact(url: &str) -> &str {
    url.split('@').next_back().unwrap_or(url)
}
