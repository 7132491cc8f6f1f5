//! # im-cache
//!
//! Presence store adapters for the gateway.
//!
//! ## Features
//!
//! - **Connection Pool**: Managed Redis connection pool with deadpool
//! - **Redis Presence**: Per-user platform sets with TTL, changes published over Pub/Sub
//! - **Memory Presence**: Single-node store backed by a concurrent map
//!
//! ## Example
//!
//! ```ignore
//! use im_cache::{MemoryPresenceStore, RedisPresenceStore};
//!
//! // Single node
//! let store = MemoryPresenceStore::new(1024);
//!
//! // Cluster
//! let store = RedisPresenceStore::from_config(&redis_config, ttl_secs, shutdown.clone())?;
//! let mut changes = store.watch_changes();
//! ```

pub mod pool;
pub mod presence;
pub mod pubsub;

// Re-export pool types
pub use pool::{RedisPool, RedisPoolError, RedisResult};

// Re-export presence types
pub use presence::{online_key, MemoryPresenceStore, RedisPresenceStore, ONLINE_KEY_PREFIX};

// Re-export pubsub types
pub use pubsub::{
    Subscriber, SubscriberConfig, SubscriberError, SubscriberResult, USER_ONLINE_CHANNEL,
};
