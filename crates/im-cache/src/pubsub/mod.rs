//! Redis Pub/Sub module.
//!
//! Carries presence changes between gateway instances.

mod subscriber;

pub use subscriber::{Subscriber, SubscriberConfig, SubscriberError, SubscriberResult};

/// Channel every gateway publishes applied presence changes on
pub const USER_ONLINE_CHANNEL: &str = "im:user_online";
