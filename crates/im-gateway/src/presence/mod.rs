//! Presence distribution
//!
//! The broadcaster moves local registry deltas into the presence store; the
//! subscription manager turns store changes into pushes to watching clients.

mod broadcaster;
mod subscription;

pub use broadcaster::{BroadcasterConfig, PresenceBroadcaster};
pub use subscription::Subscription;
