//! Presence store implementations.

mod memory_store;
mod redis_store;

pub use memory_store::MemoryPresenceStore;
pub use redis_store::{online_key, RedisPresenceStore, ONLINE_KEY_PREFIX};

use futures::stream::{self, BoxStream, StreamExt};
use im_core::PresenceChange;
use tokio::sync::broadcast;

/// Turn a broadcast receiver into the change stream the gateway consumes.
///
/// A lagging consumer skips what it missed; the anti-entropy scan repairs it.
pub(crate) fn change_stream(
    rx: broadcast::Receiver<PresenceChange>,
) -> BoxStream<'static, PresenceChange> {
    stream::unfold(rx, |mut rx| async move {
        loop {
            match rx.recv().await {
                Ok(change) => return Some((change, rx)),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Presence change feed lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .boxed()
}
