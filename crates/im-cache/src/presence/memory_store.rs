//! In-process presence store for single-node deployments and tests.

use async_trait::async_trait;
use dashmap::DashMap;
use futures::stream::BoxStream;
use im_core::{DomainResult, PlatformId, PresenceChange, PresenceEvent, PresenceStore};
use std::collections::BTreeSet;
use tokio::sync::broadcast;

/// Presence store backed by a concurrent map
///
/// Changes are broadcast to every `watch_changes` stream of this instance.
#[derive(Debug)]
pub struct MemoryPresenceStore {
    users: DashMap<String, BTreeSet<PlatformId>>,
    changes: broadcast::Sender<PresenceChange>,
}

impl MemoryPresenceStore {
    #[must_use]
    pub fn new(change_buffer: usize) -> Self {
        let (changes, _) = broadcast::channel(change_buffer.max(1));
        Self {
            users: DashMap::new(),
            changes,
        }
    }

    /// Number of users with at least one online platform
    #[must_use]
    pub fn online_user_count(&self) -> usize {
        self.users.len()
    }

    fn apply(&self, event: &PresenceEvent) -> Vec<PlatformId> {
        let platforms: Vec<PlatformId> = {
            let mut entry = self.users.entry(event.user_id.clone()).or_default();
            for platform in &event.offline {
                entry.remove(platform);
            }
            entry.extend(event.online.iter().copied());
            entry.iter().copied().collect()
        };

        if platforms.is_empty() {
            self.users.remove_if(&event.user_id, |_, set| set.is_empty());
        }
        platforms
    }
}

impl Default for MemoryPresenceStore {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[async_trait]
impl PresenceStore for MemoryPresenceStore {
    async fn set_user_online_status(&self, batch: &[PresenceEvent]) -> DomainResult<()> {
        for event in batch {
            let platforms = self.apply(event);
            // No watchers is not an error
            let _ = self
                .changes
                .send(PresenceChange::new(event.user_id.clone(), platforms));
        }
        Ok(())
    }

    async fn get_user_online_platforms(&self, user_id: &str) -> DomainResult<Vec<PlatformId>> {
        Ok(self
            .users
            .get(user_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    fn watch_changes(&self) -> BoxStream<'static, PresenceChange> {
        super::change_stream(self.changes.subscribe())
    }
}
