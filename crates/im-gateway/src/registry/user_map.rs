//! Per-user registry of live connections
//!
//! Connections are keyed by remote address inside each user's entry, so a
//! pooled or reused object is matched by the transport it stood for rather
//! than by identity. Every membership change emits a [`PresenceEvent`] on a
//! bounded channel while the write lock is still held, so per-user event order
//! matches mutation order.

use im_core::{PlatformId, PresenceEvent};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::connection::Connection;

#[derive(Debug, Default)]
struct UserPlatformSet {
    conns: HashMap<String, Arc<Connection>>,
    /// Unix milliseconds of the last presence event for this user
    last_pushed_at: i64,
}

impl UserPlatformSet {
    fn platforms(&self) -> BTreeSet<PlatformId> {
        self.conns.values().map(|c| c.platform_id()).collect()
    }
}

/// Concurrent user to connections map
#[derive(Debug)]
pub struct UserMap {
    inner: RwLock<HashMap<String, UserPlatformSet>>,
    state_tx: mpsc::Sender<PresenceEvent>,
}

impl UserMap {
    /// Create the registry and the receiving end of its presence stream
    #[must_use]
    pub fn new(channel_capacity: usize) -> (Self, mpsc::Receiver<PresenceEvent>) {
        let (state_tx, state_rx) = mpsc::channel(channel_capacity.max(1));
        (
            Self {
                inner: RwLock::new(HashMap::new()),
                state_tx,
            },
            state_rx,
        )
    }

    /// Every connection of `user_id`, `None` when the user has none
    pub fn get_all(&self, user_id: &str) -> Option<Vec<Arc<Connection>>> {
        let inner = self.inner.read();
        inner
            .get(user_id)
            .map(|set| set.conns.values().cloned().collect())
    }

    /// Connections of `user_id` on `platform_id`, plus whether the user and
    /// the platform were found
    pub fn get(&self, user_id: &str, platform_id: PlatformId) -> (Vec<Arc<Connection>>, bool, bool) {
        let inner = self.inner.read();
        let Some(set) = inner.get(user_id) else {
            return (Vec::new(), false, false);
        };
        let conns: Vec<_> = set
            .conns
            .values()
            .filter(|c| c.platform_id() == platform_id)
            .cloned()
            .collect();
        let found = !conns.is_empty();
        (conns, true, found)
    }

    /// Whether exactly this object is registered under `user_id`
    pub fn contains(&self, user_id: &str, conn: &Arc<Connection>) -> bool {
        let inner = self.inner.read();
        inner
            .get(user_id)
            .and_then(|set| set.conns.get(conn.remote_addr()))
            .is_some_and(|existing| Arc::ptr_eq(existing, conn))
    }

    /// Add a connection; returns `true` when the user came online
    pub fn set(&self, user_id: &str, conn: Arc<Connection>) -> bool {
        let mut inner = self.inner.write();
        let came_online = !inner.contains_key(user_id);
        let set = inner.entry(user_id.to_string()).or_default();

        let platform_id = conn.platform_id();
        if let Some(replaced) = set.conns.insert(conn.remote_addr().to_string(), Arc::clone(&conn)) {
            if !Arc::ptr_eq(&replaced, &conn) {
                tracing::warn!(
                    user_id = %user_id,
                    remote_addr = %conn.remote_addr(),
                    replaced_conn_id = %replaced.conn_id(),
                    conn_id = %conn.conn_id(),
                    "Registry entry replaced by a connection with the same remote address"
                );
            }
        }

        let event = PresenceEvent::new(user_id, set.platforms().into_iter().collect(), Vec::new());
        debug_assert!(event.online.contains(&platform_id));
        self.send_locked(set, event);
        came_online
    }

    /// Remove connections by remote address; returns `true` when the user
    /// has no connection left and was removed
    pub fn delete_connections(&self, user_id: &str, conns: &[Arc<Connection>]) -> bool {
        let mut inner = self.inner.write();
        let Some(set) = inner.get_mut(user_id) else {
            return false;
        };

        let mut removed = BTreeSet::new();
        for conn in conns {
            if let Some(old) = set.conns.remove(conn.remote_addr()) {
                removed.insert(old.platform_id());
            }
        }
        if removed.is_empty() {
            return false;
        }

        let remaining = set.platforms();
        let offline: Vec<_> = removed.difference(&remaining).copied().collect();
        let event = PresenceEvent::new(user_id, remaining.into_iter().collect(), offline);
        self.send_locked(set, event);

        if set.conns.is_empty() {
            inner.remove(user_id);
            return true;
        }
        false
    }

    /// Full-state events for users not announced since `older_than`.
    ///
    /// Each returned user is stamped with `now`.
    pub fn snapshot(&self, older_than: i64, now: i64) -> Vec<PresenceEvent> {
        let mut inner = self.inner.write();
        inner
            .iter_mut()
            .filter(|(_, set)| set.last_pushed_at < older_than)
            .map(|(user_id, set)| {
                set.last_pushed_at = now;
                PresenceEvent::new(user_id.clone(), set.platforms().into_iter().collect(), Vec::new())
            })
            .collect()
    }

    pub fn user_count(&self) -> usize {
        self.inner.read().len()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.read().values().map(|set| set.conns.len()).sum()
    }

    /// Non-blocking send; caller holds the write lock
    fn send_locked(&self, set: &mut UserPlatformSet, event: PresenceEvent) {
        match self.state_tx.try_send(event) {
            Ok(()) => set.last_pushed_at = chrono::Utc::now().timestamp_millis(),
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(user_id = %event.user_id, "Presence channel full, event dropped");
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(user_id = %event.user_id, "Presence channel closed");
            }
        }
    }
}
