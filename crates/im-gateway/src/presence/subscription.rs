//! Presence subscriptions
//!
//! Each connection keeps the set of users it watches; the shared index maps a
//! watched user to the subscribed connections by remote address. Both sides
//! change together, connection lock first, index lock second.

use futures::future::join_all;
use im_core::PlatformId;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

use crate::connection::Connection;
use crate::protocol::OnlineStatusPush;

#[derive(Debug, Default)]
pub struct Subscription {
    users: RwLock<HashMap<String, HashMap<String, Arc<Connection>>>>,
}

impl Subscription {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add and remove watched users for `conn`
    ///
    /// A closed connection is ignored: its teardown may already have drained
    /// the index, and nothing would remove it a second time.
    pub fn sub(&self, conn: &Arc<Connection>, add: &[String], del: &[String]) {
        let mut own = conn.subscriptions().lock();
        if conn.is_closed() {
            return;
        }
        let mut users = self.users.write();

        for user_id in del {
            if !own.remove(user_id) {
                continue;
            }
            Self::unlink(&mut users, user_id, conn);
        }
        for user_id in add {
            if !own.insert(user_id.clone()) {
                continue;
            }
            users
                .entry(user_id.clone())
                .or_default()
                .insert(conn.remote_addr().to_string(), Arc::clone(conn));
        }
    }

    /// Drop every subscription `conn` holds; called once on disconnect
    pub fn remove_connection(&self, conn: &Arc<Connection>) {
        let mut own = conn.subscriptions().lock();
        if own.is_empty() {
            return;
        }
        let mut users = self.users.write();
        for user_id in own.drain() {
            Self::unlink(&mut users, &user_id, conn);
        }
    }

    /// Current subscribers of `user_id`
    pub fn get_clients(&self, user_id: &str) -> Vec<Arc<Connection>> {
        self.users
            .read()
            .get(user_id)
            .map(|conns| conns.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn subscribed_user_count(&self) -> usize {
        self.users.read().len()
    }

    /// Push the new platform set of `user_id` to each of its subscribers.
    ///
    /// One failed push is logged and does not stop the others.
    pub async fn notify_presence_change(&self, user_id: &str, platform_ids: &[PlatformId]) {
        let subscribers = self.get_clients(user_id);
        if subscribers.is_empty() {
            return;
        }
        let status = OnlineStatusPush::new(user_id, platform_ids.to_vec());

        let results = join_all(subscribers.iter().map(|conn| conn.push_online_status(&status))).await;
        for (conn, result) in subscribers.iter().zip(results) {
            if let Err(e) = result {
                tracing::warn!(
                    user_id = %user_id,
                    subscriber = %conn.user_id(),
                    conn_id = %conn.conn_id(),
                    error = %e,
                    "Presence push failed"
                );
            }
        }
    }

    fn unlink(users: &mut HashMap<String, HashMap<String, Arc<Connection>>>, user_id: &str, conn: &Arc<Connection>) {
        let Some(conns) = users.get_mut(user_id) else {
            return;
        };
        if conns
            .get(conn.remote_addr())
            .is_some_and(|existing| Arc::ptr_eq(existing, conn))
        {
            conns.remove(conn.remote_addr());
        }
        if conns.is_empty() {
            users.remove(user_id);
        }
    }
}
