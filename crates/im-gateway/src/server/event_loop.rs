//! Dispatcher loop
//!
//! Every registry mutation goes through this one task. Network calls that
//! follow from a mutation (kick notices, token invalidation, peer
//! announcements) are spawned so the loop never waits on I/O.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::sync::mpsc;

use super::gateway::{KickRequest, WsServer};
use crate::connection::Connection;
use crate::policy::KickDirective;

const KICKED_BY_LOGIN: &str = "kicked by another login";
const KICKED_BY_SERVER: &str = "kicked by server";

impl WsServer {
    pub(super) async fn run_event_loop(
        self: Arc<Self>,
        mut register: mpsc::Receiver<Arc<Connection>>,
        mut unregister: mpsc::Receiver<Arc<Connection>>,
        mut kick: mpsc::Receiver<KickRequest>,
    ) {
        tracing::info!("Dispatcher started");
        loop {
            tokio::select! {
                biased;
                () = self.shutdown.cancelled() => break,
                Some(conn) = register.recv() => self.register_client(conn),
                Some(conn) = unregister.recv() => self.unregister_client(conn),
                Some(request) = kick.recv() => self.handle_kick(request),
                else => break,
            }
        }

        // Finish mutations already queued before stopping.
        while let Ok(conn) = register.try_recv() {
            self.register_client(conn);
        }
        while let Ok(request) = kick.try_recv() {
            self.handle_kick(request);
        }
        while let Ok(conn) = unregister.try_recv() {
            self.unregister_client(conn);
        }
        tracing::info!(
            online_user_num = self.online_user_num.load(Ordering::Acquire),
            online_conn_num = self.online_conn_num.load(Ordering::Acquire),
            "Dispatcher stopped"
        );
    }

    fn register_client(&self, conn: Arc<Connection>) {
        // Its own unregister event is already queued.
        if conn.is_closed() {
            return;
        }

        if let Some(existing) = self.registry.get_all(conn.user_id()) {
            let directive = self.policy.evaluate(&conn, &existing);
            if !directive.is_empty() {
                self.apply_kick(conn.user_id(), directive, KICKED_BY_LOGIN);
            }
        }

        if self.registry.set(conn.user_id(), Arc::clone(&conn)) {
            self.online_user_num.fetch_add(1, Ordering::AcqRel);
        }
        self.online_conn_num.fetch_add(1, Ordering::AcqRel);

        tracing::info!(
            user_id = %conn.user_id(),
            platform_id = %conn.platform_id(),
            conn_id = %conn.conn_id(),
            remote_addr = %conn.remote_addr(),
            sdk_type = conn.sdk_type().as_str(),
            compress = conn.is_compressed(),
            "register"
        );

        if let Some(peers) = &self.peers {
            let peers = Arc::clone(peers);
            let timeout = self.rpc_timeout;
            let user_id = conn.user_id().to_string();
            let platform_id = conn.platform_id();
            let token = conn.token().to_string();
            tokio::spawn(async move {
                let call = peers.multi_terminal_login_check(&user_id, platform_id, &token);
                match tokio::time::timeout(timeout, call).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(user_id = %user_id, error = %e, "Peer login announcement failed"),
                    Err(_) => tracing::warn!(user_id = %user_id, "Peer login announcement timed out"),
                }
            });
        }
    }

    fn unregister_client(&self, conn: Arc<Connection>) {
        if self.registry.contains(conn.user_id(), &conn) {
            if self
                .registry
                .delete_connections(conn.user_id(), std::slice::from_ref(&conn))
            {
                self.online_user_num.fetch_sub(1, Ordering::AcqRel);
            }
            self.online_conn_num.fetch_sub(1, Ordering::AcqRel);

            tracing::info!(
                user_id = %conn.user_id(),
                platform_id = %conn.platform_id(),
                conn_id = %conn.conn_id(),
                remote_addr = %conn.remote_addr(),
                reason = conn.close_reason().as_deref().unwrap_or("closed"),
                "unregister"
            );
        }

        self.subscription.remove_connection(&conn);
        self.pool.put(conn);
    }

    fn handle_kick(&self, request: KickRequest) {
        match request {
            KickRequest::LoginCheck(remote) => {
                let Some(existing) = self.registry.get_all(remote.user_id()) else {
                    return;
                };
                let directive = self.policy.evaluate(&remote, &existing);
                if !directive.is_empty() {
                    self.apply_kick(remote.user_id(), directive, KICKED_BY_LOGIN);
                }
            }
            KickRequest::Evict { user_id, platform_id } => {
                let (conns, _, found) = self.registry.get(&user_id, platform_id);
                if !found {
                    tracing::debug!(user_id = %user_id, platform_id = %platform_id, "Nothing to kick");
                    return;
                }
                self.apply_kick(
                    &user_id,
                    KickDirective {
                        evict: conns,
                        tokens_to_invalidate: Vec::new(),
                    },
                    KICKED_BY_SERVER,
                );
            }
        }
    }

    /// Remove evicted connections from the registry, then notify and close
    /// each of them, then invalidate tokens.
    fn apply_kick(&self, user_id: &str, directive: KickDirective, reason: &'static str) {
        let KickDirective {
            evict,
            tokens_to_invalidate,
        } = directive;

        if !evict.is_empty() {
            if self.registry.delete_connections(user_id, &evict) {
                self.online_user_num.fetch_sub(1, Ordering::AcqRel);
            }
            self.online_conn_num
                .fetch_sub(i64::try_from(evict.len()).unwrap_or(i64::MAX), Ordering::AcqRel);

            for conn in evict {
                tracing::info!(
                    user_id = %conn.user_id(),
                    platform_id = %conn.platform_id(),
                    conn_id = %conn.conn_id(),
                    remote_addr = %conn.remote_addr(),
                    reason,
                    "kick"
                );
                let pool = Arc::clone(&self.pool);
                tokio::spawn(async move {
                    if let Err(e) = conn.kick_online_message().await {
                        tracing::debug!(conn_id = %conn.conn_id(), error = %e, "Kick notice not delivered");
                    }
                    conn.set_close_reason(reason);
                    conn.close().await;
                    pool.put(conn);
                });
            }
        }

        if !tokens_to_invalidate.is_empty() {
            let auth = Arc::clone(&self.auth);
            let timeout = self.rpc_timeout;
            let user_id = user_id.to_string();
            tokio::spawn(async move {
                match tokio::time::timeout(timeout, auth.kick_tokens(&user_id, &tokens_to_invalidate)).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => tracing::warn!(user_id = %user_id, error = %e, "Token invalidation failed"),
                    Err(_) => tracing::warn!(user_id = %user_id, "Token invalidation timed out"),
                }
            });
        }
    }
}
