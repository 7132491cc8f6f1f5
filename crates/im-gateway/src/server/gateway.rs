//! Gateway server state
//!
//! One `WsServer` is built per process and shared by the HTTP handlers, the
//! dispatcher loop and the background presence tasks.

use futures::StreamExt;
use im_common::{AppConfig, AppError, AppResult, WebSocketConfig};
use im_core::{AuthService, MessageService, PeerGateway, PlatformId, PresenceEvent, PresenceStore};
use serde::Serialize;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::connection::{Connection, ConnectionHooks, ConnectionPool, ReadLoop};
use crate::handlers::{GatewayError, GatewayResult, MessageDispatcher};
use crate::policy::MultiTerminalPolicy;
use crate::presence::{BroadcasterConfig, PresenceBroadcaster, Subscription};
use crate::protocol::{GatewayCodec, GzipCompressor, JsonEncoder};
use crate::registry::UserMap;

/// Capacity of the register, unregister and kick channels
const EVENT_CHANNEL_CAPACITY: usize = 1000;

/// Upper bound on idle pooled connections
const MAX_POOLED_CONNECTIONS: usize = 4096;

/// Work for the dispatcher that does not come from a local handshake
#[derive(Debug)]
pub enum KickRequest {
    /// A login on another node; evaluated against local connections only
    LoginCheck(Arc<Connection>),
    /// Evict every connection of a user on one platform
    Evict { user_id: String, platform_id: PlatformId },
}

/// Receiving ends consumed by [`WsServer::start`]
pub struct Receivers {
    pub(super) register: mpsc::Receiver<Arc<Connection>>,
    pub(super) unregister: mpsc::Receiver<Arc<Connection>>,
    pub(super) kick: mpsc::Receiver<KickRequest>,
    state: mpsc::Receiver<PresenceEvent>,
}

/// Counters reported on `/stats`
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    pub online_user_num: i64,
    pub online_conn_num: i64,
    pub registry_users: usize,
    pub registry_connections: usize,
    pub subscribed_users: usize,
    pub pooled_idle: usize,
    pub pooled_allocated: usize,
}

/// Process-wide gateway state
pub struct WsServer {
    pub(super) registry: Arc<UserMap>,
    pub(super) subscription: Arc<Subscription>,
    pub(super) policy: MultiTerminalPolicy,
    pub(super) auth: Arc<dyn AuthService>,
    presence: Arc<dyn PresenceStore>,
    pub(super) peers: Option<Arc<dyn PeerGateway>>,
    pub(super) read_loop: Arc<ReadLoop>,
    pub(super) pool: Arc<ConnectionPool>,
    pub(super) codec: Arc<GatewayCodec>,

    pub(super) register_tx: mpsc::Sender<Arc<Connection>>,
    unregister_tx: mpsc::Sender<Arc<Connection>>,
    pub(super) kick_tx: mpsc::Sender<KickRequest>,

    pub(super) online_user_num: AtomicI64,
    pub(super) online_conn_num: AtomicI64,

    pub(super) websocket: WebSocketConfig,
    broadcaster: BroadcasterConfig,
    pub(super) rpc_timeout: Duration,
    pub(super) shutdown: CancellationToken,
}

impl WsServer {
    /// Spawn the dispatcher loop, the presence broadcaster and the presence
    /// change listener.
    ///
    /// All three stop when the shutdown token is cancelled.
    pub fn start(self: &Arc<Self>, receivers: Receivers) -> JoinSet<()> {
        let Receivers {
            register,
            unregister,
            kick,
            state,
        } = receivers;
        let mut tasks = JoinSet::new();

        let server = Arc::clone(self);
        tasks.spawn(async move { server.run_event_loop(register, unregister, kick).await });

        let broadcaster = PresenceBroadcaster::new(
            Arc::clone(&self.presence),
            Arc::clone(&self.registry),
            self.broadcaster.clone(),
        )
        .spawn(state, self.shutdown.clone());
        tasks.spawn(async move {
            if let Err(e) = broadcaster.await {
                tracing::error!(error = %e, "Presence broadcaster failed");
            }
        });

        let server = Arc::clone(self);
        tasks.spawn(async move { server.listen_presence_changes().await });

        tasks
    }

    /// Forward store-level presence changes to local subscribers
    async fn listen_presence_changes(&self) {
        let mut changes = self.presence.watch_changes();
        loop {
            let change = tokio::select! {
                () = self.shutdown.cancelled() => break,
                change = changes.next() => change,
            };
            let Some(change) = change else {
                tracing::warn!("Presence change feed ended");
                break;
            };
            self.subscription
                .notify_presence_change(&change.user_id, &change.platform_ids)
                .await;
        }
    }

    /// Verify the handshake token and that it belongs to the claimed identity
    pub async fn authenticate(&self, token: &str, user_id: &str, platform_id: PlatformId) -> GatewayResult<()> {
        let claims = tokio::time::timeout(self.websocket.handshake_timeout(), self.auth.parse_token(token))
            .await
            .map_err(|_| GatewayError::Auth(im_core::DomainError::Timeout { service: "auth" }))?
            .map_err(GatewayError::Auth)?;

        if claims.user_id != user_id || claims.platform_id != platform_id {
            return Err(GatewayError::IdentityMismatch);
        }
        Ok(())
    }

    pub fn is_over_limit(&self) -> bool {
        let limit = i64::try_from(self.websocket.max_conn_num).unwrap_or(i64::MAX);
        self.online_conn_num.load(Ordering::Acquire) >= limit
    }

    pub(super) fn connection_hooks(&self) -> ConnectionHooks {
        ConnectionHooks {
            unregister: self.unregister_tx.clone(),
            cancel: self.shutdown.child_token(),
            write_timeout: self.websocket.write_wait(),
        }
    }

    pub fn registry(&self) -> &UserMap {
        &self.registry
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            online_user_num: self.online_user_num.load(Ordering::Acquire),
            online_conn_num: self.online_conn_num.load(Ordering::Acquire),
            registry_users: self.registry.user_count(),
            registry_connections: self.registry.connection_count(),
            subscribed_users: self.subscription.subscribed_user_count(),
            pooled_idle: self.pool.idle_len(),
            pooled_allocated: self.pool.allocated(),
        }
    }
}

/// Builder for [`WsServer`]
pub struct WsServerBuilder {
    config: AppConfig,
    auth: Option<Arc<dyn AuthService>>,
    presence: Option<Arc<dyn PresenceStore>>,
    messages: Option<Arc<dyn MessageService>>,
    peers: Option<Arc<dyn PeerGateway>>,
    shutdown: Option<CancellationToken>,
}

impl WsServerBuilder {
    #[must_use]
    pub fn new(config: &AppConfig) -> Self {
        Self {
            config: config.clone(),
            auth: None,
            presence: None,
            messages: None,
            peers: None,
            shutdown: None,
        }
    }

    pub fn auth(mut self, auth: Arc<dyn AuthService>) -> Self {
        self.auth = Some(auth);
        self
    }

    pub fn presence(mut self, presence: Arc<dyn PresenceStore>) -> Self {
        self.presence = Some(presence);
        self
    }

    pub fn messages(mut self, messages: Arc<dyn MessageService>) -> Self {
        self.messages = Some(messages);
        self
    }

    /// Peer gateways to announce local logins to; optional
    pub fn peers(mut self, peers: Arc<dyn PeerGateway>) -> Self {
        self.peers = Some(peers);
        self
    }

    /// Share an existing shutdown token; a fresh one is created otherwise
    pub fn shutdown(mut self, shutdown: CancellationToken) -> Self {
        self.shutdown = Some(shutdown);
        self
    }

    pub fn build(self) -> AppResult<(Arc<WsServer>, Receivers)> {
        let auth = self
            .auth
            .ok_or_else(|| AppError::Config("auth is required".into()))?;
        let presence = self
            .presence
            .ok_or_else(|| AppError::Config("presence is required".into()))?;
        let messages = self
            .messages
            .ok_or_else(|| AppError::Config("messages is required".into()))?;
        let config = self.config;
        let rpc_timeout = config.services.rpc_timeout();

        let codec = Arc::new(GatewayCodec::new(
            JsonEncoder,
            GzipCompressor::new(config.websocket.max_message_size),
        ));
        let (registry, state) = UserMap::new(config.presence.channel_capacity);
        let registry = Arc::new(registry);
        let subscription = Arc::new(Subscription::new());
        let pool = Arc::new(ConnectionPool::new(
            config.websocket.max_conn_num.min(MAX_POOLED_CONNECTIONS),
            Arc::clone(&codec),
        ));
        let dispatcher = Arc::new(MessageDispatcher::new(
            messages,
            Arc::clone(&subscription),
            Arc::clone(&presence),
            rpc_timeout,
        ));
        let read_loop = Arc::new(ReadLoop::new(
            dispatcher,
            Arc::clone(&pool),
            config.websocket.pong_wait(),
        ));

        let (register_tx, register) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (unregister_tx, unregister) = mpsc::channel(EVENT_CHANNEL_CAPACITY);
        let (kick_tx, kick) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

        let server = WsServer {
            registry,
            subscription,
            policy: MultiTerminalPolicy::new(config.multi_login.policy),
            auth,
            presence,
            peers: self.peers,
            read_loop,
            pool,
            codec,
            register_tx,
            unregister_tx,
            kick_tx,
            online_user_num: AtomicI64::new(0),
            online_conn_num: AtomicI64::new(0),
            websocket: config.websocket.clone(),
            broadcaster: BroadcasterConfig::from_config(&config.presence, rpc_timeout),
            rpc_timeout,
            shutdown: self.shutdown.unwrap_or_default(),
        };

        tracing::info!(
            policy = config.multi_login.policy.name(),
            max_conn_num = config.websocket.max_conn_num,
            lanes = config.presence.lanes,
            "Gateway server built"
        );

        Ok((
            Arc::new(server),
            Receivers {
                register,
                unregister,
                kick,
                state,
            },
        ))
    }
}
