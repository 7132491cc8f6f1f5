//! Gateway server setup
//!
//! Routes, collaborator wiring, and the serve/shutdown sequence.

mod event_loop;
mod gateway;
mod handler;
mod peer;
mod rpc;

pub use gateway::{KickRequest, Receivers, ServerStats, WsServer, WsServerBuilder};
pub use handler::{ws_handler, HandshakeArgs, HandshakeQuery};
pub use peer::HttpPeerGateway;
pub use rpc::{
    KickReq, LoginCheckReq, OnlineStatusReq, OnlineStatusResp, PlatformStatus, PushMsgReq, PushMsgResp,
    PushMsgToUserReq, SingleMsgToUserResult, UserOnlineStatus, UserPushResult,
};

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use im_cache::{MemoryPresenceStore, RedisPresenceStore};
use im_common::{AppConfig, AppError, JwtAuthService};
use im_core::PresenceStore;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::handlers::HttpMessageService;

/// Create the gateway router
pub fn create_router() -> Router<Arc<WsServer>> {
    Router::new()
        .route("/", get(ws_handler))
        .route("/health", get(health_check))
        .route("/stats", get(stats))
        .nest("/rpc", rpc_router())
}

fn rpc_router() -> Router<Arc<WsServer>> {
    Router::new()
        .route("/online_status", post(rpc::online_status))
        .route("/push_msg", post(rpc::push_msg))
        .route("/push_msg_to_user", post(rpc::push_msg_to_user))
        .route("/kick", post(rpc::kick))
        .route("/multi_terminal_login_check", post(rpc::multi_terminal_login_check))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

async fn stats(State(server): State<Arc<WsServer>>) -> Json<ServerStats> {
    Json(server.stats())
}

/// Build the complete application
pub fn create_app(server: Arc<WsServer>) -> Router {
    create_router()
        .layer(TraceLayer::new_for_http())
        .with_state(server)
}

/// Wire collaborators from configuration
fn build_server(
    config: &AppConfig,
    shutdown: &CancellationToken,
) -> Result<(Arc<WsServer>, Receivers), AppError> {
    let auth = Arc::new(JwtAuthService::from_config(&config.jwt));

    let presence: Arc<dyn PresenceStore> = match &config.redis {
        Some(redis) => {
            tracing::info!("Connecting to Redis...");
            let store = RedisPresenceStore::from_config(redis, config.presence.ttl_secs, shutdown.clone())
                .map_err(|e| AppError::Cache(e.to_string()))?;
            Arc::new(store)
        }
        None => {
            tracing::info!("REDIS_URL unset, using in-memory presence store");
            Arc::new(MemoryPresenceStore::default())
        }
    };

    let messages = Arc::new(HttpMessageService::new(
        &config.services.msg_service_url,
        config.services.rpc_timeout(),
    )?);
    let peers = HttpPeerGateway::new(
        &config.services.peers,
        config.gateway.advertise_addr.as_deref(),
        config.services.rpc_timeout(),
    )?;

    let mut builder = WsServerBuilder::new(config)
        .auth(auth)
        .presence(presence)
        .messages(messages)
        .shutdown(shutdown.clone());
    if !peers.is_empty() {
        tracing::info!(peers = ?peers.peers(), "Peer gateways configured");
        builder = builder.peers(Arc::new(peers));
    }
    builder.build()
}

/// Wait for SIGTERM or SIGINT (Ctrl+C)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}

/// Run the gateway until a shutdown signal, then drain within the configured
/// grace period
pub async fn run(config: AppConfig) -> Result<(), AppError> {
    let shutdown = CancellationToken::new();
    let (server, receivers) = build_server(&config, &shutdown)?;
    let mut tasks = server.start(receivers);

    let addr = config.gateway.server.address();
    let listener = TcpListener::bind(&addr).await.map_err(|e| AppError::Bind {
        addr: addr.clone(),
        reason: e.to_string(),
    })?;
    tracing::info!("Gateway listening on ws://{}", addr);

    let app = create_app(server);
    let serve_shutdown = shutdown.clone();
    let mut serve = tokio::spawn(async move {
        axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(async move { serve_shutdown.cancelled().await })
            .await
    });

    let early_exit = tokio::select! {
        () = shutdown_signal() => {
            tracing::info!("Shutdown signal received");
            None
        }
        result = &mut serve => Some(result),
    };
    shutdown.cancel();

    if let Some(result) = early_exit {
        tasks.shutdown().await;
        return match result {
            Ok(Ok(())) => Err(AppError::Server("listener stopped unexpectedly".into())),
            Ok(Err(e)) => Err(AppError::Server(e.to_string())),
            Err(e) => Err(AppError::Server(e.to_string())),
        };
    }

    let grace = config.gateway.shutdown_timeout();
    let drained = tokio::time::timeout(grace, async move {
        let served = serve.await;
        while tasks.join_next().await.is_some() {}
        served
    })
    .await;

    match drained {
        Ok(Ok(Ok(()))) => {
            tracing::info!("Gateway stopped");
            Ok(())
        }
        Ok(Ok(Err(e))) => Err(AppError::Server(e.to_string())),
        Ok(Err(e)) => Err(AppError::Server(e.to_string())),
        Err(_) => Err(AppError::ShutdownTimeout(config.gateway.shutdown_timeout_secs)),
    }
}
