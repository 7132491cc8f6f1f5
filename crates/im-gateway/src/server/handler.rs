//! WebSocket handshake
//!
//! Validates the query, authenticates the token, upgrades, and hands the
//! socket to a pooled connection and its read loop.

use axum::extract::ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use im_core::PlatformId;
use serde::Deserialize;
use std::net::SocketAddr;
use std::sync::Arc;

use super::gateway::WsServer;
use crate::connection::{Frame, SdkType, SessionParams, TransportError, WsSink};
use crate::handlers::GatewayError;
use crate::protocol::StatusReply;

const GZIP: &str = "gzip";

/// Raw handshake query
#[derive(Debug, Default, Deserialize)]
pub struct HandshakeQuery {
    token: Option<String>,
    #[serde(rename = "sendID")]
    send_id: Option<String>,
    #[serde(rename = "userID")]
    user_id: Option<String>,
    #[serde(rename = "platformID")]
    platform_id: Option<String>,
    compression: Option<String>,
    #[serde(rename = "sendResponse")]
    send_response: Option<String>,
    #[serde(rename = "msgResp")]
    msg_resp: Option<String>,
    #[serde(rename = "isBackground")]
    is_background: Option<String>,
    #[serde(rename = "sdkType")]
    sdk_type: Option<String>,
}

/// Validated handshake parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandshakeArgs {
    pub token: String,
    pub user_id: String,
    pub platform_id: PlatformId,
    pub compress: bool,
    pub send_response: bool,
    pub background: bool,
    pub sdk_type: SdkType,
}

impl HandshakeArgs {
    pub fn parse(query: &HandshakeQuery, headers: &HeaderMap) -> Result<Self, GatewayError> {
        let token = non_empty(query.token.as_deref()).ok_or_else(|| GatewayError::Args("token is empty".into()))?;
        let user_id = non_empty(query.send_id.as_deref())
            .or_else(|| non_empty(query.user_id.as_deref()))
            .ok_or_else(|| GatewayError::Args("sendID is empty".into()))?;
        let platform_id = non_empty(query.platform_id.as_deref())
            .ok_or_else(|| GatewayError::Args("platformID is empty".into()))?
            .parse::<i32>()
            .map_err(|_| GatewayError::Args("platformID is not int".into()))?;

        let compress = query.compression.as_deref() == Some(GZIP)
            || headers
                .get("compression")
                .and_then(|v| v.to_str().ok())
                .is_some_and(|v| v == GZIP);
        let sdk_type = match non_empty(query.sdk_type.as_deref()) {
            Some(raw) => raw.parse().map_err(GatewayError::Args)?,
            None => SdkType::default(),
        };

        Ok(Self {
            token: token.to_string(),
            user_id: user_id.to_string(),
            platform_id: PlatformId::new(platform_id),
            compress,
            send_response: parse_flag(query.send_response.as_deref()) || parse_flag(query.msg_resp.as_deref()),
            background: parse_flag(query.is_background.as_deref()),
            sdk_type,
        })
    }

    fn session(self, remote_addr: SocketAddr) -> SessionParams {
        SessionParams {
            user_id: self.user_id,
            platform_id: self.platform_id,
            token: self.token,
            remote_addr: remote_addr.to_string(),
            sdk_type: self.sdk_type,
            compress: self.compress,
            background: self.background,
        }
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

fn parse_flag(value: Option<&str>) -> bool {
    matches!(value.map(str::trim), Some("1" | "t" | "T" | "true" | "TRUE" | "True"))
}

/// `GET /` upgrade endpoint
pub async fn ws_handler(
    State(server): State<Arc<WsServer>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    Query(query): Query<HandshakeQuery>,
    headers: HeaderMap,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if server.shutdown.is_cancelled() {
        return GatewayError::ShuttingDown.into_response();
    }
    if server.is_over_limit() {
        tracing::warn!(remote_addr = %remote_addr, "Connection limit reached");
        return GatewayError::ConnOverMaxNumLimit.into_response();
    }

    let args = match HandshakeArgs::parse(&query, &headers) {
        Ok(args) => args,
        Err(e) => {
            tracing::debug!(remote_addr = %remote_addr, error = %e, "Handshake rejected");
            return e.into_response();
        }
    };
    let upgrade = match upgrade {
        Ok(upgrade) => upgrade
            .max_message_size(server.websocket.max_message_size)
            .write_buffer_size(server.websocket.write_buffer_size),
        Err(rejection) => return rejection.into_response(),
    };

    if let Err(e) = server
        .authenticate(&args.token, &args.user_id, args.platform_id)
        .await
    {
        tracing::info!(
            user_id = %args.user_id,
            platform_id = %args.platform_id,
            remote_addr = %remote_addr,
            error = %e,
            "Handshake authentication failed"
        );
        if !args.send_response {
            return e.into_response();
        }
        let reply = encode_reply(&e.status_reply());
        return upgrade.on_upgrade(move |socket| reject_upgraded(socket, reply));
    }

    upgrade.on_upgrade(move |socket| server.serve_connection(socket, args, remote_addr))
}

fn encode_reply(reply: &StatusReply) -> String {
    serde_json::to_string(reply).unwrap_or_default()
}

async fn reject_upgraded(mut socket: WebSocket, reply: String) {
    if socket.send(Message::Text(reply)).await.is_ok() {
        let _ = socket.send(Message::Close(None)).await;
    }
}

impl WsServer {
    async fn serve_connection(self: Arc<Self>, socket: WebSocket, args: HandshakeArgs, remote_addr: SocketAddr) {
        let send_response = args.send_response;
        let (sink, stream) = socket.split();

        let mut conn = self.pool.get();
        conn.reset(args.session(remote_addr), Box::new(WsSink::new(sink)), self.connection_hooks());
        let conn = Arc::new(conn);

        if send_response {
            if let Err(e) = conn.write_text(encode_reply(&StatusReply::ok())).await {
                tracing::debug!(conn_id = %conn.conn_id(), error = %e, "Handshake ack failed");
            }
        }

        if self.register_tx.send(Arc::clone(&conn)).await.is_err() {
            conn.set_close_reason(GatewayError::ShuttingDown.to_string());
            conn.close().await;
            self.pool.put(conn);
            return;
        }

        let frames = stream.map(|message| message.map(Frame::from).map_err(TransportError::from));
        self.read_loop.run(conn, frames).await;
    }
}
