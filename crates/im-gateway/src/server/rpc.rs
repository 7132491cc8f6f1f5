//! Peer RPC surface
//!
//! JSON endpoints other gateway nodes and backend services call to push to,
//! query, or evict local connections.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures::future::join_all;
use im_core::PlatformId;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::gateway::{KickRequest, WsServer};
use crate::connection::{Connection, SessionParams};
use crate::handlers::GatewayError;
use crate::protocol::{base64_bytes, StatusReply};

const ONLINE: &str = "online";
const OFFLINE: &str = "offline";

#[derive(Debug, Deserialize, Serialize)]
pub struct OnlineStatusReq {
    #[serde(rename = "userIDs", default)]
    pub user_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlatformStatus {
    #[serde(rename = "platformID")]
    pub platform_id: PlatformId,
    pub platform: String,
    #[serde(rename = "connID")]
    pub conn_id: String,
    pub is_background: bool,
    pub token: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct UserOnlineStatus {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub status: String,
    #[serde(default)]
    pub platforms: Vec<PlatformStatus>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct OnlineStatusResp {
    pub users: Vec<UserOnlineStatus>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PushMsgReq {
    #[serde(rename = "userIDs", default)]
    pub user_ids: Vec<String>,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "operationID", default)]
    pub operation_id: String,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct PushMsgToUserReq {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(with = "base64_bytes")]
    pub data: Vec<u8>,
    #[serde(rename = "operationID", default)]
    pub operation_id: String,
}

/// Delivery outcome on one recipient platform
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SingleMsgToUserResult {
    #[serde(rename = "recvID")]
    pub recv_id: String,
    #[serde(rename = "recvPlatformID")]
    pub recv_platform_id: PlatformId,
    pub result_code: i32,
    pub online_push: bool,
}

/// Delivery outcome for one requested user
///
/// `platforms` is empty when the user has no connection on this node.
/// `online_push` is set when any push terminal took the message.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserPushResult {
    #[serde(rename = "userID")]
    pub user_id: String,
    pub online_push: bool,
    #[serde(default)]
    pub platforms: Vec<SingleMsgToUserResult>,
}

/// One entry per requested user, in request order
#[derive(Debug, Deserialize, Serialize)]
pub struct PushMsgResp {
    pub results: Vec<UserPushResult>,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct KickReq {
    #[serde(rename = "userIDs", default)]
    pub user_ids: Vec<String>,
    #[serde(rename = "platformID")]
    pub platform_id: PlatformId,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct LoginCheckReq {
    #[serde(rename = "userID")]
    pub user_id: String,
    #[serde(rename = "platformID")]
    pub platform_id: PlatformId,
    pub token: String,
}

pub async fn online_status(State(server): State<Arc<WsServer>>, Json(req): Json<OnlineStatusReq>) -> Json<OnlineStatusResp> {
    let users = req
        .user_ids
        .into_iter()
        .map(|user_id| match server.registry.get_all(&user_id) {
            Some(conns) => UserOnlineStatus {
                status: ONLINE.to_string(),
                platforms: conns
                    .iter()
                    .map(|conn| PlatformStatus {
                        platform_id: conn.platform_id(),
                        platform: conn.platform_id().name().to_string(),
                        conn_id: conn.conn_id().to_string(),
                        is_background: conn.is_background(),
                        token: conn.token().to_string(),
                    })
                    .collect(),
                user_id,
            },
            None => UserOnlineStatus {
                user_id,
                status: OFFLINE.to_string(),
                platforms: Vec::new(),
            },
        })
        .collect();

    Json(OnlineStatusResp { users })
}

pub async fn push_msg(State(server): State<Arc<WsServer>>, Json(req): Json<PushMsgReq>) -> Json<PushMsgResp> {
    let results = join_all(
        req.user_ids
            .iter()
            .map(|user_id| push_to_user(&server, user_id, &req.operation_id, &req.data)),
    )
    .await;

    Json(PushMsgResp { results })
}

pub async fn push_msg_to_user(
    State(server): State<Arc<WsServer>>,
    Json(req): Json<PushMsgToUserReq>,
) -> Json<UserPushResult> {
    Json(push_to_user(&server, &req.user_id, &req.operation_id, &req.data).await)
}

/// Push to every local connection of `user_id`
async fn push_to_user(server: &WsServer, user_id: &str, operation_id: &str, data: &[u8]) -> UserPushResult {
    let platforms = match server.registry.get_all(user_id) {
        Some(conns) => join_all(conns.iter().map(|conn| push_to_connection(conn, operation_id, data))).await,
        None => {
            tracing::debug!(user_id = %user_id, "Push target not online here");
            Vec::new()
        }
    };

    UserPushResult {
        user_id: user_id.to_string(),
        online_push: platforms.iter().any(|p| p.online_push),
        platforms,
    }
}

async fn push_to_connection(conn: &Arc<Connection>, operation_id: &str, data: &[u8]) -> SingleMsgToUserResult {
    let platform_id = conn.platform_id();
    let mut result = SingleMsgToUserResult {
        recv_id: conn.user_id().to_string(),
        recv_platform_id: platform_id,
        result_code: 0,
        online_push: false,
    };

    if conn.is_background() && platform_id == PlatformId::IOS {
        result.result_code = GatewayError::IosBackgroundPush.code();
        return result;
    }

    match conn.push_message(operation_id, data.to_vec()).await {
        Ok(()) => result.online_push = platform_id.is_push_terminal(),
        Err(e) => {
            tracing::warn!(
                user_id = %conn.user_id(),
                conn_id = %conn.conn_id(),
                operation_id = %operation_id,
                error = %e,
                "Push to connection failed"
            );
            result.result_code = GatewayError::PushMessage.code();
        }
    }
    result
}

pub async fn kick(State(server): State<Arc<WsServer>>, Json(req): Json<KickReq>) -> Response {
    for user_id in req.user_ids {
        let request = KickRequest::Evict {
            user_id,
            platform_id: req.platform_id,
        };
        if server.kick_tx.send(request).await.is_err() {
            return GatewayError::ShuttingDown.into_response();
        }
    }
    Json(StatusReply::ok()).into_response()
}

pub async fn multi_terminal_login_check(
    State(server): State<Arc<WsServer>>,
    Json(req): Json<LoginCheckReq>,
) -> Response {
    if server.registry.get_all(&req.user_id).is_none() {
        return Json(StatusReply::ok()).into_response();
    }

    let remote = Connection::detached(
        SessionParams {
            user_id: req.user_id,
            platform_id: req.platform_id,
            token: req.token,
            ..SessionParams::default()
        },
        Arc::clone(&server.codec),
    );
    if server
        .kick_tx
        .send(KickRequest::LoginCheck(Arc::new(remote)))
        .await
        .is_err()
    {
        return GatewayError::ShuttingDown.into_response();
    }
    Json(StatusReply::ok()).into_response()
}
