//! End-to-end gateway tests over real sockets
//!
//! Run with: cargo test -p integration-tests

use base64::{engine::general_purpose::STANDARD, Engine as _};
use im_common::WebSocketConfig;
use im_core::{DomainError, MultiLoginPolicy, PlatformId};
use im_gateway::protocol::{OnlineStatusPush, StatusReply, SubUserOnlineStatusTips};
use im_gateway::server::{OnlineStatusResp, PushMsgResp, UserPushResult};
use integration_tests::*;
use serde_json::json;
use tokio_tungstenite::tungstenite::Message;

// =============================================================================
// Handshake
// =============================================================================

#[tokio::test]
async fn test_health_check() {
    let server = TestServer::start().await.expect("Failed to start server");

    let response = server.get("/health").await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_missing_token_rejected_before_upgrade() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("no-token");

    let rejected = server
        .try_handshake(&format!("sendID={user}&platformID=5"))
        .await
        .unwrap()
        .expect_err("handshake should be refused");

    assert_eq!(rejected.status, 400);
    assert_eq!(rejected.ws_err_msg.as_deref(), Some("args error: token is empty"));
    let stats = server.gateway.stats();
    assert_eq!(stats.pooled_allocated, 0);
    assert_eq!(stats.online_conn_num, 0);
}

#[tokio::test]
async fn test_non_numeric_platform_rejected() {
    let server = TestServer::start().await.unwrap();

    let rejected = server
        .try_handshake("token=t&sendID=u&platformID=web")
        .await
        .unwrap()
        .expect_err("handshake should be refused");

    assert_eq!(rejected.status, 400);
    assert_eq!(rejected.ws_err_msg.as_deref(), Some("args error: platformID is not int"));
}

#[tokio::test]
async fn test_forged_token_rejected_with_401() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("forged");

    let rejected = server
        .try_handshake(&handshake_query(&user, PlatformId::WEB, "not-a-jwt"))
        .await
        .unwrap()
        .expect_err("handshake should be refused");

    assert_eq!(rejected.status, 401);
    assert_eq!(server.connections_of(&user), 0);
}

#[tokio::test]
async fn test_send_response_acknowledges_handshake() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("ack");
    let token = server.token(&user, PlatformId::WEB).unwrap();
    let query = format!("{}&sendResponse=true", handshake_query(&user, PlatformId::WEB, &token));

    let mut client = server.connect_query(&user, &query, false).await.unwrap();

    let reply: StatusReply = serde_json::from_str(&client.next_text().await.unwrap()).unwrap();
    assert_eq!(reply, StatusReply::ok());
    assert!(eventually(|| server.connections_of(&user) == 1).await);
}

#[tokio::test]
async fn test_identity_mismatch_reported_over_socket() {
    let server = TestServer::start().await.unwrap();
    let owner = unique_user("owner");
    let impostor = unique_user("impostor");
    let token = server.token(&owner, PlatformId::WEB).unwrap();
    let query = format!("{}&sendResponse=1", handshake_query(&impostor, PlatformId::WEB, &token));

    let mut client = server.connect_query(&impostor, &query, false).await.unwrap();

    let reply: StatusReply = serde_json::from_str(&client.next_text().await.unwrap()).unwrap();
    assert_eq!(reply.err_code, 1002);
    assert!(client.is_closed_by_server().await);
    assert_eq!(server.connections_of(&impostor), 0);
}

#[tokio::test]
async fn test_identity_mismatch_without_send_response_is_403() {
    let server = TestServer::start().await.unwrap();
    let token = server.token("someone", PlatformId::WEB).unwrap();

    let rejected = server
        .try_handshake(&handshake_query("someone", PlatformId::IOS, &token))
        .await
        .unwrap()
        .expect_err("handshake should be refused");

    assert_eq!(rejected.status, 403);
}

// =============================================================================
// Multi-terminal login
// =============================================================================

#[tokio::test]
async fn test_do_not_kick_keeps_both_connections() {
    let server = TestServer::start_with_policy(MultiLoginPolicy::DoNotKick).await.unwrap();
    let user = unique_user("coexist");

    let (_first, _) = server.connect(&user, PlatformId::WEB).await.unwrap();
    let (_second, _) = server.connect(&user, PlatformId::WEB).await.unwrap();

    assert_eq!(server.connections_of(&user), 2);
    assert_eq!(server.gateway.stats().online_user_num, 1);
    assert_eq!(server.gateway.stats().online_conn_num, 2);
}

#[tokio::test]
async fn test_same_terminal_login_kicks_previous() {
    let server = TestServer::start_with_policy(MultiLoginPolicy::AllLoginButSameTerminalKick)
        .await
        .unwrap();
    let user = unique_user("kicked");

    let (mut first, old_token) = server.connect(&user, PlatformId::WEB).await.unwrap();
    let second_token = server.token(&user, PlatformId::WEB).unwrap();
    let _second = server
        .connect_query(&user, &handshake_query(&user, PlatformId::WEB, &second_token), false)
        .await
        .unwrap();

    let notice = first.next_resp().await.unwrap();
    assert_eq!(notice.req_identifier, kinds::KICK_ONLINE_MSG);
    assert!(first.is_closed_by_server().await);

    assert!(
        eventually(|| server
            .gateway
            .registry()
            .get_all(&user)
            .is_some_and(|conns| conns.len() == 1 && conns[0].token() == second_token))
        .await
    );
    assert!(eventually(|| matches!(server.auth.decode_token(&old_token), Err(DomainError::TokenKicked))).await);
    assert!(server.auth.decode_token(&second_token).is_ok());
}

#[tokio::test]
async fn test_same_class_kick_leaves_token_valid() {
    let server = TestServer::start_with_policy(MultiLoginPolicy::AllLoginButSameClassKick)
        .await
        .unwrap();
    let user = unique_user("class");

    let (mut phone, phone_token) = server.connect(&user, PlatformId::IOS).await.unwrap();
    let (_desktop, _) = server.connect(&user, PlatformId::WINDOWS).await.unwrap();
    let android_token = server.token(&user, PlatformId::ANDROID).unwrap();
    let _android = server
        .connect_query(&user, &handshake_query(&user, PlatformId::ANDROID, &android_token), false)
        .await
        .unwrap();

    let notice = phone.next_resp().await.unwrap();
    assert_eq!(notice.req_identifier, kinds::KICK_ONLINE_MSG);
    assert!(eventually(|| server.connections_of(&user) == 2).await);
    assert!(server.auth.decode_token(&phone_token).is_ok());
}

// =============================================================================
// Requests
// =============================================================================

#[tokio::test]
async fn test_request_reply_echoes_operation() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("echo");
    let (mut client, _) = server.connect(&user, PlatformId::WEB).await.unwrap();

    let resp = client.request(kinds::SEND_MSG, b"hello").await.unwrap();

    assert_eq!(resp.req_identifier, kinds::SEND_MSG);
    assert_eq!(resp.err_code, 0);
    assert_eq!(resp.data, b"hello");
    assert_eq!(resp.msg_incr, "1");
}

#[tokio::test]
async fn test_business_error_keeps_connection_open() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("rejected");
    let (mut client, _) = server.connect(&user, PlatformId::WEB).await.unwrap();

    let resp = client.request(kinds::SEND_MSG, REJECT_PAYLOAD).await.unwrap();
    assert_eq!(resp.err_code, REJECT_CODE);
    assert_eq!(resp.err_msg, REJECT_MESSAGE);

    let resp = client.request(kinds::GET_NEWEST_SEQ, b"seq").await.unwrap();
    assert_eq!(resp.err_code, 0);
    assert_eq!(server.connections_of(&user), 1);
}

#[tokio::test]
async fn test_gzip_negotiated_from_query() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("gzip");
    let token = server.token(&user, PlatformId::ANDROID).unwrap();
    let query = format!(
        "{}&compression=gzip",
        handshake_query(&user, PlatformId::ANDROID, &token)
    );
    let mut client = server.connect_query(&user, &query, true).await.unwrap();
    assert!(eventually(|| server.connections_of(&user) == 1).await);

    let resp = client.request(kinds::SEND_MSG, b"compressed").await.unwrap();

    assert_eq!(resp.data, b"compressed");
}

#[tokio::test]
async fn test_logout_replies_then_closes() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("logout");
    let (mut client, _) = server.connect(&user, PlatformId::WEB).await.unwrap();

    let resp = client.request(kinds::LOGOUT, b"").await.unwrap();

    assert_eq!(resp.err_code, 0);
    assert!(client.is_closed_by_server().await);
    assert!(eventually(|| server.connections_of(&user) == 0).await);
    assert!(eventually(|| server.gateway.stats().online_conn_num == 0).await);
}

#[tokio::test]
async fn test_frame_at_max_message_size_is_served() {
    let server = TestServer::start().await.unwrap();
    let max = WebSocketConfig::default().max_message_size;
    let user = unique_user("maxframe");
    let (mut client, _) = server.connect(&user, PlatformId::WEB).await.unwrap();

    // data is base64 on the wire: 3 bytes become 4 characters
    let overhead = client.next_frame_len(kinds::SEND_MSG, b"").unwrap();
    let data = vec![b'x'; (max - overhead) / 4 * 3];
    let len = client.next_frame_len(kinds::SEND_MSG, &data).unwrap();
    assert!(len <= max && len > max - 4);

    let resp = client.request(kinds::SEND_MSG, &data).await.unwrap();
    assert_eq!(resp.err_code, 0);
    assert_eq!(resp.data, data);
    assert_eq!(server.connections_of(&user), 1);

    let mut over = data;
    over.extend_from_slice(b"xxx");
    assert!(client.next_frame_len(kinds::SEND_MSG, &over).unwrap() > max);
    client.send_req(kinds::SEND_MSG, &over).await.unwrap();

    assert!(client.is_closed_by_server().await);
    assert!(eventually(|| server.connections_of(&user) == 0).await);
}

#[tokio::test]
async fn test_text_frame_closes_connection() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("text");
    let (mut client, _) = server.connect(&user, PlatformId::WEB).await.unwrap();

    client.send_raw(Message::Text("hello".into())).await.unwrap();

    assert!(client.is_closed_by_server().await);
    assert!(eventually(|| server.connections_of(&user) == 0).await);
}

#[tokio::test]
async fn test_client_close_unregisters_and_recycles() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("bye");
    let (client, _) = server.connect(&user, PlatformId::WEB).await.unwrap();

    client.close().await.unwrap();

    assert!(eventually(|| server.connections_of(&user) == 0).await);
    assert!(eventually(|| server.gateway.stats().online_conn_num == 0).await);
}

// =============================================================================
// Presence subscriptions
// =============================================================================

#[tokio::test]
async fn test_subscriber_notified_when_target_comes_online() {
    let server = TestServer::start().await.unwrap();
    let watcher = unique_user("watcher");
    let target = unique_user("target");
    let (mut client, _) = server.connect(&watcher, PlatformId::WEB).await.unwrap();

    let body = json!({ "subscribeUserID": [target] }).to_string();
    let resp = client.request(kinds::SUB_USER_ONLINE_STATUS, body.as_bytes()).await.unwrap();
    let tips: SubUserOnlineStatusTips = serde_json::from_slice(&resp.data).unwrap();
    assert_eq!(tips.subscribers.len(), 1);
    assert!(tips.subscribers[0].online_platform_ids.is_empty());

    let (_target, _) = server.connect(&target, PlatformId::IOS).await.unwrap();

    let push = loop {
        let resp = client.next_resp().await.unwrap();
        if resp.req_identifier == kinds::ONLINE_STATUS_CHANGED {
            break resp;
        }
    };
    let status: OnlineStatusPush = serde_json::from_slice(&push.data).unwrap();
    assert_eq!(status.user_id, target);
    assert_eq!(status.platform_ids, vec![PlatformId::IOS]);
}

#[tokio::test]
async fn test_unsubscribe_and_disconnect_drop_subscription() {
    let server = TestServer::start().await.unwrap();
    let watcher = unique_user("fickle");
    let a = unique_user("a");
    let b = unique_user("b");
    let (mut client, _) = server.connect(&watcher, PlatformId::WEB).await.unwrap();

    let body = json!({ "subscribeUserID": [a, b] }).to_string();
    client.request(kinds::SUB_USER_ONLINE_STATUS, body.as_bytes()).await.unwrap();
    assert_eq!(server.gateway.subscription().get_clients(&a).len(), 1);

    let body = json!({ "unsubscribeUserID": [a] }).to_string();
    client.request(kinds::SUB_USER_ONLINE_STATUS, body.as_bytes()).await.unwrap();
    assert!(server.gateway.subscription().get_clients(&a).is_empty());
    assert_eq!(server.gateway.subscription().get_clients(&b).len(), 1);

    client.close().await.unwrap();
    assert!(eventually(|| server.gateway.subscription().get_clients(&b).is_empty()).await);
}

#[tokio::test]
async fn test_presence_store_tracks_logins() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("present");

    let (client, _) = server.connect(&user, PlatformId::MACOS).await.unwrap();
    assert!(eventually(|| server.presence.online_user_count() >= 1).await);

    client.close().await.unwrap();
    assert!(eventually(|| server.presence.online_user_count() == 0).await);
}

// =============================================================================
// Peer RPC
// =============================================================================

#[tokio::test]
async fn test_push_msg_reaches_every_platform() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("pushed");
    let (mut web, _) = server.connect(&user, PlatformId::WEB).await.unwrap();
    let (mut phone, _) = server.connect(&user, PlatformId::ANDROID).await.unwrap();

    let body = json!({
        "userIDs": [user, unique_user("offline")],
        "data": STANDARD.encode(b"payload"),
        "operationID": "push-1",
    });
    let resp: PushMsgResp = server.post("/rpc/push_msg", &body).await.unwrap().json().await.unwrap();

    assert_eq!(resp.results.len(), 2);
    let online = &resp.results[0];
    assert_eq!(online.user_id, user);
    assert!(online.online_push);
    assert_eq!(online.platforms.len(), 2);
    assert!(online.platforms.iter().all(|r| r.result_code == 0));
    let android = online
        .platforms
        .iter()
        .find(|r| r.recv_platform_id == PlatformId::ANDROID)
        .unwrap();
    assert!(android.online_push);
    assert!(!resp.results[1].online_push);
    assert!(resp.results[1].platforms.is_empty());

    for client in [&mut web, &mut phone] {
        let push = client.next_resp().await.unwrap();
        assert_eq!(push.req_identifier, kinds::PUSH_MSG);
        assert_eq!(push.operation_id, "push-1");
        assert_eq!(push.data, b"payload");
    }
}

#[tokio::test]
async fn test_background_ios_is_not_pushed() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("sleepy");
    let (mut phone, _) = server.connect(&user, PlatformId::IOS).await.unwrap();

    let resp = phone
        .request(kinds::SET_BACKGROUND_STATUS, br#"{"isBackground":true}"#)
        .await
        .unwrap();
    assert_eq!(resp.err_code, 0);

    let body = json!({ "userID": user, "data": STANDARD.encode(b"x"), "operationID": "op" });
    let resp: UserPushResult = server
        .post("/rpc/push_msg_to_user", &body)
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert!(!resp.online_push);
    assert_eq!(resp.platforms.len(), 1);
    assert_eq!(resp.platforms[0].result_code, 1604);
    assert!(!resp.platforms[0].online_push);
}

#[tokio::test]
async fn test_online_status_lists_connections() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("listed");
    let offline = unique_user("missing");
    let (_client, token) = server.connect(&user, PlatformId::LINUX).await.unwrap();

    let body = json!({ "userIDs": [user, offline] });
    let resp: OnlineStatusResp = server
        .post("/rpc/online_status", &body)
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    assert_eq!(resp.users.len(), 2);
    assert_eq!(resp.users[0].status, "online");
    assert_eq!(resp.users[0].platforms.len(), 1);
    assert_eq!(resp.users[0].platforms[0].platform_id, PlatformId::LINUX);
    assert_eq!(resp.users[0].platforms[0].token, token);
    assert_eq!(resp.users[1].status, "offline");
    assert!(resp.users[1].platforms.is_empty());
}

#[tokio::test]
async fn test_kick_rpc_evicts_one_platform() {
    let server = TestServer::start().await.unwrap();
    let user = unique_user("evicted");
    let (mut web, _) = server.connect(&user, PlatformId::WEB).await.unwrap();
    let (_phone, _) = server.connect(&user, PlatformId::ANDROID).await.unwrap();

    let body = json!({ "userIDs": [user], "platformID": PlatformId::WEB });
    let reply: StatusReply = server.post("/rpc/kick", &body).await.unwrap().json().await.unwrap();
    assert_eq!(reply, StatusReply::ok());

    let notice = web.next_resp().await.unwrap();
    assert_eq!(notice.req_identifier, kinds::KICK_ONLINE_MSG);
    assert!(web.is_closed_by_server().await);
    assert!(eventually(|| server.connections_of(&user) == 1).await);
}

#[tokio::test]
async fn test_remote_login_check_applies_policy() {
    let server = TestServer::start_with_policy(MultiLoginPolicy::AllLoginButSameTerminalKick)
        .await
        .unwrap();
    let user = unique_user("remote");
    let (mut local, local_token) = server.connect(&user, PlatformId::WEB).await.unwrap();

    let body = json!({ "userID": user, "platformID": PlatformId::WEB, "token": "token-issued-elsewhere" });
    let reply: StatusReply = server
        .post("/rpc/multi_terminal_login_check", &body)
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(reply, StatusReply::ok());

    let notice = local.next_resp().await.unwrap();
    assert_eq!(notice.req_identifier, kinds::KICK_ONLINE_MSG);
    assert!(eventually(|| server.connections_of(&user) == 0).await);
    assert!(eventually(|| matches!(server.auth.decode_token(&local_token), Err(DomainError::TokenKicked))).await);
}

#[tokio::test]
async fn test_remote_login_check_for_unknown_user_is_noop() {
    let server = TestServer::start_with_policy(MultiLoginPolicy::AllLoginButSameTerminalKick)
        .await
        .unwrap();

    let body = json!({ "userID": unique_user("nobody"), "platformID": 1, "token": "t" });
    let response = server.post("/rpc/multi_terminal_login_check", &body).await.unwrap();

    assert_eq!(response.status(), 200);
    assert_eq!(server.gateway.stats().online_conn_num, 0);
}
