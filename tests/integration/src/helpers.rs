//! Test helpers for integration tests
//!
//! Provides a gateway bound to a loopback port with in-memory collaborators,
//! a WebSocket client speaking the envelope protocol, and HTTP helpers for
//! the peer RPC surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use futures_util::{SinkExt, StreamExt};
use im_cache::MemoryPresenceStore;
use im_common::{AppConfig, JwtAuthService};
use im_core::{MultiLoginPolicy, PlatformId};
use im_gateway::protocol::{GatewayCodec, GzipCompressor, JsonEncoder, Req, Resp};
use im_gateway::{create_app, WsServer, WsServerBuilder};
use reqwest::{Client, Response};
use serde::Serialize;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::{JoinHandle, JoinSet};
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::fixtures::StubMessageService;

pub const TEST_SECRET: &str = "integration-test-secret";

/// How long a client waits for one frame
const FRAME_TIMEOUT: Duration = Duration::from_secs(5);

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test server instance that manages lifecycle
pub struct TestServer {
    pub addr: SocketAddr,
    pub client: Client,
    pub gateway: Arc<WsServer>,
    pub auth: Arc<JwtAuthService>,
    pub presence: Arc<MemoryPresenceStore>,
    _handle: JoinHandle<()>,
    _tasks: JoinSet<()>,
}

/// A handshake refused before upgrade
#[derive(Debug)]
pub struct Rejected {
    pub status: u16,
    pub ws_err_msg: Option<String>,
}

impl TestServer {
    /// Start a gateway with the `DoNotKick` policy
    pub async fn start() -> Result<Self> {
        Self::start_with_policy(MultiLoginPolicy::DoNotKick).await
    }

    pub async fn start_with_policy(policy: MultiLoginPolicy) -> Result<Self> {
        Self::start_with_config(test_config(policy)?).await
    }

    /// Start a test server with custom config
    pub async fn start_with_config(config: AppConfig) -> Result<Self> {
        let auth = Arc::new(JwtAuthService::from_config(&config.jwt));
        let presence = Arc::new(MemoryPresenceStore::default());

        let (gateway, receivers) = WsServerBuilder::new(&config)
            .auth(auth.clone())
            .presence(presence.clone())
            .messages(Arc::new(StubMessageService))
            .build()?;
        let tasks = gateway.start(receivers);

        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let app = create_app(Arc::clone(&gateway));
        let handle = tokio::spawn(async move {
            axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
                .await
                .ok();
        });

        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;

        Ok(Self {
            addr,
            client,
            gateway,
            auth,
            presence,
            _handle: handle,
            _tasks: tasks,
        })
    }

    /// Get base URL for the server
    pub fn base_url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn token(&self, user_id: &str, platform_id: PlatformId) -> Result<String> {
        Ok(self.auth.issue_token(user_id, platform_id)?)
    }

    /// Attempt a handshake with a raw query string
    pub async fn try_handshake(&self, query: &str) -> Result<Result<WsStream, Rejected>> {
        let url = format!("ws://{}/?{query}", self.addr);
        match tokio_tungstenite::connect_async(url).await {
            Ok((stream, _)) => Ok(Ok(stream)),
            Err(tungstenite::Error::Http(response)) => Ok(Err(Rejected {
                status: response.status().as_u16(),
                ws_err_msg: response
                    .headers()
                    .get("ws_err_msg")
                    .and_then(|v| v.to_str().ok())
                    .map(String::from),
            })),
            Err(e) => Err(e.into()),
        }
    }

    /// Connect with a raw query string that must be accepted
    pub async fn connect_query(&self, user_id: &str, query: &str, compress: bool) -> Result<WsClient> {
        match self.try_handshake(query).await? {
            Ok(stream) => Ok(WsClient::new(stream, user_id, compress)),
            Err(rejected) => bail!("handshake rejected: {rejected:?}"),
        }
    }

    /// Connect with a valid token and wait until the gateway registered it
    pub async fn connect_with_token(&self, user_id: &str, platform_id: PlatformId, token: &str) -> Result<WsClient> {
        let before = self.connections_of(user_id);
        let client = self
            .connect_query(user_id, &handshake_query(user_id, platform_id, token), false)
            .await?;
        if !eventually(|| self.connections_of(user_id) > before).await {
            bail!("{user_id} was never registered");
        }
        Ok(client)
    }

    /// Connect with a freshly issued token
    pub async fn connect(&self, user_id: &str, platform_id: PlatformId) -> Result<(WsClient, String)> {
        let token = self.token(user_id, platform_id)?;
        let client = self.connect_with_token(user_id, platform_id, &token).await?;
        Ok((client, token))
    }

    /// Registered connections of `user_id` on this node
    pub fn connections_of(&self, user_id: &str) -> usize {
        self.gateway
            .registry()
            .get_all(user_id)
            .map_or(0, |conns| conns.len())
    }

    /// Make a GET request
    pub async fn get(&self, path: &str) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.get(&url).send().await?)
    }

    /// Make a POST request with JSON body
    pub async fn post<T: Serialize>(&self, path: &str, body: &T) -> Result<Response> {
        let url = format!("{}{}", self.base_url(), path);
        Ok(self.client.post(&url).json(body).send().await?)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.gateway.shutdown_token().cancel();
    }
}

/// Create a test configuration
pub fn test_config(policy: MultiLoginPolicy) -> Result<AppConfig> {
    let policy = policy.as_u8().to_string();
    let config = AppConfig::from_lookup(|name| match name {
        "JWT_SECRET" => Some(TEST_SECRET.to_string()),
        "MULTI_LOGIN_POLICY" => Some(policy.clone()),
        "PRESENCE_MERGE_INTERVAL_MS" => Some("20".to_string()),
        "RPC_TIMEOUT_MS" => Some("2000".to_string()),
        _ => None,
    })
    .map_err(|e| anyhow::anyhow!("Config error: {e}"))?;

    Ok(config)
}

/// Minimal valid handshake query
pub fn handshake_query(user_id: &str, platform_id: PlatformId, token: &str) -> String {
    format!("token={token}&sendID={user_id}&platformID={platform_id}")
}

/// Poll `check` for up to two seconds
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    check()
}

/// A client speaking the gateway's envelope protocol
pub struct WsClient {
    ws: WsStream,
    pub user_id: String,
    compress: bool,
    codec: GatewayCodec,
    next_op: u64,
}

impl WsClient {
    pub fn new(ws: WsStream, user_id: &str, compress: bool) -> Self {
        Self {
            ws,
            user_id: user_id.to_string(),
            compress,
            codec: GatewayCodec::new(JsonEncoder, GzipCompressor::default()),
            next_op: 0,
        }
    }

    fn build_req(&self, op: u64, req_identifier: i32, data: &[u8]) -> Req {
        Req {
            req_identifier,
            send_id: self.user_id.clone(),
            operation_id: format!("{}-op-{op}", self.user_id),
            msg_incr: op.to_string(),
            data: data.to_vec(),
            ..Req::default()
        }
    }

    /// Wire size of the frame the next `send_req` with these arguments writes
    pub fn next_frame_len(&self, req_identifier: i32, data: &[u8]) -> Result<usize> {
        let req = self.build_req(self.next_op + 1, req_identifier, data);
        Ok(self.codec.encode_frame(&req, self.compress)?.len())
    }

    /// Send one request and return its operation ID
    pub async fn send_req(&mut self, req_identifier: i32, data: &[u8]) -> Result<String> {
        self.next_op += 1;
        let req = self.build_req(self.next_op, req_identifier, data);
        let bytes = self.codec.encode_frame(&req, self.compress)?;
        self.send_raw(Message::Binary(bytes)).await?;
        Ok(req.operation_id)
    }

    /// Send a request and wait for the reply carrying its operation ID
    pub async fn request(&mut self, req_identifier: i32, data: &[u8]) -> Result<Resp> {
        let operation_id = self.send_req(req_identifier, data).await?;
        loop {
            let resp = self.next_resp().await?;
            if resp.operation_id == operation_id {
                return Ok(resp);
            }
        }
    }

    pub async fn send_raw(&mut self, message: Message) -> Result<()> {
        self.ws.send(message).await?;
        Ok(())
    }

    /// Next transport message, bounded by the frame timeout
    pub async fn next_message(&mut self) -> Result<Message> {
        match tokio::time::timeout(FRAME_TIMEOUT, self.ws.next()).await {
            Err(_) => bail!("no frame within {FRAME_TIMEOUT:?}"),
            Ok(None) => bail!("stream ended"),
            Ok(Some(message)) => Ok(message?),
        }
    }

    /// Raw bytes of the next binary frame
    pub async fn next_binary(&mut self) -> Result<Vec<u8>> {
        loop {
            match self.next_message().await? {
                Message::Binary(bytes) => return Ok(bytes),
                Message::Close(frame) => bail!("connection closed: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Next envelope, decompressed if negotiated
    pub async fn next_resp(&mut self) -> Result<Resp> {
        let bytes = self.next_binary().await?;
        Ok(self.codec.decode_frame(&bytes, self.compress)?)
    }

    pub async fn next_text(&mut self) -> Result<String> {
        loop {
            match self.next_message().await? {
                Message::Text(text) => return Ok(text),
                Message::Close(frame) => bail!("connection closed: {frame:?}"),
                _ => {}
            }
        }
    }

    /// Whether the server ends the connection before the frame timeout
    pub async fn is_closed_by_server(&mut self) -> bool {
        loop {
            match tokio::time::timeout(FRAME_TIMEOUT, self.ws.next()).await {
                Err(_) => return false,
                Ok(None | Some(Err(_)) | Some(Ok(Message::Close(_)))) => return true,
                Ok(Some(Ok(_))) => {}
            }
        }
    }

    pub async fn close(mut self) -> Result<()> {
        self.ws.close(None).await?;
        Ok(())
    }
}
