//! One authenticated long connection
//!
//! A `Connection` owns the write half of its transport. All outbound frames
//! go through [`Connection::write_frame`], which serializes writers on one lock
//! and turns writes after close into no-ops.

use im_core::{OperationContext, PlatformId};
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;

use super::transport::{Frame, FrameSink, TransportError};
use crate::handlers::{GatewayError, GatewayResult};
use crate::protocol::{CodecError, GatewayCodec, OnlineStatusPush, PushKind, Resp};

/// Client SDK flavour declared at handshake
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SdkType {
    #[default]
    Go,
    Js,
}

impl SdkType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Go => "go",
            Self::Js => "js",
        }
    }
}

impl FromStr for SdkType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "go" => Ok(Self::Go),
            "js" => Ok(Self::Js),
            other => Err(format!("unknown sdkType: {other}")),
        }
    }
}

/// Identity and negotiated options of one session
#[derive(Debug, Clone, Default)]
pub struct SessionParams {
    pub user_id: String,
    pub platform_id: PlatformId,
    pub token: String,
    pub remote_addr: String,
    pub sdk_type: SdkType,
    pub compress: bool,
    pub background: bool,
}

/// Server-side wiring a registered connection needs
#[derive(Debug, Clone)]
pub struct ConnectionHooks {
    /// Where the connection announces its own teardown
    pub unregister: mpsc::Sender<Arc<Connection>>,
    /// Child of the server shutdown token
    pub cancel: CancellationToken,
    pub write_timeout: Duration,
}

/// A WebSocket client connection
pub struct Connection {
    user_id: String,
    platform_id: PlatformId,
    token: String,
    remote_addr: String,
    conn_id: String,
    sdk_type: SdkType,
    compress: bool,
    /// Unix milliseconds
    connected_at: i64,

    background: AtomicBool,
    closed: AtomicBool,
    close_reason: Mutex<Option<String>>,

    /// Users this connection subscribed to for presence
    subscriptions: Mutex<HashSet<String>>,

    writer: AsyncMutex<Option<Box<dyn FrameSink>>>,
    codec: Arc<GatewayCodec>,
    unregister: Option<mpsc::Sender<Arc<Connection>>>,
    cancel: CancellationToken,
    write_timeout: Duration,
}

impl Connection {
    /// Pool default; unusable until [`Connection::reset`]
    pub(crate) fn empty(codec: Arc<GatewayCodec>) -> Self {
        Self {
            user_id: String::new(),
            platform_id: PlatformId::default(),
            token: String::new(),
            remote_addr: String::new(),
            conn_id: String::new(),
            sdk_type: SdkType::default(),
            compress: false,
            connected_at: 0,
            background: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            close_reason: Mutex::new(None),
            subscriptions: Mutex::new(HashSet::new()),
            writer: AsyncMutex::new(None),
            codec,
            unregister: None,
            cancel: CancellationToken::new(),
            write_timeout: Duration::from_secs(10),
        }
    }

    /// Reinitialize every mutable field for a new session.
    ///
    /// This is the only way a connection becomes usable, fresh or pooled.
    pub fn reset(&mut self, params: SessionParams, sink: Box<dyn FrameSink>, hooks: ConnectionHooks) {
        self.scrub();

        let connected_at = chrono::Utc::now();
        self.conn_id = derive_conn_id(&params.remote_addr, connected_at.timestamp_nanos_opt().unwrap_or_default());
        self.connected_at = connected_at.timestamp_millis();

        self.user_id = params.user_id;
        self.platform_id = params.platform_id;
        self.token = params.token;
        self.remote_addr = params.remote_addr;
        self.sdk_type = params.sdk_type;
        self.compress = params.compress;
        self.background.store(params.background, Ordering::Release);

        *self.writer.get_mut() = Some(sink);
        self.unregister = Some(hooks.unregister);
        self.cancel = hooks.cancel;
        self.write_timeout = hooks.write_timeout;
    }

    /// Drop everything that belongs to the previous session
    pub(crate) fn scrub(&mut self) {
        self.user_id.clear();
        self.platform_id = PlatformId::default();
        self.token.clear();
        self.remote_addr.clear();
        self.conn_id.clear();
        self.sdk_type = SdkType::default();
        self.compress = false;
        self.connected_at = 0;
        *self.background.get_mut() = false;
        *self.closed.get_mut() = false;
        *self.close_reason.get_mut() = None;
        self.subscriptions.get_mut().clear();
        *self.writer.get_mut() = None;
        self.unregister = None;
        self.cancel = CancellationToken::new();
    }

    /// Whether no trace of a previous session remains
    pub(crate) fn is_pristine(&self) -> bool {
        self.user_id.is_empty()
            && self.token.is_empty()
            && self.conn_id.is_empty()
            && self.unregister.is_none()
            && self.close_reason.lock().is_none()
            && self.subscriptions.lock().is_empty()
            && self.writer.try_lock().is_ok_and(|w| w.is_none())
    }

    /// A transport-less connection used to evaluate a remote login
    #[must_use]
    pub fn detached(params: SessionParams, codec: Arc<GatewayCodec>) -> Self {
        let mut conn = Self::empty(codec);
        conn.user_id = params.user_id;
        conn.platform_id = params.platform_id;
        conn.token = params.token;
        conn.remote_addr = params.remote_addr;
        conn.sdk_type = params.sdk_type;
        conn.compress = params.compress;
        *conn.background.get_mut() = params.background;
        conn
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn platform_id(&self) -> PlatformId {
        self.platform_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn remote_addr(&self) -> &str {
        &self.remote_addr
    }

    pub fn conn_id(&self) -> &str {
        &self.conn_id
    }

    pub fn sdk_type(&self) -> SdkType {
        self.sdk_type
    }

    pub fn is_compressed(&self) -> bool {
        self.compress
    }

    pub fn connected_at(&self) -> i64 {
        self.connected_at
    }

    pub fn is_background(&self) -> bool {
        self.background.load(Ordering::Acquire)
    }

    pub fn set_background(&self, background: bool) {
        self.background.store(background, Ordering::Release);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn codec(&self) -> &GatewayCodec {
        &self.codec
    }

    /// Resolves when the connection is closed or the server shuts down
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await;
    }

    pub fn close_reason(&self) -> Option<String> {
        self.close_reason.lock().clone()
    }

    /// Record why the connection ended; the first reason wins
    pub fn set_close_reason(&self, reason: impl Into<String>) {
        let mut slot = self.close_reason.lock();
        if slot.is_none() {
            *slot = Some(reason.into());
        }
    }

    /// Context handed to business handlers for one request
    pub fn operation_context(&self, operation_id: &str) -> OperationContext {
        OperationContext {
            operation_id: operation_id.to_string(),
            user_id: self.user_id.clone(),
            platform_id: self.platform_id,
            conn_id: self.conn_id.clone(),
            token: self.token.clone(),
        }
    }

    /// Connection-local subscription set; lock it before the shared index
    pub(crate) fn subscriptions(&self) -> &Mutex<HashSet<String>> {
        &self.subscriptions
    }

    // ========================================================================
    // Write path
    // ========================================================================

    /// Write one frame; a write after close is a silent no-op
    pub async fn write_frame(&self, frame: Frame) -> Result<(), TransportError> {
        let mut writer = self.writer.lock().await;
        if self.is_closed() {
            return Ok(());
        }
        let Some(sink) = writer.as_mut() else {
            return Ok(());
        };

        match tokio::time::timeout(self.write_timeout, sink.send(frame)).await {
            Ok(result) => result,
            Err(_) => Err(TransportError::WriteTimeout),
        }
    }

    /// Encode, compress if negotiated, and write an envelope
    pub async fn write_resp(&self, resp: &Resp) -> GatewayResult<()> {
        let bytes = self.codec.encode_frame(resp, self.compress)?;
        tracing::trace!(
            conn_id = %self.conn_id,
            req_identifier = resp.req_identifier,
            err_code = resp.err_code,
            bytes = bytes.len(),
            "resp"
        );
        self.write_frame(Frame::Binary(bytes)).await?;
        Ok(())
    }

    /// Deliver a message push
    pub async fn push_message(&self, operation_id: &str, data: Vec<u8>) -> GatewayResult<()> {
        self.write_resp(&Resp::push(PushKind::PushMsg, operation_id, data))
            .await
    }

    /// Deliver a presence change of a subscribed user
    pub async fn push_online_status(&self, status: &OnlineStatusPush) -> GatewayResult<()> {
        let data = serde_json::to_vec(status)
            .map_err(|e| GatewayError::Codec(CodecError::Encode(e.to_string())))?;
        self.write_resp(&Resp::push(PushKind::OnlineStatusChanged, "", data))
            .await
    }

    /// Write the kick notice; closing is left to the caller
    pub async fn kick_online_message(&self) -> GatewayResult<()> {
        self.write_resp(&Resp::push(PushKind::KickOnlineMsg, "", Vec::new()))
            .await
    }

    pub async fn write_pong(&self, data: Vec<u8>) -> GatewayResult<()> {
        self.write_frame(Frame::Pong(data)).await?;
        Ok(())
    }

    /// Handshake replies travel as text frames
    pub async fn write_text(&self, text: String) -> GatewayResult<()> {
        self.write_frame(Frame::Text(text)).await?;
        Ok(())
    }

    /// Close the transport and announce the teardown.
    ///
    /// Idempotent: the closed flag is swapped under the write lock, so only
    /// the first caller closes the sink and notifies the server.
    pub async fn close(self: &Arc<Self>) {
        let sink = {
            let mut writer = self.writer.lock().await;
            if self.closed.swap(true, Ordering::AcqRel) {
                return;
            }
            writer.take()
        };

        if let Some(mut sink) = sink {
            match tokio::time::timeout(self.write_timeout, sink.close()).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(conn_id = %self.conn_id, error = %e, "Close frame failed"),
                Err(_) => tracing::debug!(conn_id = %self.conn_id, "Close timed out"),
            }
        }
        self.cancel.cancel();

        let Some(unregister) = self.unregister.clone() else {
            return;
        };
        match unregister.try_send(Arc::clone(self)) {
            Ok(()) => {}
            Err(mpsc::error::TrySendError::Full(conn)) => {
                tokio::spawn(async move {
                    let _ = unregister.send(conn).await;
                });
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                tracing::debug!(conn_id = %self.conn_id, "Server gone, unregister skipped");
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("user_id", &self.user_id)
            .field("platform_id", &self.platform_id)
            .field("conn_id", &self.conn_id)
            .field("remote_addr", &self.remote_addr)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Hex of the first 16 bytes of sha256(remote address, connect time)
fn derive_conn_id(remote_addr: &str, connected_at_nanos: i64) -> String {
    let mut hasher = Sha256::new();
    hasher.update(remote_addr.as_bytes());
    hasher.update(connected_at_nanos.to_be_bytes());
    hex::encode(&hasher.finalize()[..16])
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::connection::transport::ChannelSink;
    use crate::protocol::{GatewayCodec, Resp};

    /// A registered-looking connection whose frames land in a channel
    pub(crate) struct TestConn {
        pub conn: Arc<Connection>,
        pub frames: mpsc::UnboundedReceiver<Frame>,
        pub unregistered: mpsc::Receiver<Arc<Connection>>,
    }

    impl TestConn {
        /// Next binary frame decoded as an envelope
        pub(crate) async fn next_resp(&mut self) -> Resp {
            loop {
                match self.frames.recv().await {
                    Some(Frame::Binary(bytes)) => {
                        return self
                            .conn
                            .codec()
                            .decode_frame(&bytes, self.conn.is_compressed())
                            .unwrap()
                    }
                    Some(_) => continue,
                    None => panic!("sink dropped"),
                }
            }
        }

        pub(crate) fn try_next(&mut self) -> Option<Frame> {
            self.frames.try_recv().ok()
        }
    }

    pub(crate) fn params(user_id: &str, platform_id: PlatformId, token: &str, addr: &str) -> SessionParams {
        SessionParams {
            user_id: user_id.to_string(),
            platform_id,
            token: token.to_string(),
            remote_addr: addr.to_string(),
            ..SessionParams::default()
        }
    }

    pub(crate) fn connect(user_id: &str, platform_id: PlatformId, token: &str, addr: &str) -> TestConn {
        connect_with(params(user_id, platform_id, token, addr))
    }

    pub(crate) fn connect_with(params: SessionParams) -> TestConn {
        let (sink, frames) = ChannelSink::new();
        let (unregister, unregistered) = mpsc::channel(16);
        let mut conn = Connection::empty(Arc::new(GatewayCodec::default()));
        conn.reset(
            params,
            Box::new(sink),
            ConnectionHooks {
                unregister,
                cancel: CancellationToken::new(),
                write_timeout: Duration::from_secs(1),
            },
        );
        TestConn {
            conn: Arc::new(conn),
            frames,
            unregistered,
        }
    }
}
