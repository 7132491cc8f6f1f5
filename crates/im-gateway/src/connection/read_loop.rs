//! Per-connection read loop

use futures::{FutureExt, Stream, StreamExt};
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use super::transport::{Frame, TransportError};
use super::{Connection, ConnectionPool};
use crate::handlers::{GatewayError, MessageDispatcher};

/// Drives inbound frames of one connection until it ends
pub struct ReadLoop {
    dispatcher: Arc<MessageDispatcher>,
    pool: Arc<ConnectionPool>,
    pong_wait: Duration,
}

impl ReadLoop {
    #[must_use]
    pub fn new(dispatcher: Arc<MessageDispatcher>, pool: Arc<ConnectionPool>, pong_wait: Duration) -> Self {
        Self {
            dispatcher,
            pool,
            pong_wait,
        }
    }

    /// Read until error, close or shutdown, then tear the connection down once.
    ///
    /// A panic inside frame handling is caught here and becomes the close
    /// reason.
    pub async fn run<S>(&self, conn: Arc<Connection>, mut frames: S)
    where
        S: Stream<Item = Result<Frame, TransportError>> + Unpin + Send,
    {
        let reason = match AssertUnwindSafe(self.read_frames(&conn, &mut frames))
            .catch_unwind()
            .await
        {
            Ok(reason) => reason,
            Err(panic) => GatewayError::Panic(panic_message(panic.as_ref())),
        };

        match &reason {
            GatewayError::ClientClosed | GatewayError::ConnClosed | GatewayError::UserLogout => {
                tracing::debug!(conn_id = %conn.conn_id(), user_id = %conn.user_id(), reason = %reason, "Read loop ended");
            }
            GatewayError::Panic(_) => {
                tracing::error!(conn_id = %conn.conn_id(), user_id = %conn.user_id(), reason = %reason, "Read loop panicked");
            }
            _ => {
                tracing::info!(conn_id = %conn.conn_id(), user_id = %conn.user_id(), reason = %reason, "Connection dropped");
            }
        }

        conn.set_close_reason(reason.to_string());
        conn.close().await;
        drop(frames);
        self.pool.put(conn);
    }

    async fn read_frames<S>(&self, conn: &Arc<Connection>, frames: &mut S) -> GatewayError
    where
        S: Stream<Item = Result<Frame, TransportError>> + Unpin + Send,
    {
        loop {
            let next = tokio::select! {
                () = conn.cancelled() => return GatewayError::ConnClosed,
                next = tokio::time::timeout(self.pong_wait, frames.next()) => next,
            };

            let frame = match next {
                Err(_) => return GatewayError::ReadTimeout,
                Ok(None) => return GatewayError::ConnClosed,
                Ok(Some(Err(e))) => return GatewayError::Transport(e),
                Ok(Some(Ok(frame))) => frame,
            };
            if conn.is_closed() {
                return GatewayError::ConnClosed;
            }

            let handled = match frame {
                Frame::Binary(bytes) => self.dispatcher.handle_binary(conn, &bytes).await,
                Frame::Text(_) => Err(GatewayError::NotSupportMessageProtocol),
                Frame::Ping(data) => conn.write_pong(data).await,
                Frame::Pong(_) => Ok(()),
                Frame::Close => Err(GatewayError::ClientClosed),
            };
            if let Err(e) = handled {
                return e;
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
