//! Request handlers
//!
//! Decodes inbound binary frames, checks them against the connection's
//! identity, and routes each request kind to its handler. Business errors are
//! written back in the reply; protocol violations end the connection.

mod error;
mod message_service;
mod subscribe;

pub use error::{GatewayError, GatewayResult};
pub use message_service::HttpMessageService;

use im_core::{DomainError, DomainResult, MessageService, OperationContext, PresenceStore};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use validator::Validate;

use crate::connection::Connection;
use crate::presence::Subscription;
use crate::protocol::{Req, RequestKind, Resp};

/// Routes decoded requests of every connection
pub struct MessageDispatcher {
    messages: Arc<dyn MessageService>,
    subscription: Arc<Subscription>,
    presence: Arc<dyn PresenceStore>,
    call_timeout: Duration,
}

impl MessageDispatcher {
    #[must_use]
    pub fn new(
        messages: Arc<dyn MessageService>,
        subscription: Arc<Subscription>,
        presence: Arc<dyn PresenceStore>,
        call_timeout: Duration,
    ) -> Self {
        Self {
            messages,
            subscription,
            presence,
            call_timeout,
        }
    }

    /// Handle one binary frame from `conn`.
    ///
    /// `Ok` keeps the connection open; any `Err` ends it.
    pub async fn handle_binary(&self, conn: &Arc<Connection>, bytes: &[u8]) -> GatewayResult<()> {
        let req: Req = conn.codec().decode_frame(bytes, conn.is_compressed())?;
        req.validate()?;
        if req.send_id != conn.user_id() {
            return Err(GatewayError::SendIdMismatch {
                expected: conn.user_id().to_string(),
                got: req.send_id,
            });
        }
        let kind = RequestKind::from_i32(req.req_identifier)
            .ok_or(GatewayError::UnknownRequest(req.req_identifier))?;

        tracing::debug!(
            conn_id = %conn.conn_id(),
            user_id = %conn.user_id(),
            operation_id = %req.operation_id,
            kind = %kind,
            "req"
        );

        let ctx = conn.operation_context(&req.operation_id);
        let result = self.dispatch(conn, kind, &ctx, &req.data).await;
        if let Err(e) = &result {
            tracing::debug!(operation_id = %req.operation_id, kind = %kind, error = %e, "Request rejected");
        }
        conn.write_resp(&Resp::reply_to(&req, result)).await?;

        if kind == RequestKind::Logout {
            return Err(GatewayError::UserLogout);
        }
        Ok(())
    }

    async fn dispatch(
        &self,
        conn: &Arc<Connection>,
        kind: RequestKind,
        ctx: &OperationContext,
        data: &[u8],
    ) -> DomainResult<Vec<u8>> {
        let messages = &self.messages;
        match kind {
            RequestKind::GetNewestSeq => self.call(messages.get_seq(ctx, data)).await,
            RequestKind::PullMsgBySeqList => self.call(messages.pull_message_by_seq_list(ctx, data)).await,
            RequestKind::SendMsg => self.call(messages.send_message(ctx, data)).await,
            RequestKind::SendSignalMsg => self.call(messages.send_signal_message(ctx, data)).await,
            RequestKind::PullMsg => self.call(messages.get_seq_message(ctx, data)).await,
            RequestKind::GetConvMaxReadSeq => {
                self.call(messages.get_conversations_has_read_and_max_seq(ctx, data))
                    .await
            }
            RequestKind::Logout => self.call(messages.user_logout(ctx, data)).await,
            RequestKind::SetBackgroundStatus => {
                let (reply, background) = self.call(messages.set_user_device_background(ctx, data)).await?;
                conn.set_background(background);
                Ok(reply)
            }
            RequestKind::SubUserOnlineStatus => self.sub_user_online_status(conn, data).await,
        }
    }

    async fn call<T>(&self, fut: impl Future<Output = DomainResult<T>>) -> DomainResult<T> {
        tokio::time::timeout(self.call_timeout, fut)
            .await
            .map_err(|_| DomainError::Timeout {
                service: "message service",
            })?
    }
}
