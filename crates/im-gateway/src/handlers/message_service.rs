//! HTTP adapter for the message service
//!
//! Each request kind is a `POST {base}/msg/{kind}` carrying the opaque payload
//! and the operation context as headers.

use async_trait::async_trait;
use im_common::{AppError, AppResult};
use im_core::{DomainError, DomainResult, MessageService, OperationContext};
use serde::Deserialize;
use std::time::Duration;

use crate::protocol::RequestKind;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorBody {
    err_code: i32,
    #[serde(default)]
    err_msg: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackgroundReq {
    #[serde(default)]
    is_background: bool,
}

/// [`MessageService`] over HTTP
#[derive(Debug, Clone)]
pub struct HttpMessageService {
    http: reqwest::Client,
    base_url: String,
}

impl HttpMessageService {
    pub fn new(base_url: &str, timeout: Duration) -> AppResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::ExternalService(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    async fn post(&self, kind: RequestKind, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        let url = format!("{}/msg/{}", self.base_url, kind.path());
        let resp = self
            .http
            .post(&url)
            .header("operationID", &ctx.operation_id)
            .header("userID", &ctx.user_id)
            .header("platformID", ctx.platform_id.to_string())
            .header("connID", &ctx.conn_id)
            .header("token", &ctx.token)
            .body(data.to_vec())
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        let body = resp.bytes().await.map_err(map_transport_error)?;
        if status.is_success() {
            return Ok(body.to_vec());
        }

        match serde_json::from_slice::<ErrorBody>(&body) {
            Ok(err) => Err(DomainError::business(err.err_code, err.err_msg)),
            Err(_) => Err(DomainError::internal(format!(
                "message service answered {status} for {kind}"
            ))),
        }
    }
}

fn map_transport_error(err: reqwest::Error) -> DomainError {
    if err.is_timeout() {
        DomainError::Timeout {
            service: "message service",
        }
    } else {
        DomainError::internal(err)
    }
}

#[async_trait]
impl MessageService for HttpMessageService {
    async fn get_seq(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        self.post(RequestKind::GetNewestSeq, ctx, data).await
    }

    async fn send_message(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        self.post(RequestKind::SendMsg, ctx, data).await
    }

    async fn send_signal_message(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        self.post(RequestKind::SendSignalMsg, ctx, data).await
    }

    async fn pull_message_by_seq_list(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        self.post(RequestKind::PullMsgBySeqList, ctx, data).await
    }

    async fn get_seq_message(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        self.post(RequestKind::PullMsg, ctx, data).await
    }

    async fn get_conversations_has_read_and_max_seq(
        &self,
        ctx: &OperationContext,
        data: &[u8],
    ) -> DomainResult<Vec<u8>> {
        self.post(RequestKind::GetConvMaxReadSeq, ctx, data).await
    }

    async fn user_logout(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        self.post(RequestKind::Logout, ctx, data).await
    }

    async fn set_user_device_background(
        &self,
        ctx: &OperationContext,
        data: &[u8],
    ) -> DomainResult<(Vec<u8>, bool)> {
        let req: BackgroundReq =
            serde_json::from_slice(data).map_err(|e| DomainError::Args(e.to_string()))?;
        let reply = self.post(RequestKind::SetBackgroundStatus, ctx, data).await?;
        Ok((reply, req.is_background))
    }
}
