//! Test fixtures and collaborator stubs
//!
//! Provides request builders and a message service that answers without a
//! backend.

use async_trait::async_trait;
use im_core::{DomainError, DomainResult, MessageService, OperationContext};
use serde::Deserialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counter for unique test data
static COUNTER: AtomicU64 = AtomicU64::new(1);

/// Get a unique suffix for test data
pub fn unique_suffix() -> u64 {
    COUNTER.fetch_add(1, Ordering::SeqCst)
}

/// A user ID no other test uses
pub fn unique_user(prefix: &str) -> String {
    format!("{prefix}-{}", unique_suffix())
}

/// Payload that makes [`StubMessageService`] answer with a business error
pub const REJECT_PAYLOAD: &[u8] = b"reject";

/// Business error returned for [`REJECT_PAYLOAD`]
pub const REJECT_CODE: i32 = 1302;
pub const REJECT_MESSAGE: &str = "muted in group";

/// Request kind identifiers
pub mod kinds {
    pub const GET_NEWEST_SEQ: i32 = 1001;
    pub const SEND_MSG: i32 = 1003;
    pub const LOGOUT: i32 = 2003;
    pub const SET_BACKGROUND_STATUS: i32 = 2004;
    pub const SUB_USER_ONLINE_STATUS: i32 = 2005;

    pub const PUSH_MSG: i32 = 2001;
    pub const KICK_ONLINE_MSG: i32 = 2002;
    pub const ONLINE_STATUS_CHANGED: i32 = 2006;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BackgroundReq {
    #[serde(default)]
    is_background: bool,
}

/// Message service that echoes the payload back
#[derive(Debug, Default)]
pub struct StubMessageService;

impl StubMessageService {
    fn answer(data: &[u8]) -> DomainResult<Vec<u8>> {
        if data == REJECT_PAYLOAD {
            return Err(DomainError::business(REJECT_CODE, REJECT_MESSAGE));
        }
        Ok(data.to_vec())
    }
}

#[async_trait]
impl MessageService for StubMessageService {
    async fn get_seq(&self, _ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        Self::answer(data)
    }

    async fn send_message(&self, _ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        Self::answer(data)
    }

    async fn send_signal_message(&self, _ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        Self::answer(data)
    }

    async fn pull_message_by_seq_list(&self, _ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        Self::answer(data)
    }

    async fn get_seq_message(&self, _ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>> {
        Self::answer(data)
    }

    async fn get_conversations_has_read_and_max_seq(
        &self,
        _ctx: &OperationContext,
        data: &[u8],
    ) -> DomainResult<Vec<u8>> {
        Self::answer(data)
    }

    async fn user_logout(&self, _ctx: &OperationContext, _data: &[u8]) -> DomainResult<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn set_user_device_background(
        &self,
        _ctx: &OperationContext,
        data: &[u8],
    ) -> DomainResult<(Vec<u8>, bool)> {
        let req: BackgroundReq =
            serde_json::from_slice(data).map_err(|e| DomainError::Args(e.to_string()))?;
        Ok((Vec::new(), req.is_background))
    }
}
