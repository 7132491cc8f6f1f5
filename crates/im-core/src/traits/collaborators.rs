//! Collaborator traits (ports) - the narrow interfaces the gateway consumes
//!
//! The gateway owns connections and presence distribution. Token
//! verification, message storage, the presence store and other gateway
//! instances are reached only through these traits; infrastructure crates
//! provide the implementations.

use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::error::DomainResult;
use crate::events::{PresenceChange, PresenceEvent};
use crate::value_objects::PlatformId;

/// Per-request context handed to business handlers
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OperationContext {
    /// Caller-supplied correlation id
    pub operation_id: String,
    /// Authenticated user of the connection
    pub user_id: String,
    pub platform_id: PlatformId,
    pub conn_id: String,
    pub token: String,
}

/// Identity carried by a verified token
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub user_id: String,
    pub platform_id: PlatformId,
}

// ============================================================================
// Authentication
// ============================================================================

#[async_trait]
pub trait AuthService: Send + Sync {
    /// Verify a token and return the identity it was issued for
    async fn parse_token(&self, token: &str) -> DomainResult<TokenClaims>;

    /// Invalidate tokens so they can no longer authenticate
    async fn kick_tokens(&self, user_id: &str, tokens: &[String]) -> DomainResult<()>;
}

// ============================================================================
// Message Service
// ============================================================================

/// Business handlers for client requests
///
/// Payloads are opaque to the gateway; each method returns the reply payload
/// or a business error that is written back in the reply frame.
#[async_trait]
pub trait MessageService: Send + Sync {
    async fn get_seq(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>>;

    async fn send_message(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>>;

    async fn send_signal_message(&self, ctx: &OperationContext, data: &[u8])
        -> DomainResult<Vec<u8>>;

    async fn pull_message_by_seq_list(
        &self,
        ctx: &OperationContext,
        data: &[u8],
    ) -> DomainResult<Vec<u8>>;

    async fn get_seq_message(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>>;

    async fn get_conversations_has_read_and_max_seq(
        &self,
        ctx: &OperationContext,
        data: &[u8],
    ) -> DomainResult<Vec<u8>>;

    async fn user_logout(&self, ctx: &OperationContext, data: &[u8]) -> DomainResult<Vec<u8>>;

    /// Returns the reply payload and the background flag the client reported
    async fn set_user_device_background(
        &self,
        ctx: &OperationContext,
        data: &[u8],
    ) -> DomainResult<(Vec<u8>, bool)>;
}

// ============================================================================
// Presence Store
// ============================================================================

#[async_trait]
pub trait PresenceStore: Send + Sync {
    /// Apply a batch of local presence deltas
    async fn set_user_online_status(&self, batch: &[PresenceEvent]) -> DomainResult<()>;

    /// Get every platform the user is online on, across all gateways
    async fn get_user_online_platforms(&self, user_id: &str) -> DomainResult<Vec<PlatformId>>;

    /// Stream of presence changes applied by any gateway
    fn watch_changes(&self) -> BoxStream<'static, PresenceChange>;
}

// ============================================================================
// Peer Gateways
// ============================================================================

#[async_trait]
pub trait PeerGateway: Send + Sync {
    /// Tell every other gateway that `user_id` logged in on `platform_id`
    /// with `token`, so conflicting sessions they hold can be evicted
    async fn multi_terminal_login_check(
        &self,
        user_id: &str,
        platform_id: PlatformId,
        token: &str,
    ) -> DomainResult<()>;
}
