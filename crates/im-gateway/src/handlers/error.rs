//! Gateway error types
//!
//! Handshake errors become HTTP responses; everything else ends one
//! connection and is recorded as its close reason.

use axum::http::{HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use im_core::DomainError;
use thiserror::Error;

use crate::connection::TransportError;
use crate::protocol::{CodecError, StatusReply};

/// Connection- and handshake-scoped errors
#[derive(Debug, Error)]
pub enum GatewayError {
    // =========================================================================
    // Handshake Errors
    // =========================================================================
    #[error("connection count over limit")]
    ConnOverMaxNumLimit,

    #[error("args error: {0}")]
    Args(String),

    #[error("{0}")]
    Auth(DomainError),

    #[error("token identity does not match handshake parameters")]
    IdentityMismatch,

    #[error("server is shutting down")]
    ShuttingDown,

    // =========================================================================
    // Connection Errors
    // =========================================================================
    #[error("text frames are not supported")]
    NotSupportMessageProtocol,

    #[error("client sent close frame")]
    ClientClosed,

    #[error("connection closed")]
    ConnClosed,

    #[error("panic: {0}")]
    Panic(String),

    #[error("read deadline exceeded")]
    ReadTimeout,

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error("request validation failed: {0}")]
    Validation(String),

    #[error("sendID mismatch: connection is {expected}, request claims {got}")]
    SendIdMismatch { expected: String, got: String },

    #[error("unknown reqIdentifier {0}")]
    UnknownRequest(i32),

    #[error("user logged out")]
    UserLogout,

    #[error(transparent)]
    Transport(#[from] TransportError),

    // =========================================================================
    // Push Errors
    // =========================================================================
    #[error("push to connection failed")]
    PushMessage,

    #[error("iOS connection is in background")]
    IosBackgroundPush,
}

impl GatewayError {
    /// Numeric code written into `errCode`
    pub fn code(&self) -> i32 {
        match self {
            Self::ConnOverMaxNumLimit => 1601,
            Self::Args(_) => 1602,
            Self::PushMessage => 1603,
            Self::IosBackgroundPush => 1604,
            Self::Auth(e) => e.code(),
            Self::IdentityMismatch => DomainError::NoPermission(String::new()).code(),
            Self::Validation(_) | Self::SendIdMismatch { .. } | Self::UnknownRequest(_) | Self::Codec(_) => {
                DomainError::Args(String::new()).code()
            }
            _ => 500,
        }
    }

    /// HTTP status for a rejected handshake
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Args(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Auth(e) if e.is_token_error() => StatusCode::UNAUTHORIZED,
            Self::Auth(DomainError::Timeout { .. }) => StatusCode::GATEWAY_TIMEOUT,
            Self::Auth(DomainError::Args(_)) => StatusCode::BAD_REQUEST,
            Self::IdentityMismatch => StatusCode::FORBIDDEN,
            Self::ConnOverMaxNumLimit | Self::ShuttingDown => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Body sent when a handshake fails
    pub fn status_reply(&self) -> StatusReply {
        StatusReply::error(self.code(), self.to_string())
    }
}

impl From<validator::ValidationErrors> for GatewayError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = ?self, "Handshake failed");
        }

        let reply = self.status_reply();
        let mut response = (status, Json(&reply)).into_response();
        if let Ok(value) = HeaderValue::from_str(&reply.err_msg) {
            response.headers_mut().insert("ws_err_msg", value);
        }
        response
    }
}

/// Gateway result type
pub type GatewayResult<T> = Result<T, GatewayError>;
