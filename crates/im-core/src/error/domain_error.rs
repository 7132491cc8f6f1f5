//! Domain errors - business and collaborator failures with stable wire codes

use thiserror::Error;

/// Domain layer errors
///
/// Every variant carries a numeric code that is written into the `errCode`
/// field of a reply frame.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    // =========================================================================
    // Request Errors
    // =========================================================================
    #[error("args error: {0}")]
    Args(String),

    #[error("no permission: {0}")]
    NoPermission(String),

    #[error("record not found: {0}")]
    RecordNotFound(String),

    // =========================================================================
    // Token Errors
    // =========================================================================
    #[error("token has expired")]
    TokenExpired,

    #[error("token is invalid")]
    TokenInvalid,

    #[error("token is malformed")]
    TokenMalformed,

    #[error("token has been kicked")]
    TokenKicked,

    // =========================================================================
    // Downstream Errors
    // =========================================================================
    /// Error reported verbatim by a downstream service
    #[error("{message}")]
    Business { code: i32, message: String },

    #[error("request to {service} timed out")]
    Timeout { service: &'static str },

    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    /// Get the numeric code carried in reply frames
    pub fn code(&self) -> i32 {
        match self {
            Self::Args(_) => 1001,
            Self::NoPermission(_) => 1002,
            Self::RecordNotFound(_) => 1004,
            Self::TokenExpired => 1501,
            Self::TokenInvalid => 1502,
            Self::TokenMalformed => 1503,
            Self::TokenKicked => 1506,
            Self::Business { code, .. } => *code,
            Self::Timeout { .. } | Self::Internal(_) => 500,
        }
    }

    /// Check if this error rejects a credential
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::TokenExpired | Self::TokenInvalid | Self::TokenMalformed | Self::TokenKicked
        )
    }

    /// Check if this error is a transient collaborator failure
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Timeout { .. } | Self::Internal(_))
    }

    /// Create a downstream business error
    pub fn business(code: i32, message: impl Into<String>) -> Self {
        Self::Business {
            code,
            message: message.into(),
        }
    }

    /// Create an internal error from any displayable error
    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }
}

/// Result type for domain operations and collaborator ports
pub type DomainResult<T> = Result<T, DomainError>;
