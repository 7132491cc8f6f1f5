//! Application error types
//!
//! Process-level failures: configuration, startup, and infrastructure setup.
//! Per-connection and per-request failures never reach this type.

use im_core::DomainError;

use crate::config::ConfigError;

/// Application-wide error type
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },

    #[error("Server error: {0}")]
    Server(String),

    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Token error: {0}")]
    Token(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Shutdown timed out after {0} seconds")]
    ShutdownTimeout(u64),

    #[error(transparent)]
    Domain(#[from] DomainError),
}

impl AppError {
    /// Process exit status, following the BSD `sysexits` convention
    #[must_use]
    pub fn exit_code(&self) -> i32 {
        match self {
            // EX_CONFIG
            Self::Config(_) | Self::Token(_) => 78,
            // EX_UNAVAILABLE
            Self::Bind { .. } | Self::Cache(_) | Self::ExternalService(_) => 69,
            // EX_TEMPFAIL
            Self::ShutdownTimeout(_) => 75,
            // EX_SOFTWARE
            Self::Server(_) | Self::Domain(_) => 70,
        }
    }
}

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;
