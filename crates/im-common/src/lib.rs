//! # im-common
//!
//! Shared utilities including configuration, error handling, authentication, and telemetry.

pub mod auth;
pub mod config;
pub mod error;
pub mod telemetry;

// Re-export commonly used types at crate root
pub use auth::{Claims, JwtAuthService};
pub use config::{
    AppConfig, AppSettings, ConfigError, Environment, GatewaySettings, JwtConfig,
    MultiLoginConfig, PresenceConfig, RedisConfig, ServerConfig, ServicesConfig, WebSocketConfig,
};
pub use error::{AppError, AppResult};
pub use telemetry::{try_init_tracing, TracingConfig, TracingError};
