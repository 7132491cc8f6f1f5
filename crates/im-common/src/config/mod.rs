//! Configuration structs

mod app_config;

pub use app_config::{
    AppConfig, AppSettings, ConfigError, Environment, GatewaySettings, JwtConfig,
    MultiLoginConfig, PresenceConfig, RedisConfig, ServerConfig, ServicesConfig, WebSocketConfig,
};
