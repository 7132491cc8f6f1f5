//! Application configuration structs
//!
//! Loads configuration from environment variables (and a `.env` file when present).

use im_core::MultiLoginPolicy;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app: AppSettings,
    pub gateway: GatewaySettings,
    pub websocket: WebSocketConfig,
    pub multi_login: MultiLoginConfig,
    pub presence: PresenceConfig,
    /// Redis presence store; `None` selects the in-memory store
    pub redis: Option<RedisConfig>,
    pub jwt: JwtConfig,
    pub services: ServicesConfig,
}

/// General application settings
#[derive(Debug, Clone)]
pub struct AppSettings {
    pub name: String,
    pub env: Environment,
}

/// Environment type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Environment {
    #[must_use]
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }

    #[must_use]
    pub fn is_development(&self) -> bool {
        matches!(self, Self::Development)
    }

    fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "production" => Some(Self::Production),
            "staging" => Some(Self::Staging),
            "development" => Some(Self::Development),
            _ => None,
        }
    }
}

/// Listen address
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    #[must_use]
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Gateway process settings
#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub server: ServerConfig,
    /// Base URL peers use to reach this node; excluded from peer fan-out
    pub advertise_addr: Option<String>,
    pub shutdown_timeout_secs: u64,
}

impl GatewaySettings {
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

/// Long-connection limits and keep-alive timing
#[derive(Debug, Clone)]
pub struct WebSocketConfig {
    pub max_conn_num: usize,
    pub handshake_timeout_secs: u64,
    pub max_message_size: usize,
    pub write_buffer_size: usize,
    pub pong_wait_secs: u64,
    pub write_wait_secs: u64,
}

impl WebSocketConfig {
    #[must_use]
    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs)
    }

    #[must_use]
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs)
    }

    #[must_use]
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs)
    }
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            max_conn_num: default_max_conn_num(),
            handshake_timeout_secs: default_handshake_timeout_secs(),
            max_message_size: default_max_message_size(),
            write_buffer_size: default_write_buffer_size(),
            pong_wait_secs: default_pong_wait_secs(),
            write_wait_secs: default_write_wait_secs(),
        }
    }
}

/// Multi-terminal login policy selection
#[derive(Debug, Clone, Copy, Default)]
pub struct MultiLoginConfig {
    pub policy: MultiLoginPolicy,
}

/// Presence broadcaster tuning
#[derive(Debug, Clone)]
pub struct PresenceConfig {
    pub merge_interval_ms: u64,
    pub full_scan_interval_secs: u64,
    pub lanes: usize,
    pub lane_capacity: usize,
    pub batch_size: usize,
    pub channel_capacity: usize,
    pub ttl_secs: u64,
}

impl PresenceConfig {
    #[must_use]
    pub fn merge_interval(&self) -> Duration {
        Duration::from_millis(self.merge_interval_ms)
    }

    #[must_use]
    pub fn full_scan_interval(&self) -> Duration {
        Duration::from_secs(self.full_scan_interval_secs)
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            merge_interval_ms: default_merge_interval_ms(),
            full_scan_interval_secs: default_full_scan_interval_secs(),
            lanes: default_presence_lanes(),
            lane_capacity: default_lane_capacity(),
            batch_size: default_batch_size(),
            channel_capacity: default_channel_capacity(),
            ttl_secs: default_presence_ttl_secs(),
        }
    }
}

/// Redis configuration
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub max_connections: u32,
    /// Bound on waiting for, creating, or recycling a pooled connection
    pub timeout_ms: u64,
}

impl RedisConfig {
    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub secret: String,
    pub token_expiry: i64,
}

/// Downstream collaborators
#[derive(Debug, Clone)]
pub struct ServicesConfig {
    pub msg_service_url: String,
    /// Base URLs of the other gateway instances
    pub peers: Vec<String>,
    pub rpc_timeout_ms: u64,
}

impl ServicesConfig {
    #[must_use]
    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

// Default value functions
fn default_app_name() -> String {
    "im-gateway".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    10001
}

fn default_shutdown_timeout_secs() -> u64 {
    15
}

fn default_max_conn_num() -> usize {
    100_000
}

fn default_handshake_timeout_secs() -> u64 {
    10
}

fn default_max_message_size() -> usize {
    51200
}

fn default_write_buffer_size() -> usize {
    4096
}

fn default_pong_wait_secs() -> u64 {
    30
}

fn default_write_wait_secs() -> u64 {
    10
}

fn default_merge_interval_ms() -> u64 {
    1000
}

fn default_full_scan_interval_secs() -> u64 {
    300 // 5 minutes
}

fn default_presence_lanes() -> usize {
    8
}

fn default_lane_capacity() -> usize {
    1024
}

fn default_batch_size() -> usize {
    100
}

fn default_channel_capacity() -> usize {
    10_000
}

fn default_presence_ttl_secs() -> u64 {
    900 // 15 minutes
}

fn default_redis_max_connections() -> u32 {
    16
}

fn default_redis_timeout_ms() -> u64 {
    1000
}

fn default_token_expiry() -> i64 {
    604_800 // 7 days
}

fn default_msg_service_url() -> String {
    "http://127.0.0.1:10130".to_string()
}

fn default_rpc_timeout_ms() -> u64 {
    5000
}

/// Parse an optional variable, falling back to `default` when unset
fn parse_or<T, F>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: F,
) -> Result<T, ConfigError>
where
    T: FromStr,
    F: FnOnce() -> T,
{
    match lookup(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(name, raw)),
        None => Ok(default()),
    }
}

impl AppConfig {
    /// Load configuration from environment variables
    ///
    /// # Errors
    /// Returns an error if required environment variables are missing or malformed
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let policy = match lookup("MULTI_LOGIN_POLICY") {
            Some(raw) => raw
                .parse::<MultiLoginPolicy>()
                .map_err(|_| ConfigError::InvalidValue("MULTI_LOGIN_POLICY", raw))?,
            None => MultiLoginPolicy::default(),
        };

        let redis = match lookup("REDIS_URL") {
            Some(url) if !url.trim().is_empty() => Some(RedisConfig {
                url,
                max_connections: parse_or(
                    &lookup,
                    "REDIS_MAX_CONNECTIONS",
                    default_redis_max_connections,
                )?,
                timeout_ms: parse_or(&lookup, "REDIS_TIMEOUT_MS", default_redis_timeout_ms)?,
            }),
            _ => None,
        };

        Ok(Self {
            app: AppSettings {
                name: lookup("APP_NAME").unwrap_or_else(default_app_name),
                env: lookup("APP_ENV")
                    .and_then(|s| Environment::parse(&s))
                    .unwrap_or_default(),
            },
            gateway: GatewaySettings {
                server: ServerConfig {
                    host: lookup("GATEWAY_HOST").unwrap_or_else(default_host),
                    port: parse_or(&lookup, "GATEWAY_PORT", default_port)?,
                },
                advertise_addr: lookup("GATEWAY_ADVERTISE_ADDR").filter(|s| !s.is_empty()),
                shutdown_timeout_secs: parse_or(
                    &lookup,
                    "SHUTDOWN_TIMEOUT_SECS",
                    default_shutdown_timeout_secs,
                )?,
            },
            websocket: WebSocketConfig {
                max_conn_num: parse_or(&lookup, "WS_MAX_CONN_NUM", default_max_conn_num)?,
                handshake_timeout_secs: parse_or(
                    &lookup,
                    "WS_HANDSHAKE_TIMEOUT_SECS",
                    default_handshake_timeout_secs,
                )?,
                max_message_size: parse_or(
                    &lookup,
                    "WS_MAX_MESSAGE_SIZE",
                    default_max_message_size,
                )?,
                write_buffer_size: parse_or(
                    &lookup,
                    "WS_WRITE_BUFFER_SIZE",
                    default_write_buffer_size,
                )?,
                pong_wait_secs: parse_or(&lookup, "WS_PONG_WAIT_SECS", default_pong_wait_secs)?,
                write_wait_secs: parse_or(&lookup, "WS_WRITE_WAIT_SECS", default_write_wait_secs)?,
            },
            multi_login: MultiLoginConfig { policy },
            presence: PresenceConfig {
                merge_interval_ms: parse_or(
                    &lookup,
                    "PRESENCE_MERGE_INTERVAL_MS",
                    default_merge_interval_ms,
                )?,
                full_scan_interval_secs: parse_or(
                    &lookup,
                    "PRESENCE_FULL_SCAN_INTERVAL_SECS",
                    default_full_scan_interval_secs,
                )?,
                lanes: parse_or(&lookup, "PRESENCE_LANES", default_presence_lanes)?.max(1),
                lane_capacity: parse_or(&lookup, "PRESENCE_LANE_CAPACITY", default_lane_capacity)?
                    .max(1),
                batch_size: parse_or(&lookup, "PRESENCE_BATCH_SIZE", default_batch_size)?.max(1),
                channel_capacity: parse_or(
                    &lookup,
                    "PRESENCE_CHANNEL_CAPACITY",
                    default_channel_capacity,
                )?
                .max(1),
                ttl_secs: parse_or(&lookup, "PRESENCE_TTL_SECS", default_presence_ttl_secs)?,
            },
            redis,
            jwt: JwtConfig {
                secret: lookup("JWT_SECRET").ok_or(ConfigError::MissingVar("JWT_SECRET"))?,
                token_expiry: parse_or(&lookup, "JWT_TOKEN_EXPIRY_SECS", default_token_expiry)?,
            },
            services: ServicesConfig {
                msg_service_url: lookup("MSG_SERVICE_URL").unwrap_or_else(default_msg_service_url),
                peers: lookup("GATEWAY_PEERS")
                    .map(|s| {
                        s.split(',')
                            .map(str::trim)
                            .filter(|p| !p.is_empty())
                            .map(String::from)
                            .collect()
                    })
                    .unwrap_or_default(),
                rpc_timeout_ms: parse_or(&lookup, "RPC_TIMEOUT_MS", default_rpc_timeout_ms)?,
            },
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingVar(&'static str),

    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_environment_is_production() {
        assert!(!Environment::Development.is_production());
        assert!(!Environment::Staging.is_production());
        assert!(Environment::Production.is_production());
    }

    #[test]
    fn test_server_address() {
        let config = ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8080,
        };
        assert_eq!(config.address(), "0.0.0.0:8080");
    }

    #[test]
    fn test_defaults_with_only_required_vars() {
        let config = AppConfig::from_lookup(lookup_from(&[("JWT_SECRET", "secret")])).unwrap();

        assert_eq!(config.app.name, "im-gateway");
        assert_eq!(config.gateway.server.port, 10001);
        assert_eq!(config.gateway.shutdown_timeout(), Duration::from_secs(15));
        assert_eq!(config.websocket.max_message_size, 51200);
        assert_eq!(config.websocket.pong_wait(), Duration::from_secs(30));
        assert_eq!(config.multi_login.policy, MultiLoginPolicy::DoNotKick);
        assert_eq!(config.presence.merge_interval(), Duration::from_secs(1));
        assert!(config.redis.is_none());
        assert!(config.services.peers.is_empty());
    }

    #[test]
    fn test_missing_jwt_secret() {
        let err = AppConfig::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingVar("JWT_SECRET")));
    }

    #[test]
    fn test_invalid_value_is_reported() {
        let err = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "secret"),
            ("WS_MAX_CONN_NUM", "lots"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue("WS_MAX_CONN_NUM", _)));
    }

    #[test]
    fn test_policy_and_peers() {
        let config = AppConfig::from_lookup(lookup_from(&[
            ("JWT_SECRET", "secret"),
            ("MULTI_LOGIN_POLICY", "3"),
            ("GATEWAY_PEERS", "http://10.0.0.2:10001, ,http://10.0.0.3:10001"),
            ("REDIS_URL", "redis://localhost:6379"),
            ("APP_ENV", "production"),
        ]))
        .unwrap();

        assert_eq!(
            config.multi_login.policy,
            MultiLoginPolicy::AllLoginButSameTerminalKick
        );
        assert_eq!(
            config.services.peers,
            vec!["http://10.0.0.2:10001", "http://10.0.0.3:10001"]
        );
        assert_eq!(config.redis.unwrap().max_connections, 16);
        assert!(config.app.env.is_production());
    }
}
