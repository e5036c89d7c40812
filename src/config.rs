use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{AdapterError, AdapterResult};

/// Settings of one cluster adapter instance
#[derive(Debug, Clone)]
pub struct AdapterConfig {
    /// Idle time after which an explicit heartbeat is published
    pub heartbeat_interval: Duration,

    /// Silence after which a peer is no longer counted as live
    pub heartbeat_timeout: Duration,

    /// Fan-in timeout used when the caller does not provide one
    pub request_timeout: Duration,

    /// Tag broadcast packets with the transport offset
    pub connection_state_recovery: bool,
}

impl Default for AdapterConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: Duration::from_millis(5_000), // 5 seconds
            heartbeat_timeout: Duration::from_millis(10_000), // 10 seconds
            request_timeout: Duration::from_millis(5_000),    // 5 seconds
            connection_state_recovery: false,
        }
    }
}

/// Redis pub/sub transport settings
#[derive(Debug, Clone)]
pub struct RedisConfig {
    pub url: String,
    pub channel_prefix: String,
    pub reconnect_attempts: usize,
    pub reconnect_delay: Duration,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            channel_prefix: "socket.io".to_string(),
            reconnect_attempts: 10,
            reconnect_delay: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub namespace: String,
    pub adapter: AdapterConfig,
    pub redis: RedisConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            namespace: "/".to_string(),
            adapter: AdapterConfig::default(),
            redis: RedisConfig::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> AdapterResult<Self> {
        dotenvy::dotenv().ok();

        let mut config = Config::default();

        if let Ok(namespace) = env::var("CLUSTER_NAMESPACE") {
            config.namespace = namespace;
        }

        if let Some(ms) = parse_var::<u64>("CLUSTER_HEARTBEAT_INTERVAL_MS")? {
            config.adapter.heartbeat_interval = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>("CLUSTER_HEARTBEAT_TIMEOUT_MS")? {
            config.adapter.heartbeat_timeout = Duration::from_millis(ms);
        }

        if let Some(ms) = parse_var::<u64>("CLUSTER_REQUEST_TIMEOUT_MS")? {
            config.adapter.request_timeout = Duration::from_millis(ms);
        }

        if let Some(enabled) = parse_var::<bool>("CLUSTER_CONNECTION_STATE_RECOVERY")? {
            config.adapter.connection_state_recovery = enabled;
        }

        if let Ok(url) = env::var("REDIS_URL") {
            config.redis.url = url;
        }

        if let Ok(prefix) = env::var("CLUSTER_CHANNEL_PREFIX") {
            config.redis.channel_prefix = prefix;
        }

        if let Some(attempts) = parse_var::<usize>("REDIS_RECONNECT_ATTEMPTS")? {
            config.redis.reconnect_attempts = attempts.max(1);
        }

        if let Some(ms) = parse_var::<u64>("REDIS_RECONNECT_DELAY_MS")? {
            config.redis.reconnect_delay = Duration::from_millis(ms);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AdapterResult<()> {
        if self.adapter.heartbeat_timeout <= self.adapter.heartbeat_interval {
            return Err(AdapterError::Configuration(format!(
                "heartbeat timeout ({:?}) must exceed heartbeat interval ({:?})",
                self.adapter.heartbeat_timeout, self.adapter.heartbeat_interval
            )));
        }

        if !self.namespace.starts_with('/') {
            return Err(AdapterError::Configuration(format!(
                "Invalid namespace: {}",
                self.namespace
            )));
        }

        Ok(())
    }
}

fn parse_var<T>(name: &str) -> AdapterResult<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| AdapterError::Configuration(format!("Invalid {}: {}", name, e))),
        Err(_) => Ok(None),
    }
}
