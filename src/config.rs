use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Clone)]
pub struct Config {
    // Server
    pub bind_addr: SocketAddr,

    // Name embedded in the signed challenge message
    pub service_name: String,

    // Nonce lifetimes (in seconds)
    pub nonce_ttl_secs: u64,
    pub nonce_retention_secs: u64,
    pub prune_interval_secs: u64,

    // Rate limiting
    pub rate_limit_nonce_per_min: u32,

    // Redis (optional; in-memory registry when unset)
    pub redis_url: Option<String>,
    pub redis_timeout_ms: u64,

    // Connection status sink
    pub status_socket_path: Option<PathBuf>,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("bind_addr", &self.bind_addr)
            .field("service_name", &self.service_name)
            .field("nonce_ttl_secs", &self.nonce_ttl_secs)
            .field("nonce_retention_secs", &self.nonce_retention_secs)
            .field("prune_interval_secs", &self.prune_interval_secs)
            .field("rate_limit_nonce_per_min", &self.rate_limit_nonce_per_min)
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("redis_timeout_ms", &self.redis_timeout_ms)
            .field("status_socket_path", &self.status_socket_path)
            .finish()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),

    #[error("Failed to parse {0}: {1}")]
    ParseError(String, String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Attempt to load .env file, but don't fail if it doesn't exist
        // (env vars may be set directly in production)
        let _ = dotenvy::dotenv();

        // Server
        let bind_addr_str = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".to_string());
        let bind_addr = bind_addr_str
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::ParseError("BIND_ADDR".to_string(), e.to_string()))?;

        // SERVICE_NAME ends up verbatim in the message users sign
        let service_name = env::var("SERVICE_NAME").unwrap_or_else(|_| "wallet-login".to_string());
        validate_service_name(&service_name)?;

        // Nonce lifetimes
        let nonce_ttl_secs = parse_env_or_default("NONCE_TTL_SECS", 300)?;
        if nonce_ttl_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "NONCE_TTL_SECS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }
        let nonce_retention_secs = parse_env_or_default("NONCE_RETENTION_SECS", 600)?;
        let prune_interval_secs = parse_env_or_default("PRUNE_INTERVAL_SECS", 60)?;
        if prune_interval_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "PRUNE_INTERVAL_SECS".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        // Rate limiting
        let rate_limit_nonce_per_min = parse_env_or_default("RATE_LIMIT_NONCE_PER_MIN", 20)?;
        if rate_limit_nonce_per_min == 0 {
            return Err(ConfigError::InvalidValue(
                "RATE_LIMIT_NONCE_PER_MIN".to_string(),
                "must be greater than 0".to_string(),
            ));
        }

        // Redis
        let redis_url = optional_env("REDIS_URL");
        let redis_timeout_ms = parse_env_or_default("REDIS_TIMEOUT_MS", 50)?;

        // Status socket
        let status_socket_path = optional_env("STATUS_SOCKET_PATH").map(PathBuf::from);

        Ok(Config {
            bind_addr,
            service_name,
            nonce_ttl_secs,
            nonce_retention_secs,
            prune_interval_secs,
            rate_limit_nonce_per_min,
            redis_url,
            redis_timeout_ms,
            status_socket_path,
        })
    }

    pub fn nonce_ttl(&self) -> Duration {
        Duration::from_secs(self.nonce_ttl_secs)
    }

    pub fn nonce_retention(&self) -> Duration {
        Duration::from_secs(self.nonce_retention_secs)
    }

    pub fn prune_interval(&self) -> Duration {
        Duration::from_secs(self.prune_interval_secs)
    }

    pub fn redis_timeout(&self) -> Duration {
        Duration::from_millis(self.redis_timeout_ms)
    }
}

fn validate_service_name(name: &str) -> Result<(), ConfigError> {
    let len = name.chars().count();
    if len == 0 || len > 64 {
        return Err(ConfigError::InvalidValue(
            "SERVICE_NAME".to_string(),
            "must be 1-64 characters".to_string(),
        ));
    }
    if name.chars().any(char::is_control) {
        return Err(ConfigError::InvalidValue(
            "SERVICE_NAME".to_string(),
            "may not contain control characters".to_string(),
        ));
    }
    Ok(())
}

/// Read an optional variable, treating an empty value as unset.
fn optional_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Helper function to parse environment variable with a default value
fn parse_env_or_default<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|e| ConfigError::ParseError(key.to_string(), format!("{}: {}", e, val))),
        Err(_) => Ok(default),
    }
}
