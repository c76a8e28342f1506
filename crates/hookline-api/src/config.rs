//! Configuration management for the Hookline service.

use std::{net::SocketAddr, str::FromStr, time::Duration};

use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use hookline_delivery::{client::ClientConfig, retry::RetryPolicy, worker::DeliveryConfig};
use serde::{Deserialize, Serialize};

const CONFIG_FILE: &str = "hookline.toml";
const ENV_PREFIX: &str = "HOOKLINE_";

/// Complete service configuration with defaults, file, and environment
/// overrides.
///
/// Configuration is loaded in priority order:
/// 1. Environment variables (highest priority), `HOOKLINE_` prefixed, plus
///    the conventional `DATABASE_URL` and `RUST_LOG`
/// 2. Configuration file (`hookline.toml`)
/// 3. Built-in defaults (lowest priority)
///
/// Durations are whole seconds unless the field name says otherwise. A zero
/// `stale_claim_seconds`, `retry_max_delay_seconds` or
/// `shutdown_timeout_seconds` disables the corresponding feature.
///
/// # Example
///
/// ```no_run
/// use hookline_api::Config;
///
/// let config = Config::load().expect("Failed to load configuration");
///
/// println!("Server will bind to {}:{}", config.host, config.port);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    // Database
    /// PostgreSQL connection URL.
    pub database_url: String,
    /// Maximum number of database connections in the pool. Must cover the
    /// workers, the reaper and the ingress.
    pub database_max_connections: u32,
    /// Minimum number of connections to maintain in the pool.
    pub database_min_connections: u32,
    /// Database connection acquire timeout.
    pub database_connection_timeout: u64,
    /// Initial connection attempts before startup fails.
    pub database_connect_attempts: u32,

    // Server
    /// Server bind address.
    pub host: String,
    /// Server bind port.
    pub port: u16,
    /// HTTP request timeout.
    pub request_timeout: u64,
    /// How long the server may drain in-flight requests on shutdown.
    pub server_grace_period: u64,

    // Delivery
    /// Number of concurrent delivery workers.
    pub worker_count: usize,
    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// HTTP request timeout for webhook delivery.
    pub delivery_timeout_seconds: u64,
    /// `User-Agent` sent with every delivery.
    pub user_agent: String,
    /// Retry budget for tasks submitted without one.
    pub default_max_retries: i32,
    /// Upper bound on a single retry delay.
    pub retry_max_delay_seconds: u64,
    /// Jitter factor for retry timing (0.0 to 1.0).
    pub retry_jitter_factor: f64,
    /// Claims untouched for this long are returned to the queue.
    pub stale_claim_seconds: u64,
    /// How often the reaper scans for stale claims.
    pub reaper_interval_seconds: u64,
    /// Upper bound on waiting for workers at shutdown.
    pub shutdown_timeout_seconds: u64,

    // Logging
    /// Log filter directive.
    pub rust_log: String,
}

impl Config {
    /// Load configuration from defaults, config file, and environment variable
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or a value is invalid.
    pub fn load() -> Result<Self> {
        Self::from_figment(Self::figment())
    }

    /// The layered provider stack `load` reads from.
    pub fn figment() -> Figment {
        Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(CONFIG_FILE))
            .merge(Env::raw().only(&["DATABASE_URL", "RUST_LOG"]))
            .merge(Env::prefixed(ENV_PREFIX))
    }

    /// Extracts and validates configuration from any figment.
    ///
    /// # Errors
    ///
    /// Returns an error if extraction fails or a value is invalid.
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Self = figment.extract().context("failed to load configuration")?;
        config.validate()?;
        Ok(config)
    }

    /// Convert to the delivery engine configuration.
    pub fn to_delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            worker_count: self.worker_count,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            client_config: self.to_client_config(),
            retry_policy: self.to_retry_policy(),
            stale_after: non_zero_secs(self.stale_claim_seconds),
            reaper_interval: Duration::from_secs(self.reaper_interval_seconds),
            shutdown_timeout: non_zero_secs(self.shutdown_timeout_seconds),
        }
    }

    /// Convert to client configuration.
    pub fn to_client_config(&self) -> ClientConfig {
        ClientConfig {
            timeout: Duration::from_secs(self.delivery_timeout_seconds),
            user_agent: self.user_agent.clone(),
            ..ClientConfig::default()
        }
    }

    /// Convert to retry policy.
    pub fn to_retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_delay: non_zero_secs(self.retry_max_delay_seconds),
            jitter_factor: self.retry_jitter_factor,
        }
    }

    /// Parse server socket address from host and port configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn parse_server_addr(&self) -> Result<SocketAddr> {
        let addr_str = format!("{}:{}", self.host, self.port);
        SocketAddr::from_str(&addr_str).context("invalid server address")
    }

    /// HTTP request timeout as a duration.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    /// Server drain period as a duration.
    pub fn server_grace_period(&self) -> Duration {
        Duration::from_secs(self.server_grace_period)
    }

    /// Get database URL with password masked for logging.
    pub fn database_url_masked(&self) -> String {
        let userinfo_start = self.database_url.find("://").map_or(0, |pos| pos + 3);
        if let Some(at_pos) = self.database_url.rfind('@') {
            if at_pos > userinfo_start {
                if let Some(colon_pos) = self.database_url[userinfo_start..at_pos].find(':') {
                    let mut masked = self.database_url.clone();
                    masked.replace_range(userinfo_start + colon_pos + 1..at_pos, "***");
                    return masked;
                }
            }
        }
        self.database_url.clone()
    }

    /// Validate configuration values.
    fn validate(&self) -> Result<()> {
        if self.database_url.trim().is_empty() {
            anyhow::bail!("database_url must not be empty");
        }

        if self.database_max_connections == 0 {
            anyhow::bail!("database_max_connections must be greater than 0");
        }

        if self.database_min_connections > self.database_max_connections {
            anyhow::bail!("database_min_connections cannot exceed database_max_connections");
        }

        if self.database_connect_attempts == 0 {
            anyhow::bail!("database_connect_attempts must be greater than 0");
        }

        if self.port == 0 {
            anyhow::bail!("port must be greater than 0");
        }

        if self.worker_count == 0 {
            anyhow::bail!("worker_count must be greater than 0");
        }

        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }

        if self.delivery_timeout_seconds == 0 {
            anyhow::bail!("delivery_timeout_seconds must be greater than 0");
        }

        if self.user_agent.trim().is_empty() {
            anyhow::bail!("user_agent must not be empty");
        }

        if self.default_max_retries < 0 {
            anyhow::bail!("default_max_retries must not be negative");
        }

        if !(0.0..=1.0).contains(&self.retry_jitter_factor) {
            anyhow::bail!("retry_jitter_factor must be between 0.0 and 1.0");
        }

        if self.stale_claim_seconds > 0 && self.reaper_interval_seconds == 0 {
            anyhow::bail!("reaper_interval_seconds must be greater than 0 when reaping is enabled");
        }

        if self.stale_claim_seconds > 0 && self.stale_claim_seconds <= self.delivery_timeout_seconds
        {
            anyhow::bail!("stale_claim_seconds must exceed delivery_timeout_seconds");
        }

        let pool_floor = u32::try_from(self.worker_count).unwrap_or(u32::MAX).saturating_add(2);
        if self.database_max_connections < pool_floor {
            anyhow::bail!(
                "database_max_connections ({}) must cover {} workers plus the reaper and ingress",
                self.database_max_connections,
                self.worker_count
            );
        }

        Ok(())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "postgresql://localhost/hookline".to_string(),
            database_max_connections: 10,
            database_min_connections: 2,
            database_connection_timeout: 10,
            database_connect_attempts: 5,
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout: 30,
            server_grace_period: 5,
            worker_count: hookline_delivery::DEFAULT_WORKER_COUNT,
            poll_interval_ms: 1000,
            delivery_timeout_seconds: hookline_delivery::DEFAULT_TIMEOUT_SECONDS,
            user_agent: hookline_delivery::client::DEFAULT_USER_AGENT.to_string(),
            default_max_retries: hookline_core::models::DEFAULT_MAX_RETRIES,
            retry_max_delay_seconds: 0,
            retry_jitter_factor: 0.0,
            stale_claim_seconds: 300,
            reaper_interval_seconds: 30,
            shutdown_timeout_seconds: 0,
            rust_log: "info,hookline=debug,tower_http=debug".to_string(),
        }
    }
}

fn non_zero_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
