//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use booking::BookingPolicy;
use distributed_lock::LockSettings;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(LogFormat::Text),
            "json" => Ok(LogFormat::Json),
            other => Err(format!("unknown log format: {other}")),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`: bind address (default: `"0.0.0.0"`)
/// - `PORT`: listen port (default: `3000`)
/// - `RUST_LOG`: tracing filter directive (default: `"info"`)
/// - `LOG_FORMAT`: `text` or `json` (default: `text`)
/// - `DATABASE_URL`: PostgreSQL URL; in-memory store when unset
/// - `REDIS_URL`: Redis URL; in-memory lock and ranking when unset
/// - `HOLD_DURATION_SECS`: how long a claim holds a seat (default: `600`)
/// - `LOCK_TTL_SECS`: lock key expiry (default: `30`)
/// - `LOCK_RETRY_INTERVAL_MS`: pause between lock attempts (default: `100`)
/// - `LOCK_MAX_WAIT_MS`: lock wait budget (default: `5000`)
/// - `SWEEP_INTERVAL_SECS`: expiry sweep period (default: `60`)
/// - `NOTIFICATION_BUFFER`: undelivered payment events kept (default: `1024`)
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub redis_url: Option<String>,
    pub hold_duration_secs: u64,
    pub lock_ttl_secs: u64,
    pub lock_retry_interval_ms: u64,
    pub lock_max_wait_ms: u64,
    pub sweep_interval_secs: u64,
    pub notification_buffer: usize,
}

/// Reads `name` and parses it, falling back to `default` when unset or invalid.
fn env_or<T: FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

fn env_opt(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: env_or("PORT", defaults.port),
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: env_or("LOG_FORMAT", defaults.log_format),
            database_url: env_opt("DATABASE_URL"),
            redis_url: env_opt("REDIS_URL"),
            hold_duration_secs: env_or("HOLD_DURATION_SECS", defaults.hold_duration_secs),
            lock_ttl_secs: env_or("LOCK_TTL_SECS", defaults.lock_ttl_secs),
            lock_retry_interval_ms: env_or(
                "LOCK_RETRY_INTERVAL_MS",
                defaults.lock_retry_interval_ms,
            ),
            lock_max_wait_ms: env_or("LOCK_MAX_WAIT_MS", defaults.lock_max_wait_ms),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", defaults.sweep_interval_secs),
            notification_buffer: env_or("NOTIFICATION_BUFFER", defaults.notification_buffer),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn booking_policy(&self) -> BookingPolicy {
        let secs = self.hold_duration_secs.min(i32::MAX as u64) as i64;
        BookingPolicy::with_hold_duration(chrono::Duration::seconds(secs))
    }

    pub fn lock_settings(&self) -> LockSettings {
        LockSettings {
            ttl: Duration::from_secs(self.lock_ttl_secs),
            retry_interval: Duration::from_millis(self.lock_retry_interval_ms),
            max_wait: Duration::from_millis(self.lock_max_wait_ms),
        }
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            redis_url: None,
            hold_duration_secs: 600,
            lock_ttl_secs: 30,
            lock_retry_interval_ms: 100,
            lock_max_wait_ms: 5000,
            sweep_interval_secs: 60,
            notification_buffer: 1024,
        }
    }
}
