//! Configuration management
//!
//! TOML configuration with serde defaults, environment variable overrides,
//! and validation. Each section converts into the runtime configuration of
//! the subsystem it describes.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::services::cleaner::{CleanerConfig, CLEANUP_INTERVAL, STALE_AFTER_MS};
use crate::store::{RedisConfig, RetryPolicy};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Series store connection
    #[serde(default)]
    pub store: StoreSection,

    /// Write ledger database
    #[serde(default)]
    pub ledger: LedgerSection,

    /// Cleanup service
    #[serde(default)]
    pub cleaner: CleanerSection,
}

/// Series store connection settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StoreSection {
    /// Store URL
    #[serde(default = "default_store_url")]
    pub url: String,

    /// Maximum in-flight commands
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Connection timeout in milliseconds
    #[serde(default = "default_connection_timeout_ms")]
    pub connection_timeout_ms: u64,

    /// Per-command timeout in milliseconds
    #[serde(default = "default_command_timeout_ms")]
    pub command_timeout_ms: u64,

    /// Maximum retries for transient command failures
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

/// Write ledger settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LedgerSection {
    /// SQLite database path
    #[serde(default = "default_ledger_path")]
    pub path: PathBuf,

    /// Ledger table name
    #[serde(default = "default_ledger_table")]
    pub table: String,
}

/// Cleanup service settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CleanerSection {
    /// Seconds between cleanup cycles
    #[serde(default = "default_cleaner_interval_s")]
    pub interval_s: u64,

    /// Staleness threshold in milliseconds
    #[serde(default = "default_stale_after_ms")]
    pub stale_after_ms: i64,

    /// Enable the cleanup service
    #[serde(default = "default_true")]
    pub enabled: bool,
}

// Default value functions
fn default_store_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}
fn default_pool_size() -> u32 {
    16
}
fn default_connection_timeout_ms() -> u64 {
    5_000
}
fn default_command_timeout_ms() -> u64 {
    1_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_ledger_path() -> PathBuf {
    PathBuf::from("rts_ledger.db")
}
fn default_ledger_table() -> String {
    crate::ledger::DEFAULT_TABLE.to_string()
}
fn default_cleaner_interval_s() -> u64 {
    CLEANUP_INTERVAL.as_secs()
}
fn default_stale_after_ms() -> i64 {
    STALE_AFTER_MS
}
fn default_true() -> bool {
    true
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            url: default_store_url(),
            pool_size: default_pool_size(),
            connection_timeout_ms: default_connection_timeout_ms(),
            command_timeout_ms: default_command_timeout_ms(),
            max_retries: default_max_retries(),
        }
    }
}

impl Default for LedgerSection {
    fn default() -> Self {
        Self {
            path: default_ledger_path(),
            table: default_ledger_table(),
        }
    }
}

impl Default for CleanerSection {
    fn default() -> Self {
        Self {
            interval_s: default_cleaner_interval_s(),
            stale_after_ms: default_stale_after_ms(),
            enabled: true,
        }
    }
}

impl StoreSection {
    /// Runtime configuration for the connection pool
    pub fn to_redis_config(&self) -> RedisConfig {
        RedisConfig {
            url: self.url.clone(),
            pool_size: self.pool_size,
            connection_timeout: Duration::from_millis(self.connection_timeout_ms),
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            retry_policy: RetryPolicy {
                max_retries: self.max_retries,
                ..Default::default()
            },
        }
    }
}

impl CleanerSection {
    /// Runtime configuration for the cleanup service
    pub fn to_cleaner_config(&self) -> CleanerConfig {
        CleanerConfig {
            interval: Duration::from_secs(self.interval_s),
            stale_after_ms: self.stale_after_ms,
            enabled: self.enabled,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &str) -> Result<Self, String> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read config file {}: {}", path, e))?;

        toml::from_str(&contents)
            .map_err(|e| format!("Failed to parse config file {}: {}", path, e))
    }

    /// Load configuration with environment variable overrides
    pub fn from_file_with_env(path: &str) -> Result<Self, String> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from environment variables only
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_overrides();
        config
    }

    /// Apply environment variable overrides
    pub fn apply_env_overrides(&mut self) {
        if let Ok(url) = std::env::var("RTS_STORE_URL") {
            self.store.url = url;
        }
        if let Ok(pool) = std::env::var("RTS_POOL_SIZE") {
            if let Ok(p) = pool.parse() {
                self.store.pool_size = p;
            }
        }
        if let Ok(path) = std::env::var("RTS_LEDGER_PATH") {
            self.ledger.path = PathBuf::from(path);
        }
        if let Ok(table) = std::env::var("RTS_LEDGER_TABLE") {
            self.ledger.table = table;
        }
        if let Ok(enabled) = std::env::var("RTS_CLEANER_ENABLED") {
            if let Ok(e) = enabled.parse() {
                self.cleaner.enabled = e;
            }
        }
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.store.url.is_empty() {
            return Err("Store URL cannot be empty".to_string());
        }
        if self.store.pool_size == 0 {
            return Err("Pool size must be > 0".to_string());
        }
        if self.ledger.path.as_os_str().is_empty() {
            return Err("Ledger path cannot be empty".to_string());
        }
        if self.ledger.table.is_empty() {
            return Err("Ledger table cannot be empty".to_string());
        }
        if self.cleaner.interval_s == 0 {
            return Err("Cleaner interval must be > 0".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.store.pool_size, 16);
        assert_eq!(config.cleaner.interval_s, 60);
        assert_eq!(config.cleaner.stale_after_ms, 60_000);
        assert_eq!(config.ledger.table, "redis_timeseries_logger");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [store]
            url = "redis://cache:6379"

            [cleaner]
            interval_s = 30
            "#,
        )
        .unwrap();

        assert_eq!(config.store.url, "redis://cache:6379");
        assert_eq!(config.store.pool_size, 16);
        assert_eq!(config.cleaner.interval_s, 30);
        assert!(config.cleaner.enabled);
    }

    #[test]
    fn test_invalid_interval() {
        let mut config = Config::default();
        config.cleaner.interval_s = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_section_conversions() {
        let config = Config::default();

        let redis = config.store.to_redis_config();
        assert_eq!(redis.pool_size, 16);
        assert_eq!(redis.command_timeout, Duration::from_millis(1_000));

        let cleaner = config.cleaner.to_cleaner_config();
        assert_eq!(cleaner.interval, Duration::from_secs(60));
        assert_eq!(cleaner.stale_after_ms, 60_000);
    }

    #[test]
    fn test_env_override() {
        std::env::set_var("RTS_LEDGER_TABLE", "audit_log");
        let config = Config::from_env();
        assert_eq!(config.ledger.table, "audit_log");
        std::env::remove_var("RTS_LEDGER_TABLE");
    }
}
