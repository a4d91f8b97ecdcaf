//! Redis connection pool behind the series store capability
//!
//! Provides the production [`SeriesStore`](super::SeriesStore)
//! implementation:
//! - Semaphore-bounded concurrency over a multiplexed connection
//! - Per-command timeout
//! - Exponential backoff retry for transient failures
//! - Credential-safe error messages
//!
//! Each command acquires its permit and connection for the duration of one
//! execution and releases both on every exit path.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use redis::aio::MultiplexedConnection;
use redis::{Client, RedisError};
use tokio::sync::{RwLock, Semaphore};
use tracing::{debug, warn};

use crate::error::StoreError;

use super::util::safe_store_error;
use super::{SeriesStore, StoreResponse};

/// Configuration for the store connection pool
#[derive(Clone, Debug)]
pub struct RedisConfig {
    /// Store URL (e.g., "redis://localhost:6379")
    pub url: String,

    /// Maximum number of in-flight commands
    /// Default: 16
    pub pool_size: u32,

    /// Timeout for establishing new connections
    /// Default: 5 seconds
    pub connection_timeout: Duration,

    /// Timeout for individual commands
    /// Default: 1 second
    pub command_timeout: Duration,

    /// Retry policy for failed commands
    pub retry_policy: RetryPolicy,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            url: "redis://127.0.0.1:6379".to_string(),
            pool_size: 16,
            connection_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(1),
            retry_policy: RetryPolicy::default(),
        }
    }
}

impl RedisConfig {
    /// Create a new config with the specified URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            ..Default::default()
        }
    }

    /// Set the pool size
    pub fn pool_size(mut self, size: u32) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the command timeout
    pub fn command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    /// Set the retry policy
    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.url.is_empty() {
            return Err("Store URL cannot be empty".to_string());
        }
        if self.pool_size == 0 {
            return Err("Pool size must be greater than 0".to_string());
        }
        Ok(())
    }
}

/// Retry policy with exponential backoff
#[derive(Clone, Debug)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts
    /// Default: 3
    pub max_retries: u32,

    /// Initial delay between retries
    /// Default: 100ms
    pub initial_delay: Duration,

    /// Maximum delay between retries
    /// Default: 5 seconds
    pub max_delay: Duration,

    /// Multiplier for exponential backoff
    /// Default: 2.0
    pub multiplier: f64,

    /// Add random jitter to delays
    /// Default: true
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Calculate delay for a given attempt number (0-indexed)
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay =
            self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let delay_ms = base_delay.min(self.max_delay.as_millis() as f64);

        let final_delay = if self.jitter {
            // Up to 25% jitter
            let jitter = rand::random::<f64>() * 0.25;
            delay_ms * (1.0 + jitter)
        } else {
            delay_ms
        };

        Duration::from_millis(final_delay as u64)
    }

    /// Check if another attempt is allowed after the given one
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_retries
    }
}

/// Pool counters
#[derive(Debug, Default)]
pub struct PoolMetrics {
    /// Total commands executed successfully
    pub commands_executed: AtomicU64,

    /// Total command failures
    pub command_failures: AtomicU64,

    /// Total retry attempts
    pub retries: AtomicU64,
}

/// Snapshot of pool counters at a point in time
#[derive(Debug, Clone)]
pub struct PoolMetricsSnapshot {
    /// Total commands executed successfully
    pub commands_executed: u64,
    /// Total command failures
    pub command_failures: u64,
    /// Total retry attempts
    pub retries: u64,
}

/// Store connection pool
///
/// Wraps a multiplexed connection behind a semaphore so at most
/// `pool_size` commands are in flight; reconnects lazily on connection
/// loss.
pub struct RedisPool {
    /// Client for creating connections
    client: Client,

    /// The multiplexed connection (the driver multiplexes internally)
    connection: RwLock<Option<MultiplexedConnection>>,

    /// Pool configuration
    config: RedisConfig,

    /// Counters
    metrics: Arc<PoolMetrics>,

    /// Limits concurrent in-flight commands
    semaphore: Arc<Semaphore>,
}

impl RedisPool {
    /// Create a new pool and establish the initial connection
    pub async fn new(config: RedisConfig) -> Result<Self, StoreError> {
        config.validate().map_err(StoreError::Connection)?;

        let client = Client::open(config.url.as_str())
            .map_err(|e| StoreError::Connection(safe_store_error(&config.url, &e)))?;

        let semaphore = Arc::new(Semaphore::new(config.pool_size as usize));
        let pool = Self {
            client,
            connection: RwLock::new(None),
            config,
            metrics: Arc::new(PoolMetrics::default()),
            semaphore,
        };

        pool.connect().await?;
        debug!("store connection pool initialized");
        Ok(pool)
    }

    /// Establish or re-establish the connection
    async fn connect(&self) -> Result<MultiplexedConnection, StoreError> {
        let conn_future = self.client.get_multiplexed_async_connection();
        let conn = tokio::time::timeout(self.config.connection_timeout, conn_future)
            .await
            .map_err(|_| StoreError::Connection("Connection timeout".to_string()))?
            .map_err(|e| StoreError::Connection(safe_store_error(&self.config.url, &e)))?;

        let mut guard = self.connection.write().await;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    /// Get the current connection, reconnecting if it was dropped
    async fn current_connection(&self) -> Result<MultiplexedConnection, StoreError> {
        {
            let guard = self.connection.read().await;
            if let Some(conn) = guard.clone() {
                return Ok(conn);
            }
        }
        self.connect().await
    }

    /// Send one command over the given connection
    async fn run_once(
        conn: &mut MultiplexedConnection,
        command: &str,
    ) -> Result<StoreResponse, RedisError> {
        let mut parts = command.split_whitespace();
        let keyword = parts.next().unwrap_or_default();
        let mut cmd = redis::cmd(keyword);
        for arg in parts {
            cmd.arg(arg);
        }
        cmd.query_async(conn).await
    }

    /// Health check: PING the store
    pub async fn ping(&self) -> bool {
        self.execute("PING").await.is_ok()
    }

    /// Get a snapshot of the pool counters
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        PoolMetricsSnapshot {
            commands_executed: self.metrics.commands_executed.load(Ordering::Relaxed),
            command_failures: self.metrics.command_failures.load(Ordering::Relaxed),
            retries: self.metrics.retries.load(Ordering::Relaxed),
        }
    }

    /// Get the pool configuration
    pub fn config(&self) -> &RedisConfig {
        &self.config
    }
}

#[async_trait::async_trait]
impl SeriesStore for RedisPool {
    async fn execute(&self, command: &str) -> Result<StoreResponse, StoreError> {
        if command.trim().is_empty() {
            return Err(StoreError::Execution("Empty command".to_string()));
        }

        // One permit per in-flight command; released on every return path.
        let _permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| StoreError::Connection("Pool closed".to_string()))?;

        let mut attempt = 0;
        loop {
            let mut conn = self.current_connection().await?;

            let result =
                tokio::time::timeout(self.config.command_timeout, Self::run_once(&mut conn, command))
                    .await;

            match result {
                Ok(Ok(value)) => {
                    self.metrics.commands_executed.fetch_add(1, Ordering::Relaxed);
                    return Ok(value);
                },
                Ok(Err(e)) => {
                    self.metrics.command_failures.fetch_add(1, Ordering::Relaxed);

                    if self.config.retry_policy.should_retry(attempt) && is_retriable_error(&e) {
                        self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                        let delay = self.config.retry_policy.delay_for_attempt(attempt);
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            error = %e,
                            "store command failed, retrying"
                        );
                        tokio::time::sleep(delay).await;

                        if is_connection_error(&e) {
                            let mut guard = self.connection.write().await;
                            *guard = None;
                        }

                        attempt += 1;
                        continue;
                    }

                    return Err(StoreError::Execution(safe_store_error(&self.config.url, &e)));
                },
                Err(_) => {
                    self.metrics.command_failures.fetch_add(1, Ordering::Relaxed);

                    if self.config.retry_policy.should_retry(attempt) {
                        self.metrics.retries.fetch_add(1, Ordering::Relaxed);
                        let delay = self.config.retry_policy.delay_for_attempt(attempt);
                        warn!(
                            attempt = attempt + 1,
                            delay_ms = delay.as_millis() as u64,
                            "store command timed out, retrying"
                        );
                        tokio::time::sleep(delay).await;
                        attempt += 1;
                        continue;
                    }

                    return Err(StoreError::Timeout);
                },
            }
        }
    }
}

/// Check if an error is worth retrying
fn is_retriable_error(e: &RedisError) -> bool {
    e.is_connection_dropped()
        || e.is_timeout()
        || e.is_io_error()
        || matches!(e.kind(), redis::ErrorKind::BusyLoadingError)
}

/// Check if an error requires reconnection
fn is_connection_error(e: &RedisError) -> bool {
    e.is_connection_dropped() || e.is_io_error()
}
