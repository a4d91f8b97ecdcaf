//! Series store client
//!
//! The command builder never talks to the store itself; execution goes
//! through the [`SeriesStore`] capability, injected as a collaborator. The
//! production implementation is a Redis connection pool; tests inject
//! recording fakes.

pub mod connection;
pub mod util;

pub use connection::{RedisConfig, RedisPool, RetryPolicy};

use crate::error::StoreError;

/// Raw response from the series store
pub type StoreResponse = redis::Value;

/// Capability interface over the series store
///
/// `command` is the full textual command in the store's grammar
/// (`TS.CREATE key RETENTION 86400000 ...`). Implementations own the
/// connection lifecycle: a connection is acquired for the duration of one
/// command and released on every exit path.
#[async_trait::async_trait]
pub trait SeriesStore: Send + Sync {
    /// Execute one command and return the store's response
    async fn execute(&self, command: &str) -> Result<StoreResponse, StoreError>;
}
