//! Store executors for the policy evaluator.
//!
//! The limiter never talks to a store directly. It hands a key list and an
//! argument vector to a [`ScriptExecutor`], which must run the evaluator as a
//! single indivisible operation and return its four-integer reply.

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

pub mod memory;
pub mod redis;

pub use self::memory::MemoryStore;
pub use self::redis::RedisExecutor;

/// Errors surfaced by a store executor.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Failure talking to Redis (network, protocol or script fault).
    #[error("redis error: {0}")]
    Redis(#[from] ::redis::RedisError),

    /// The store did not answer within the configured timeout.
    #[error("store operation timed out after {0:?}")]
    Timeout(Duration),

    /// The evaluator replied with something other than four integers.
    #[error("unexpected evaluator reply: expected 4 integers, got {0}")]
    UnexpectedReply(usize),

    /// The evaluator was handed an argument vector it cannot interpret.
    #[error("invalid evaluator arguments: {0}")]
    InvalidArguments(String),
}

/// Capability to run the policy evaluator atomically against shared state.
///
/// Implementations must guarantee that no other operation on the same keys
/// can interleave with a single `eval` call.
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Run the evaluator with `keys` and `[timestamp, quota, window, ...]`.
    async fn eval(&self, keys: &[String], args: &[i64]) -> Result<Vec<i64>, StoreError>;

    /// Check whether `key` currently exists.
    async fn exists(&self, key: &str) -> Result<bool, StoreError>;

    /// Delete `key`, returning the number of keys removed.
    async fn del(&self, key: &str) -> Result<u64, StoreError>;

    /// Store a plain integer under `key` that expires after `ttl`.
    async fn set_with_expiry(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError>;
}
