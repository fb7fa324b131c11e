//! Tiered Limiter - Multi-tier fixed-window rate limiting over a shared store
//!
//! A limiter counts requests per identifier against an ordered list of
//! `(quota, window)` tiers. The first tier that still has room takes each
//! hit, so callers can express escalating policies such as "3 per 2s, then
//! 2 per 2s, then 1 per second". All counting happens inside one atomic
//! store evaluation (a Lua script on Redis, or a guarded map entry in
//! memory), which keeps many limiter instances consistent with each other.

pub mod clock;
pub mod config;
pub mod error;
pub mod ratelimit;
pub mod store;

pub use crate::config::LimiterConfig;
pub use crate::error::{LimiterError, Result};
pub use crate::ratelimit::{Limit, Limiter, Tier};
pub use crate::store::{MemoryStore, RedisExecutor, ScriptExecutor, StoreError};
