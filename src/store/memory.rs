//! In-memory store executor.
//!
//! Keeps counter records in a [`DashMap`]. An evaluation holds the entry
//! guard of its key for its whole duration, so evaluations against one key
//! never interleave. Expiry is judged lazily against the injected clock, and
//! expired records are swept out every sweep interval as evaluations arrive.
//! Counters are local to the process; use Redis to share them.
//!
//! `eval` judges windows by the timestamp it is handed, while `exists`, `del`
//! and the sweep use the store's own clock. Give the store and the limiter
//! the same clock.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, trace};

use super::{ScriptExecutor, StoreError};
use crate::clock::{Clock, SystemClock};
use crate::ratelimit::tier::MAX_WINDOW;
use crate::ratelimit::CounterRecord;

/// Default interval between sweeps of expired records.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// A stored value.
#[derive(Debug, Clone)]
enum Entry {
    /// Counter record written by the evaluator.
    Counters(CounterRecord),
    /// Plain value written by `set_with_expiry`.
    Value { value: i64, expires_at: i64 },
}

impl Entry {
    fn expires_at(&self) -> Option<i64> {
        match self {
            Entry::Counters(record) => record.expires_at(),
            Entry::Value { expires_at, .. } => Some(*expires_at),
        }
    }

    fn is_expired(&self, now: i64) -> bool {
        self.expires_at().map_or(true, |at| at <= now)
    }
}

/// Process-local executor for tests and single-instance deployments.
pub struct MemoryStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn Clock>,
    sweep_interval: i64,
    next_sweep: AtomicI64,
}

impl MemoryStore {
    /// Create an empty store using the system clock.
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Create an empty store judging expiry against `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        let sweep_interval = duration_millis(DEFAULT_SWEEP_INTERVAL);
        let next_sweep = AtomicI64::new(clock.now_millis().saturating_add(sweep_interval));
        Self {
            entries: DashMap::new(),
            clock,
            sweep_interval,
            next_sweep,
        }
    }

    /// Sweep expired records at most once per `interval`.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval = duration_millis(interval);
        self.next_sweep = AtomicI64::new(self.clock.now_millis().saturating_add(self.sweep_interval));
        self
    }

    /// Number of keys currently held, including expired ones not yet purged.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every expired key, returning how many were removed.
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_millis();
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    /// Read the plain value stored under `key`, if live.
    pub fn value(&self, key: &str) -> Option<i64> {
        let now = self.clock.now_millis();
        self.entries.get(key).and_then(|entry| match *entry {
            Entry::Value { value, expires_at } if expires_at > now => Some(value),
            _ => None,
        })
    }

    /// Purge if the sweep is due. Must not be called while holding an entry guard.
    fn sweep_if_due(&self) {
        let now = self.clock.now_millis();
        let due = self.next_sweep.load(Ordering::Acquire);
        if now < due {
            return;
        }

        let next = now.saturating_add(self.sweep_interval);
        if self
            .next_sweep
            .compare_exchange(due, next, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
        {
            let removed = self.purge_expired();
            if removed > 0 {
                debug!(removed = removed, remaining = self.entries.len(), "Swept expired records");
            }
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn duration_millis(duration: Duration) -> i64 {
    i64::try_from(duration.as_millis()).unwrap_or(i64::MAX)
}

/// Split `[timestamp, quota, window, ...]` into its parts.
fn parse_args(args: &[i64]) -> Result<(i64, Vec<(i64, i64)>), StoreError> {
    let (&now, pairs) = args
        .split_first()
        .ok_or_else(|| StoreError::InvalidArguments("missing timestamp".to_string()))?;

    if pairs.is_empty() || pairs.len() % 2 != 0 {
        return Err(StoreError::InvalidArguments(format!(
            "expected quota/window pairs, got {} values",
            pairs.len()
        )));
    }

    let tiers: Vec<(i64, i64)> = pairs.chunks_exact(2).map(|p| (p[0], p[1])).collect();
    if let Some((n, (quota, window))) = tiers
        .iter()
        .enumerate()
        .find(|(_, (quota, window))| *quota < 1 || !(1..=MAX_WINDOW).contains(window))
    {
        return Err(StoreError::InvalidArguments(format!(
            "tier {n}: quota {quota} / window {window} out of range"
        )));
    }

    Ok((now, tiers))
}

#[async_trait]
impl ScriptExecutor for MemoryStore {
    async fn eval(&self, keys: &[String], args: &[i64]) -> Result<Vec<i64>, StoreError> {
        let key = keys
            .first()
            .ok_or_else(|| StoreError::InvalidArguments("missing primary key".to_string()))?;
        let (now, tiers) = parse_args(args)?;

        let reply = {
            // The entry guard locks the key's shard until the record is written back.
            let mut entry = self
                .entries
                .entry(key.clone())
                .or_insert_with(|| Entry::Counters(CounterRecord::new()));

            let mut record = match &*entry {
                Entry::Counters(record) if !entry.is_expired(now) => record.clone(),
                _ => {
                    trace!(key = %key, "Starting a new counter record");
                    CounterRecord::new()
                }
            };

            let reply = record
                .evaluate(now, &tiers)
                .ok_or_else(|| StoreError::InvalidArguments("empty policy".to_string()))?;
            *entry = Entry::Counters(record);
            reply
        };

        self.sweep_if_due();
        Ok(reply.to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool, StoreError> {
        let now = self.clock.now_millis();
        Ok(self
            .entries
            .get(key)
            .map_or(false, |entry| !entry.is_expired(now)))
    }

    async fn del(&self, key: &str) -> Result<u64, StoreError> {
        let now = self.clock.now_millis();
        let removed = self.entries.remove(key);
        Ok(removed.map_or(0, |(_, entry)| u64::from(!entry.is_expired(now))))
    }

    async fn set_with_expiry(&self, key: &str, value: i64, ttl: Duration) -> Result<(), StoreError> {
        let expires_at = self.clock.now_millis().saturating_add(duration_millis(ttl));
        self.entries
            .insert(key.to_string(), Entry::Value { value, expires_at });
        Ok(())
    }
}
