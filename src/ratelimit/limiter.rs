//! Core rate limiter façade.

use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, trace};

use super::key::LimitKey;
use super::limit::Limit;
use super::tier::{flatten_tiers, validate_tiers, Tier};
use crate::clock::{Clock, SystemClock};
use crate::config::LimiterConfig;
use crate::error::{LimiterError, Result};
use crate::store::ScriptExecutor;

/// Multi-tier fixed-window rate limiter.
///
/// The limiter holds no counter state itself. Every call is a single atomic
/// evaluation in the store, so one instance can be shared freely across
/// tasks, and many instances (in many processes) can share one store.
pub struct Limiter {
    /// Namespace prefix and default tier
    config: LimiterConfig,
    /// Source of evaluation timestamps
    clock: Arc<dyn Clock>,
    /// The store executor, bound once
    executor: RwLock<Option<Arc<dyn ScriptExecutor>>>,
}

impl Limiter {
    /// Create a limiter. Out-of-range defaults are replaced, see
    /// [`LimiterConfig::normalized`].
    pub fn new(config: LimiterConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a limiter stamping evaluations with `clock`.
    ///
    /// A [`MemoryStore`](crate::store::MemoryStore) must be built on the same
    /// clock, or `remove` and the expiry sweep disagree with `get` about
    /// which windows are still open.
    pub fn with_clock(config: LimiterConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: config.normalized(),
            clock,
            executor: RwLock::new(None),
        }
    }

    /// Bind the store executor.
    ///
    /// Only the first call has an effect; later calls keep the executor
    /// already bound.
    pub fn connect(&self, executor: Arc<dyn ScriptExecutor>) -> &Self {
        let mut slot = self.executor.write();
        if slot.is_none() {
            *slot = Some(executor);
        } else {
            trace!("Limiter already connected, keeping existing executor");
        }
        self
    }

    /// Whether an executor has been bound.
    pub fn is_connected(&self) -> bool {
        self.executor.read().is_some()
    }

    /// The bound executor.
    pub fn executor(&self) -> Result<Arc<dyn ScriptExecutor>> {
        self.executor.read().clone().ok_or(LimiterError::NotConnected)
    }

    /// Namespace prefix of store keys.
    pub fn prefix(&self) -> &str {
        &self.config.prefix
    }

    /// Default quota.
    pub fn max(&self) -> i64 {
        self.config.max
    }

    /// Default window in milliseconds.
    pub fn duration(&self) -> i64 {
        self.config.duration
    }

    /// Tier applied when a call names none.
    pub fn default_tier(&self) -> Tier {
        Tier::new(self.config.max, self.config.duration)
    }

    /// Store key of `id`.
    pub fn key(&self, id: &str) -> LimitKey {
        LimitKey::new(&self.config.prefix, id)
    }

    /// Record a request for `id` against `tiers` and return the binding tier's state.
    ///
    /// Tiers are consulted in the order given: the first one that is fresh or
    /// under quota takes the hit. With no tiers, the default tier applies.
    /// Invalid tiers are rejected before the store is touched.
    pub async fn get(&self, id: &str, tiers: &[Tier]) -> Result<Limit> {
        let default_tier;
        let tiers = if tiers.is_empty() {
            default_tier = [self.default_tier()];
            &default_tier[..]
        } else {
            validate_tiers(tiers)?;
            tiers
        };

        let executor = self.executor()?;
        let key = self.key(id);
        let now = self.clock.now_millis();

        let mut args = Vec::with_capacity(1 + tiers.len() * 2);
        args.push(now);
        args.extend(flatten_tiers(tiers));

        trace!(
            key = %key,
            tiers = tiers.len(),
            now = now,
            "Evaluating rate limit"
        );

        let reply = executor.eval(&[key.primary()], &args).await?;
        let limit = Limit::try_from(reply)?;

        if !limit.is_allowed() {
            debug!(
                key = %key,
                total = limit.total,
                duration = limit.duration,
                remaining = limit.remaining,
                "Rate limit exceeded"
            );
        }

        Ok(limit)
    }

    /// [`Limiter::get`] taking a flat `[quota, window, quota, window, ...]` list.
    ///
    /// A missing first quota or window is taken from the defaults; any other
    /// tier must be complete.
    pub async fn get_flat(&self, id: &str, values: &[i64]) -> Result<Limit> {
        let tiers = self.tiers_from_flat(values)?;
        self.get(id, &tiers).await
    }

    fn tiers_from_flat(&self, values: &[i64]) -> Result<Vec<Tier>> {
        match values {
            [] => Ok(Vec::new()),
            [quota] => Ok(vec![Tier::new(*quota, self.config.duration)]),
            _ => {
                let pairs = values.chunks_exact(2);
                if let [quota] = pairs.remainder() {
                    return Err(LimiterError::MalformedTier(format!("{quota}:")));
                }
                Ok(pairs.map(|pair| Tier::new(pair[0], pair[1])).collect())
            }
        }
    }

    /// Delete all state of `id`, returning the number of keys removed.
    pub async fn remove(&self, id: &str) -> Result<u64> {
        let executor = self.executor()?;
        let key = self.key(id);

        let removed = executor.del(&key.primary()).await?;
        trace!(key = %key, removed = removed, "Removed rate limit state");

        Ok(removed)
    }
}

impl Default for Limiter {
    fn default() -> Self {
        Self::new(LimiterConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::store::{MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio_test::{assert_err, assert_ok};

    /// Executor that records calls and replies with a fixed vector.
    #[derive(Default)]
    struct ScriptedExecutor {
        reply: Vec<i64>,
        calls: AtomicUsize,
        last_args: parking_lot::Mutex<Vec<i64>>,
        last_keys: parking_lot::Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ScriptExecutor for ScriptedExecutor {
        async fn eval(&self, keys: &[String], args: &[i64]) -> std::result::Result<Vec<i64>, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            *self.last_keys.lock() = keys.to_vec();
            *self.last_args.lock() = args.to_vec();
            Ok(self.reply.clone())
        }

        async fn exists(&self, _key: &str) -> std::result::Result<bool, StoreError> {
            Ok(false)
        }

        async fn del(&self, _key: &str) -> std::result::Result<u64, StoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(0)
        }

        async fn set_with_expiry(
            &self,
            _key: &str,
            _value: i64,
            _ttl: Duration,
        ) -> std::result::Result<(), StoreError> {
            Ok(())
        }
    }

    fn scripted(reply: Vec<i64>) -> Arc<ScriptedExecutor> {
        Arc::new(ScriptedExecutor {
            reply,
            ..Default::default()
        })
    }

    fn limiter_at(millis: i64) -> Limiter {
        Limiter::with_clock(LimiterConfig::default(), Arc::new(ManualClock::new(millis)))
    }

    #[test]
    fn test_limiter_creation() {
        let limiter = Limiter::default();
        assert_eq!(limiter.prefix(), "LIMIT");
        assert_eq!(limiter.max(), 2500);
        assert_eq!(limiter.duration(), 3_600_000);
        assert!(!limiter.is_connected());
    }

    #[test]
    fn test_invalid_defaults_fall_back() {
        let limiter = Limiter::new(LimiterConfig::default().max(0).duration(50));
        assert_eq!(limiter.default_tier(), Tier::new(2500, 3_600_000));
    }

    #[tokio::test]
    async fn test_builds_wire_arguments() {
        let executor = scripted(vec![2, 3, 2_000, 12_000]);
        let limiter = limiter_at(10_000);
        limiter.connect(executor.clone());

        let limit = limiter
            .get("user", &[Tier::new(3, 2_000), Tier::new(1, 1_000)])
            .await
            .unwrap();

        assert_eq!(limit, Limit::new(2, 3, 2_000, 12_000));
        assert_eq!(*executor.last_keys.lock(), vec!["LIMIT:user".to_string()]);
        assert_eq!(*executor.last_args.lock(), vec![10_000, 3, 2_000, 1, 1_000]);
    }

    #[tokio::test]
    async fn test_default_tier_when_none_given() {
        let executor = scripted(vec![2499, 2500, 3_600_000, 3_600_000]);
        let limiter = limiter_at(0);
        limiter.connect(executor.clone());

        assert_ok!(limiter.get("user", &[]).await);
        assert_eq!(*executor.last_args.lock(), vec![0, 2500, 3_600_000]);
    }

    #[tokio::test]
    async fn test_flat_call_shape() {
        let executor = scripted(vec![0, 1, 1, 1]);
        let limiter = limiter_at(0);
        limiter.connect(executor.clone());

        limiter.get_flat("user", &[10]).await.unwrap();
        assert_eq!(*executor.last_args.lock(), vec![0, 10, 3_600_000]);

        limiter.get_flat("user", &[3, 2_000, 2, 1_000]).await.unwrap();
        assert_eq!(*executor.last_args.lock(), vec![0, 3, 2_000, 2, 1_000]);

        let err = limiter.get_flat("user", &[3, 2_000, 2]).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_invalid_tier_never_reaches_store() {
        let executor = scripted(vec![0, 1, 1, 1]);
        let limiter = limiter_at(0);
        limiter.connect(executor.clone());

        let err = limiter
            .get("user", &[Tier::new(5, 1_000), Tier::new(-1, 1_000)])
            .await
            .unwrap_err();

        assert!(matches!(err, LimiterError::InvalidQuota { tier: 1, value: -1 }));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_not_connected() {
        let limiter = Limiter::default();

        let err = assert_err!(limiter.get("user", &[]).await);
        assert!(matches!(err, LimiterError::NotConnected));

        let err = assert_err!(limiter.remove("user").await);
        assert!(matches!(err, LimiterError::NotConnected));
    }

    #[tokio::test]
    async fn test_validation_precedes_connection_check() {
        let limiter = Limiter::default();

        let err = limiter.get("user", &[Tier::new(1, 0)]).await.unwrap_err();
        assert!(err.is_validation());
    }

    #[tokio::test]
    async fn test_malformed_reply_is_store_error() {
        let limiter = limiter_at(0);
        limiter.connect(scripted(vec![1, 2, 3]));

        let err = limiter.get("user", &[]).await.unwrap_err();
        assert!(matches!(err, LimiterError::Store(StoreError::UnexpectedReply(3))));
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let first = scripted(vec![1, 2, 3, 4]);
        let second = scripted(vec![5, 6, 7, 8]);
        let limiter = limiter_at(0);

        limiter.connect(first.clone()).connect(second.clone());

        let limit = limiter.get("user", &[]).await.unwrap();
        assert_eq!(limit, Limit::new(1, 2, 3, 4));
        assert_eq!(second.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_against_memory_store() {
        let clock = ManualClock::new(5_000);
        let store = Arc::new(MemoryStore::with_clock(Arc::new(clock.clone())));
        let limiter = Limiter::with_clock(LimiterConfig::default().max(2), Arc::new(clock));
        limiter.connect(store);

        let limit = limiter.get("user", &[]).await.unwrap();
        assert_eq!(limit, Limit::new(1, 2, 3_600_000, 3_605_000));

        assert_eq!(limiter.remove("user").await.unwrap(), 1);
        assert_eq!(limiter.remove("user").await.unwrap(), 0);
    }
}
