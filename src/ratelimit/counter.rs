//! Per-identifier counter state and the policy evaluation algorithm.
//!
//! The same algorithm exists twice: as the Lua script Redis runs atomically,
//! and as [`CounterRecord::evaluate`], which the in-memory store runs under a
//! per-key lock. Both obey the evaluator contract: arguments
//! `[timestamp, quota, window, ...]`, reply `[remaining, total, duration, reset]`.

/// Lua source of the policy evaluator.
pub const EVALUATOR_SCRIPT: &str = include_str!("evaluate.lua");

/// Counter of a single tier within a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierCounter {
    /// Hits recorded in the current window.
    pub count: i64,
    /// Epoch millis at which the window ends.
    pub reset: i64,
}

impl TierCounter {
    fn is_expired(&self, now: i64) -> bool {
        self.reset <= now
    }
}

/// All tier counters tracked for one identifier, indexed by tier position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CounterRecord {
    tiers: Vec<Option<TierCounter>>,
}

impl CounterRecord {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Counter of the tier at `index`, if one was ever recorded.
    pub fn tier(&self, index: usize) -> Option<TierCounter> {
        self.tiers.get(index).copied().flatten()
    }

    /// Time at which every tier window has elapsed and the record can be dropped.
    pub fn expires_at(&self) -> Option<i64> {
        self.tiers.iter().flatten().map(|c| c.reset).max()
    }

    /// Record one hit against the binding tier and return its outcome.
    ///
    /// `tiers` holds `(quota, window)` pairs in declared order. The first tier
    /// that is missing, expired or under quota records the hit. When every
    /// tier is exhausted the last one takes it, so `remaining` keeps falling.
    ///
    /// Returns `None` for an empty policy.
    pub fn evaluate(&mut self, now: i64, tiers: &[(i64, i64)]) -> Option<[i64; 4]> {
        if self.tiers.len() < tiers.len() {
            self.tiers.resize(tiers.len(), None);
        }

        let last = tiers.len().checked_sub(1)?;

        for (index, &(quota, window)) in tiers.iter().enumerate() {
            let slot = &mut self.tiers[index];

            match slot {
                Some(counter) if !counter.is_expired(now) => {
                    if counter.count < quota || index == last {
                        counter.count += 1;
                        return Some([quota - counter.count, quota, window, counter.reset]);
                    }
                }
                _ => {
                    let reset = now.saturating_add(window);
                    *slot = Some(TierCounter { count: 1, reset });
                    return Some([quota - 1, quota, window, reset]);
                }
            }
        }

        None
    }
}
