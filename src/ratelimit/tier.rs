//! Policy tiers.
//!
//! A policy is an ordered list of `(quota, window)` tiers, consulted in the
//! order given.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{LimiterError, Result};

/// Longest accepted window in milliseconds (366 days).
pub const MAX_WINDOW: i64 = 366 * 24 * 60 * 60 * 1000;

/// One `(quota, window)` rule of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Tier {
    /// Requests allowed per window.
    pub quota: i64,
    /// Window length in milliseconds.
    pub window: i64,
}

impl Tier {
    /// Create a tier. Values are checked when the tier is evaluated.
    pub const fn new(quota: i64, window: i64) -> Self {
        Self { quota, window }
    }

    /// Check that the quota is positive and the window lies in `1..=MAX_WINDOW`.
    pub fn validate(&self, index: usize) -> Result<()> {
        if self.quota <= 0 {
            return Err(LimiterError::InvalidQuota {
                tier: index,
                value: self.quota,
            });
        }
        if self.window <= 0 || self.window > MAX_WINDOW {
            return Err(LimiterError::InvalidWindow {
                tier: index,
                value: self.window,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.quota, self.window)
    }
}

/// Parses `<quota>:<window-ms>`, e.g. `100:60000`.
impl FromStr for Tier {
    type Err = LimiterError;

    fn from_str(s: &str) -> Result<Self> {
        let malformed = || LimiterError::MalformedTier(s.to_string());

        let (quota, window) = s.trim().split_once(':').ok_or_else(malformed)?;
        let quota = quota.trim().parse().map_err(|_| malformed())?;
        let window = window.trim().parse().map_err(|_| malformed())?;

        Ok(Self::new(quota, window))
    }
}

/// Validate every tier of a policy, reporting the first offending value.
pub fn validate_tiers(tiers: &[Tier]) -> Result<()> {
    tiers
        .iter()
        .enumerate()
        .try_for_each(|(index, tier)| tier.validate(index))
}

/// Flatten tiers into the evaluator's `[quota, window, quota, window, ...]` layout.
pub fn flatten_tiers(tiers: &[Tier]) -> Vec<i64> {
    tiers.iter().flat_map(|t| [t.quota, t.window]).collect()
}
