//! The outcome of a rate limit evaluation.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::store::StoreError;

/// State of the binding tier after one evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Limit {
    /// Requests left in the window. Negative once the quota is exceeded.
    pub remaining: i64,
    /// Quota of the binding tier.
    pub total: i64,
    /// Window of the binding tier in milliseconds.
    pub duration: i64,
    /// Epoch millis at which the binding tier's window ends.
    pub reset: i64,
}

impl Limit {
    /// Create a limit from its parts.
    pub const fn new(remaining: i64, total: i64, duration: i64, reset: i64) -> Self {
        Self {
            remaining,
            total,
            duration,
            reset,
        }
    }

    /// Whether the request that produced this outcome is within quota.
    pub fn is_allowed(&self) -> bool {
        self.remaining >= 0
    }

    /// Time left until the window resets, measured from `now` (epoch millis).
    pub fn reset_after(&self, now: i64) -> Duration {
        Duration::from_millis(self.reset.saturating_sub(now).max(0) as u64)
    }
}

/// Maps the evaluator reply `[remaining, total, duration, reset]`.
impl TryFrom<Vec<i64>> for Limit {
    type Error = StoreError;

    fn try_from(reply: Vec<i64>) -> Result<Self, Self::Error> {
        match reply[..] {
            [remaining, total, duration, reset] => Ok(Self::new(remaining, total, duration, reset)),
            _ => Err(StoreError::UnexpectedReply(reply.len())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_reply() {
        let limit = Limit::try_from(vec![4, 5, 60_000, 1_060_000]).unwrap();

        assert_eq!(limit.remaining, 4);
        assert_eq!(limit.total, 5);
        assert_eq!(limit.duration, 60_000);
        assert_eq!(limit.reset, 1_060_000);
    }

    #[test]
    fn test_from_short_reply() {
        let err = Limit::try_from(vec![4, 5]).unwrap_err();
        assert!(matches!(err, StoreError::UnexpectedReply(2)));
    }

    #[test]
    fn test_allowed_until_negative() {
        assert!(Limit::new(0, 5, 1_000, 0).is_allowed());
        assert!(!Limit::new(-1, 5, 1_000, 0).is_allowed());
    }

    #[test]
    fn test_reset_after() {
        let limit = Limit::new(1, 2, 2_000, 12_000);

        assert_eq!(limit.reset_after(10_500), Duration::from_millis(1_500));
        assert_eq!(limit.reset_after(13_000), Duration::ZERO);
    }

    #[test]
    fn test_serializes_field_names() {
        let json = serde_json::to_value(Limit::new(1, 2, 3, 4)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"remaining": 1, "total": 2, "duration": 3, "reset": 4})
        );
    }
}
