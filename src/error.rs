//! Error types for the tiered limiter.

use thiserror::Error;

use crate::store::StoreError;

/// Main error type for limiter operations.
#[derive(Error, Debug)]
pub enum LimiterError {
    /// A tier's quota is not a positive number.
    #[error("tier {tier}: quota {value} is invalid, must be a positive number")]
    InvalidQuota {
        /// Zero-based position of the offending tier.
        tier: usize,
        /// The rejected quota.
        value: i64,
    },

    /// A tier's window is not within `1..=MAX_WINDOW` milliseconds.
    #[error("tier {tier}: window {value} is invalid, must be 1ms to 366 days in milliseconds")]
    InvalidWindow {
        /// Zero-based position of the offending tier.
        tier: usize,
        /// The rejected window.
        value: i64,
    },

    /// A tier given as text could not be parsed.
    #[error("invalid tier `{0}`, expected `<quota>:<window-ms>`")]
    MalformedTier(String),

    /// The limiter was used before an executor was bound.
    #[error("limiter is not connected to a store")]
    NotConnected,

    /// Failure reported by the store executor.
    #[error("Store error: {0}")]
    Store(#[from] StoreError),
}

impl LimiterError {
    /// Whether the error was raised by input validation, before any store call.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidQuota { .. } | Self::InvalidWindow { .. } | Self::MalformedTier(_)
        )
    }
}

/// Result type alias for limiter operations.
pub type Result<T> = std::result::Result<T, LimiterError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_grouping() {
        assert!(LimiterError::InvalidQuota { tier: 0, value: -1 }.is_validation());
        assert!(LimiterError::InvalidWindow { tier: 1, value: 0 }.is_validation());
        assert!(LimiterError::MalformedTier("x".to_string()).is_validation());
        assert!(!LimiterError::NotConnected.is_validation());
    }

    #[test]
    fn test_messages_name_the_offending_value() {
        let err = LimiterError::InvalidQuota { tier: 2, value: -1 };
        assert_eq!(
            err.to_string(),
            "tier 2: quota -1 is invalid, must be a positive number"
        );

        let err = LimiterError::InvalidWindow { tier: 0, value: 0 };
        assert!(err.to_string().contains("window 0"));
    }
}
