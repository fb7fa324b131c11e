//! Rate limiting logic and state management.

mod counter;
mod key;
mod limit;
mod limiter;
pub mod tier;

pub use counter::{CounterRecord, TierCounter, EVALUATOR_SCRIPT};
pub use key::LimitKey;
pub use limit::Limit;
pub use limiter::Limiter;
pub use tier::Tier;
