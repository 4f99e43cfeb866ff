//! Clock abstraction for staleness checks.
//!
//! Record ages are computed against an injected clock so tests can move time
//! forward deterministically instead of sleeping.

use crate::Timestamp;
use chrono::Utc;
use std::time::Duration;

/// Source of "now" for record timestamps and staleness comparisons.
pub trait CacheClock: Send + Sync {
    /// Current wall-clock time in UTC.
    fn now(&self) -> Timestamp;
}

/// Production clock using system time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl CacheClock for SystemClock {
    fn now(&self) -> Timestamp {
        Utc::now()
    }
}

/// Age of `then` as seen at `now`.
///
/// Timestamps in the future (clock skew between processes) count as age zero.
pub fn age_at(then: Timestamp, now: Timestamp) -> Duration {
    now.signed_duration_since(then)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_age_at_past() {
        let now = Utc::now();
        let then = now - chrono::Duration::milliseconds(1500);
        assert_eq!(age_at(then, now), Duration::from_millis(1500));
    }

    #[test]
    fn test_age_at_future_is_zero() {
        let now = Utc::now();
        let then = now + chrono::Duration::seconds(10);
        assert_eq!(age_at(then, now), Duration::ZERO);
    }
}
