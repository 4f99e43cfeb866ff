//! Store and lock implementations.

pub mod lmdb;
pub mod memory;

use std::time::Duration;

/// How long to sleep before re-checking a held lock.
///
/// Never past the caller's deadline, never longer than the poll interval, and
/// never longer than the holder's remaining lease.
pub(crate) fn next_nap(
    poll_interval: Duration,
    until_deadline: Duration,
    until_expiry: Option<Duration>,
) -> Duration {
    let nap = poll_interval.min(until_deadline);
    match until_expiry {
        Some(expiry) => nap.min(expiry.max(Duration::from_millis(1))),
        None => nap,
    }
}
