//! Leased lock tokens.
//!
//! A [`Lease`] is proof that the holder owns a named lock until `expires_at`.
//! Lock services hand one out from `acquire` and take it back by value in
//! `release`, so a released lease cannot be released twice.
//!
//! ```text
//! (unlocked) ─── acquire() ──→ Lease ─── release(lease) ──→ (unlocked)
//!                                │
//!                         expires_at passes ──→ (unlocked, holder unaware)
//! ```

use crate::{new_lease_token, LeaseToken, Timestamp};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// A held, time-bounded lock.
#[derive(Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    name: String,
    token: LeaseToken,
    acquired_at: Timestamp,
    expires_at: Timestamp,
}

impl Lease {
    /// Grant a new lease on `name` starting at `now`.
    pub fn grant(name: impl Into<String>, now: Timestamp, duration: Duration) -> Self {
        let span = chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(span).unwrap_or(Timestamp::MAX_UTC);
        Self {
            name: name.into(),
            token: new_lease_token(),
            acquired_at: now,
            expires_at,
        }
    }

    /// Get the lock name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Unique token distinguishing this holder from later holders of the same name.
    pub fn token(&self) -> LeaseToken {
        self.token
    }

    pub fn acquired_at(&self) -> Timestamp {
        self.acquired_at
    }

    pub fn expires_at(&self) -> Timestamp {
        self.expires_at
    }

    /// Length of the lease as granted.
    pub fn duration(&self) -> Duration {
        (self.expires_at - self.acquired_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Returns true if a holder that has had the lease for `held_for` is past
    /// its expiry.
    ///
    /// Measured on the holder's own timer, so it does not depend on which
    /// clock the lock service used to stamp `acquired_at`.
    pub fn outlived_by(&self, held_for: Duration) -> bool {
        held_for >= self.duration()
    }

    /// Check if the lease has expired based on current time.
    pub fn is_expired(&self, now: Timestamp) -> bool {
        now >= self.expires_at
    }

    /// Calculate remaining duration until expiry.
    pub fn remaining(&self, now: Timestamp) -> Option<Duration> {
        if now >= self.expires_at {
            None
        } else {
            (self.expires_at - now).to_std().ok()
        }
    }
}
