//! In-process store and lock.
//!
//! Both are plain mutex-guarded maps. They coordinate tasks inside one
//! process only, which is enough for single-node deployments and for
//! exercising distributed-cache logic in tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use lazycache_core::constants::{DEFAULT_LOCK_ACQUIRE_TIMEOUT_SECS, DEFAULT_LOCK_POLL_INTERVAL_MS};
use lazycache_core::{CacheClock, Lease, LeaseToken, LockError, StoreError, SystemClock, Timestamp};
use tokio::sync::Notify;
use tokio::time::Instant;

use super::next_nap;
use crate::traits::{KeyValueStore, LockService};

fn lock_map<K, V>(map: &Mutex<HashMap<K, V>>) -> MutexGuard<'_, HashMap<K, V>> {
    // Every critical section below leaves the map consistent, so a panic in
    // another holder cannot leave it half-written.
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// STORE
// ============================================================================

/// Mutex-guarded `HashMap` store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    pub fn len(&self) -> usize {
        lock_map(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Raw access for tests and diagnostics.
    pub fn raw(&self, key: &str) -> Option<String> {
        lock_map(&self.entries).get(key).cloned()
    }
}

#[async_trait]
impl KeyValueStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(lock_map(&self.entries).get(key).cloned())
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        lock_map(&self.entries).insert(key.to_string(), value.to_string());
        Ok(())
    }
}

// ============================================================================
// LOCK
// ============================================================================

#[derive(Debug, Clone, Copy)]
struct HeldLease {
    token: LeaseToken,
    expires_at: Timestamp,
}

/// Lease lock over a mutex-guarded map.
///
/// Waiters are woken on every release and otherwise re-check every
/// `poll_interval`, so an expired lease is taken over even if its holder
/// never releases it.
pub struct InMemoryLockService {
    held: Mutex<HashMap<String, HeldLease>>,
    released: Notify,
    acquire_timeout: Duration,
    poll_interval: Duration,
    clock: Arc<dyn CacheClock>,
}

impl InMemoryLockService {
    pub fn new(acquire_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            held: Mutex::new(HashMap::new()),
            released: Notify::new(),
            acquire_timeout,
            poll_interval,
            clock: Arc::new(SystemClock),
        }
    }

    /// Judge lease expiry against `clock` instead of system time.
    pub fn with_clock(mut self, clock: Arc<dyn CacheClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Returns true if `name` is held by an unexpired lease.
    pub fn is_held(&self, name: &str) -> bool {
        let now = self.clock.now();
        lock_map(&self.held)
            .get(name)
            .is_some_and(|held| now < held.expires_at)
    }

    /// Take the lock if free; otherwise report how long the holder has left.
    fn try_acquire(&self, name: &str, duration: Duration) -> Result<Lease, Option<Duration>> {
        let now = self.clock.now();
        let mut held = lock_map(&self.held);
        if let Some(current) = held.get(name) {
            if now < current.expires_at {
                return Err((current.expires_at - now).to_std().ok());
            }
            tracing::debug!(lock = %name, "Taking over expired lease");
        }
        let lease = Lease::grant(name, now, duration);
        held.insert(
            name.to_string(),
            HeldLease {
                token: lease.token(),
                expires_at: lease.expires_at(),
            },
        );
        Ok(lease)
    }
}

impl Default for InMemoryLockService {
    fn default() -> Self {
        Self::new(
            Duration::from_secs(DEFAULT_LOCK_ACQUIRE_TIMEOUT_SECS),
            Duration::from_millis(DEFAULT_LOCK_POLL_INTERVAL_MS),
        )
    }
}

#[async_trait]
impl LockService for InMemoryLockService {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<Lease, LockError> {
        let started = Instant::now();
        let deadline = started + self.acquire_timeout;

        loop {
            // Register for wake-ups before looking, so a release between the
            // check and the wait is not missed.
            let notified = self.released.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let until_expiry = match self.try_acquire(name, lease) {
                Ok(granted) => return Ok(granted),
                Err(remaining) => remaining,
            };

            let until_deadline = deadline.saturating_duration_since(Instant::now());
            if until_deadline.is_zero() {
                return Err(LockError::AcquireTimeout {
                    name: name.to_string(),
                    waited: started.elapsed(),
                });
            }

            let nap = next_nap(self.poll_interval, until_deadline, until_expiry);
            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(nap) => {}
            }
        }
    }

    async fn release(&self, lease: Lease) -> Result<(), LockError> {
        let mut held = lock_map(&self.held);
        match held.get(lease.name()) {
            Some(current) if current.token == lease.token() => {
                held.remove(lease.name());
                drop(held);
                self.released.notify_waiters();
                Ok(())
            }
            _ => Err(LockError::LeaseLost {
                name: lease.name().to_string(),
            }),
        }
    }
}
