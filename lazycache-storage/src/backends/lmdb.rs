//! LMDB-backed store and lease lock.
//!
//! Uses the heed crate (Rust bindings for LMDB). An LMDB environment is a
//! memory-mapped file that several processes on one host can open at once,
//! which makes it a shared store without running a server.
//!
//! # Layout
//!
//! Two named databases live in one environment:
//! - `records`: store key → encoded cache record
//! - `leases`: lock name → JSON-encoded [`Lease`]
//!
//! # Locking
//!
//! LMDB allows one write transaction at a time across all processes. The lock
//! service reads the current lease row and writes its own inside a single
//! write transaction, so check-and-take is atomic without any extra protocol.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use heed::types::Str;
use heed::{Database, Env, EnvOpenOptions};
use lazycache_core::{CacheClock, Lease, LockError, StoreError, SystemClock};
use tokio::time::Instant;

use super::next_nap;
use crate::traits::{KeyValueStore, LockService};

const RECORDS_DB: &str = "records";
const LEASES_DB: &str = "leases";

/// An opened LMDB environment with the record and lease databases.
///
/// Cheap to clone; clones share the same environment.
#[derive(Clone)]
pub struct LmdbEnv {
    env: Env,
    records: Database<Str, Str>,
    leases: Database<Str, Str>,
}

impl LmdbEnv {
    /// Open (or create) an environment.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, StoreError> {
        let map_size = max_size_mb
            .checked_mul(1024 * 1024)
            .ok_or_else(|| StoreError::Unavailable {
                reason: format!("map size of {max_size_mb} MB does not fit in usize"),
            })?;
        std::fs::create_dir_all(&path).map_err(|e| StoreError::Unavailable {
            reason: format!("cannot create {}: {e}", path.as_ref().display()),
        })?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(map_size)
                .max_dbs(2)
                .open(path.as_ref())
        }
        .map_err(unavailable)?;

        let mut wtxn = env.write_txn().map_err(unavailable)?;
        let records: Database<Str, Str> = env
            .create_database(&mut wtxn, Some(RECORDS_DB))
            .map_err(unavailable)?;
        let leases: Database<Str, Str> = env
            .create_database(&mut wtxn, Some(LEASES_DB))
            .map_err(unavailable)?;
        wtxn.commit().map_err(unavailable)?;

        Ok(Self {
            env,
            records,
            leases,
        })
    }
}

fn unavailable(e: heed::Error) -> StoreError {
    StoreError::Unavailable {
        reason: e.to_string(),
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Record store over the `records` database.
#[derive(Clone)]
pub struct LmdbStore {
    lmdb: LmdbEnv,
}

impl LmdbStore {
    pub fn new(lmdb: LmdbEnv) -> Self {
        Self { lmdb }
    }
}

#[async_trait]
impl KeyValueStore for LmdbStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let read_failed = |e: heed::Error| StoreError::ReadFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };
        let rtxn = self.lmdb.env.read_txn().map_err(read_failed)?;
        let value = self
            .lmdb
            .records
            .get(&rtxn, key)
            .map_err(read_failed)?
            .map(str::to_owned);
        Ok(value)
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let write_failed = |e: heed::Error| StoreError::WriteFailed {
            key: key.to_string(),
            reason: e.to_string(),
        };
        let mut wtxn = self.lmdb.env.write_txn().map_err(write_failed)?;
        self.lmdb
            .records
            .put(&mut wtxn, key, value)
            .map_err(write_failed)?;
        wtxn.commit().map_err(write_failed)
    }
}

// ============================================================================
// LOCK
// ============================================================================

/// Lease lock over the `leases` database.
///
/// Other processes cannot push a wake-up through LMDB, so waiters poll every
/// `poll_interval` until `acquire_timeout` elapses.
pub struct LmdbLockService {
    lmdb: LmdbEnv,
    acquire_timeout: Duration,
    poll_interval: Duration,
    clock: Arc<dyn CacheClock>,
}

impl LmdbLockService {
    pub fn new(lmdb: LmdbEnv, acquire_timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            lmdb,
            acquire_timeout,
            poll_interval,
            clock: Arc::new(SystemClock),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn CacheClock>) -> Self {
        self.clock = clock;
        self
    }

    /// Read the lease row for `name` inside `txn`.
    fn current_lease(
        &self,
        txn: &heed::RoTxn,
        name: &str,
    ) -> Result<Option<Lease>, heed::Error> {
        let Some(raw) = self.lmdb.leases.get(txn, name)? else {
            return Ok(None);
        };
        match serde_json::from_str::<Lease>(raw) {
            Ok(lease) => Ok(Some(lease)),
            Err(e) => {
                // An unreadable row cannot be honoured; treat the lock as free.
                tracing::warn!(lock = %name, error = %e, "Discarding undecodable lease row");
                Ok(None)
            }
        }
    }

    /// Take the lock if free; otherwise report how long the holder has left.
    fn try_acquire(
        &self,
        name: &str,
        duration: Duration,
    ) -> Result<Result<Lease, Option<Duration>>, LockError> {
        let failed = |e: heed::Error| LockError::AcquireFailed {
            name: name.to_string(),
            reason: e.to_string(),
        };

        let now = self.clock.now();
        let mut wtxn = self.lmdb.env.write_txn().map_err(failed)?;
        if let Some(current) = self.current_lease(&wtxn, name).map_err(failed)? {
            if !current.is_expired(now) {
                return Ok(Err(current.remaining(now)));
            }
            tracing::debug!(lock = %name, "Taking over expired lease");
        }

        let lease = Lease::grant(name, now, duration);
        let row = serde_json::to_string(&lease).map_err(|e| LockError::AcquireFailed {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        self.lmdb
            .leases
            .put(&mut wtxn, name, &row)
            .map_err(failed)?;
        wtxn.commit().map_err(failed)?;
        Ok(Ok(lease))
    }
}

#[async_trait]
impl LockService for LmdbLockService {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<Lease, LockError> {
        let started = Instant::now();
        let deadline = started + self.acquire_timeout;

        loop {
            let until_expiry = match self.try_acquire(name, lease)? {
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
            tokio::time::sleep(next_nap(self.poll_interval, until_deadline, until_expiry)).await;
        }
    }

    async fn release(&self, lease: Lease) -> Result<(), LockError> {
        let failed = |e: heed::Error| LockError::ReleaseFailed {
            name: lease.name().to_string(),
            reason: e.to_string(),
        };

        let mut wtxn = self.lmdb.env.write_txn().map_err(failed)?;
        let current = self.current_lease(&wtxn, lease.name()).map_err(failed)?;
        if current.map(|c| c.token()) != Some(lease.token()) {
            return Err(LockError::LeaseLost {
                name: lease.name().to_string(),
            });
        }
        self.lmdb
            .leases
            .delete(&mut wtxn, lease.name())
            .map_err(failed)?;
        wtxn.commit().map_err(failed)
    }
}
