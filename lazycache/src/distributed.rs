//! Shared-store stale-while-revalidate cache.
//!
//! Records live in a [`KeyValueStore`] every participating process can read.
//! A renewal runs under a named lease from a [`LockService`] so processes take
//! turns writing a key:
//!
//! ```text
//! acquire(lock:{key}) -> [re-read] -> compute -> set({key}) -> release
//! ```
//!
//! The lock is released whatever happens between acquire and release.
//!
//! # Cold keys
//!
//! With [`ColdStartPolicy::Unguarded`] a cold caller decides to compute before
//! taking the lock, so two processes that miss at the same moment both
//! compute; the lock only orders their writes and the last one wins.
//! [`ColdStartPolicy::RecheckUnderLock`] re-reads the store once the lock is
//! held and returns a record another process wrote in the meantime.

use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use lazycache_core::{
    compute_caught, CacheClock, CacheKey, CacheRecord, CacheResult, ColdStartPolicy,
    Computation, KeyCodec, LazyCacheConfig, Lease,
};
use lazycache_storage::{KeyValueStore, LockService};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::options::WrapOptions;

/// Store and lock clients shared by every process using the same cache.
#[derive(Clone)]
pub struct SharedStore {
    pub store: Arc<dyn KeyValueStore>,
    pub locks: Arc<dyn LockService>,
}

impl SharedStore {
    pub fn new(store: impl KeyValueStore + 'static, locks: impl LockService + 'static) -> Self {
        Self {
            store: Arc::new(store),
            locks: Arc::new(locks),
        }
    }
}

/// Lazy cache around one async function, backed by a shared store.
///
/// Cheap to clone; clones share the background renewal bookkeeping.
pub struct DistributedCache<A, T> {
    inner: Arc<Inner<A, T>>,
}

struct Inner<A, T> {
    namespace: String,
    computation: Arc<dyn Computation<A, T>>,
    codec: Arc<dyn KeyCodec<A>>,
    stale_after: Duration,
    clock: Arc<dyn CacheClock>,
    metrics: Arc<CacheMetrics>,
    shared: SharedStore,
    key_prefix: String,
    lock_lease: Duration,
    cold_start: ColdStartPolicy,
    /// Keys with a background renewal queued by this process.
    renewing: Mutex<HashSet<CacheKey>>,
}

impl<A, T> Clone for DistributedCache<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> DistributedCache<A, T>
where
    A: Send + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Wrap `computation` over `shared`.
    ///
    /// Key prefix, lock lease and cold-start policy come from `config`.
    pub fn new<C>(
        namespace: impl Into<String>,
        computation: C,
        stale_after: Duration,
        shared: SharedStore,
        config: &LazyCacheConfig,
        options: WrapOptions<A>,
    ) -> Self
    where
        C: Computation<A, T>,
    {
        Self {
            inner: Arc::new(Inner {
                namespace: namespace.into(),
                computation: Arc::new(computation),
                codec: options.codec,
                stale_after,
                clock: options.clock,
                metrics: options.metrics,
                shared,
                key_prefix: config.key_prefix.clone(),
                lock_lease: config.lock_lease,
                cold_start: config.cold_start,
                renewing: Mutex::new(HashSet::new()),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    /// Call the wrapped function through the shared store.
    ///
    /// A fresh record is returned without touching the lock. A stale record
    /// is returned at once and renewed in a detached task whose failures are
    /// only logged. A missing record is renewed before returning, and any
    /// failure on that path is returned.
    pub async fn call(&self, args: A) -> CacheResult<T> {
        let inner = &self.inner;
        let key = CacheKey::derive(&inner.namespace, inner.codec.as_ref(), &args)?;
        let store_key = key.store_key(&inner.key_prefix);

        match inner.read(&store_key).await? {
            Some(record) if record.is_fresh(inner.clock.now(), inner.stale_after) => {
                CacheMetrics::incr(&inner.metrics.fresh_hits);
                Ok(record.value)
            }
            Some(record) => {
                CacheMetrics::incr(&inner.metrics.stale_hits);
                inner.spawn_renewal(key, args);
                Ok(record.value)
            }
            None => {
                CacheMetrics::incr(&inner.metrics.cold_loads);
                tracing::debug!(key = %key, "Cold key, renewing before returning");
                let recheck = inner.cold_start == ColdStartPolicy::RecheckUnderLock;
                inner.renew(&key, args, recheck).await
            }
        }
    }

    /// The stored record for `args`, without computing anything.
    pub async fn peek(&self, args: &A) -> CacheResult<Option<CacheRecord<T>>> {
        let key = CacheKey::derive(&self.inner.namespace, self.inner.codec.as_ref(), args)?;
        self.inner.read(&key.store_key(&self.inner.key_prefix)).await
    }

    /// Returns true if this process has a background renewal queued for `args`.
    pub fn is_renewing(&self, args: &A) -> CacheResult<bool> {
        let key = CacheKey::derive(&self.inner.namespace, self.inner.codec.as_ref(), args)?;
        Ok(self.inner.lock_renewing().contains(&key))
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl<A, T> Inner<A, T>
where
    A: Send + 'static,
    T: Serialize + DeserializeOwned + Send + Sync + 'static,
{
    fn lock_renewing(&self) -> MutexGuard<'_, HashSet<CacheKey>> {
        self.renewing.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Read and decode a record. Undecodable payloads count as absent so the
    /// next renewal overwrites them.
    async fn read(&self, store_key: &str) -> CacheResult<Option<CacheRecord<T>>> {
        let Some(raw) = self.shared.store.get(store_key).await? else {
            return Ok(None);
        };
        match CacheRecord::decode(store_key, &raw) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                tracing::warn!(key = %store_key, error = %e, "Ignoring undecodable cache record");
                Ok(None)
            }
        }
    }

    fn spawn_renewal(self: &Arc<Self>, key: CacheKey, args: A) {
        if !self.lock_renewing().insert(key.clone()) {
            return;
        }
        CacheMetrics::incr(&self.metrics.renewals_started);
        tracing::debug!(key = %key, "Serving stale value, renewing in background");

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let queued = QueuedRenewal {
                renewing: &inner.renewing,
                key: &key,
            };
            let outcome = inner.renew(&key, args, false).await;
            drop(queued);
            match outcome {
                Ok(_) => {
                    CacheMetrics::incr(&inner.metrics.renewals_succeeded);
                    tracing::debug!(key = %key, "Background renewal completed");
                }
                Err(e) => {
                    CacheMetrics::incr(&inner.metrics.renewals_failed);
                    tracing::warn!(key = %key, error = %e, "Background renewal failed, keeping previous value");
                }
            }
        });
    }

    /// Acquire the key's lock, run the locked section, always release.
    async fn renew(&self, key: &CacheKey, args: A, recheck: bool) -> CacheResult<T> {
        let lock_name = key.lock_name(&self.key_prefix);
        let lease = self.shared.locks.acquire(&lock_name, self.lock_lease).await?;
        let held_since = Instant::now();

        let outcome = self
            .renew_locked(key, &lease, held_since, args, recheck)
            .await;
        let released = self.shared.locks.release(lease).await;

        match (outcome, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(e)) => Err(e.into()),
            (Err(e), Ok(())) => Err(e),
            (Err(e), Err(release_err)) => {
                tracing::warn!(
                    key = %key,
                    error = %release_err,
                    "Lock release failed after failed renewal"
                );
                Err(e)
            }
        }
    }

    async fn renew_locked(
        &self,
        key: &CacheKey,
        lease: &Lease,
        held_since: Instant,
        args: A,
        recheck: bool,
    ) -> CacheResult<T> {
        let store_key = key.store_key(&self.key_prefix);

        if recheck {
            if let Some(record) = self.read(&store_key).await? {
                if record.is_fresh(self.clock.now(), self.stale_after) {
                    tracing::debug!(key = %key, "Fresh record appeared while waiting for lock");
                    return Ok(record.value);
                }
            }
        }

        let value = compute_caught(self.computation.as_ref(), args).await?;
        if lease.outlived_by(held_since.elapsed()) {
            tracing::warn!(
                key = %key,
                lock = %lease.name(),
                "Lease expired before write; another process may hold the lock"
            );
        }

        let record = CacheRecord::new(self.clock.now(), value);
        self.shared.store.set(&store_key, &record.encode()?).await?;
        Ok(record.into_value())
    }
}

/// Clears a key's queued-renewal entry when the renewal task ends, even by
/// unwinding.
struct QueuedRenewal<'a> {
    renewing: &'a Mutex<HashSet<CacheKey>>,
    key: &'a CacheKey,
}

impl Drop for QueuedRenewal<'_> {
    fn drop(&mut self) {
        self.renewing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}
