//! Store and lock client traits.
//!
//! These are the only two collaborators a distributed cache talks to. Any
//! client that can satisfy them (Redis, LMDB, a SQL table, an in-memory map)
//! can back a shared cache.

use async_trait::async_trait;
use lazycache_core::{Lease, LockError, StoreError};
use std::sync::Arc;
use std::time::Duration;

/// Text key-value store holding encoded cache records.
///
/// Implementations must not attach a TTL to entries: staleness is decided by
/// the reader, and entries live until overwritten.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Read the value stored under `key`, or `None` if absent.
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Named, leased mutual exclusion.
///
/// # Semantics
///
/// - `acquire` suspends until the lock is free (or its current lease has
///   expired) and fails once the implementation's wait policy gives up
/// - A lease that outlives its duration is considered released even though
///   the holder never called `release`
/// - `release` consumes the lease; releasing a lease that was lost to expiry
///   and taken by someone else reports [`LockError::LeaseLost`]
#[async_trait]
pub trait LockService: Send + Sync {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<Lease, LockError>;

    async fn release(&self, lease: Lease) -> Result<(), LockError>;
}

#[async_trait]
impl<S: KeyValueStore + ?Sized> KeyValueStore for Arc<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        (**self).get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        (**self).set(key, value).await
    }
}

#[async_trait]
impl<L: LockService + ?Sized> LockService for Arc<L> {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<Lease, LockError> {
        (**self).acquire(name, lease).await
    }

    async fn release(&self, lease: Lease) -> Result<(), LockError> {
        (**self).release(lease).await
    }
}
