//! LAZYCACHE Test Utilities
//!
//! Centralized test infrastructure for the lazycache workspace:
//! - A manually driven clock
//! - Gates and call counters for steering wrapped computations
//! - Instrumented lock and store wrappers that log their operations in order
//! - Failing store and lock fakes
//! - Proptest generators for namespaces and call arguments

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use tokio::sync::watch;

// Re-export core types for convenience
pub use lazycache_core::{
    CacheClock, CacheError, CacheKey, CacheRecord, CacheResult, JsonKeyCodec, Lease, LockError,
    StoreError, Timestamp,
};
pub use lazycache_storage::{InMemoryLockService, InMemoryStore, KeyValueStore, LockService};

// ============================================================================
// CLOCK
// ============================================================================

/// Clock that only moves when told to.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    /// 2024-01-01 00:00:00 UTC.
    pub fn at_epoch() -> Self {
        Self::new(
            Utc.timestamp_opt(1_704_067_200, 0)
                .single()
                .expect("fixed timestamp is valid"),
        )
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now += chrono::Duration::from_std(by).expect("test durations fit in chrono");
    }

    pub fn advance_millis(&self, millis: u64) {
        self.advance(Duration::from_millis(millis));
    }
}

impl CacheClock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

// ============================================================================
// STEERING COMPUTATIONS
// ============================================================================

/// A latch that holds computations until opened.
#[derive(Debug)]
pub struct Gate {
    open: watch::Sender<bool>,
}

impl Gate {
    pub fn new() -> Self {
        Self {
            open: watch::Sender::new(false),
        }
    }

    /// Wait until the gate is opened. Returns immediately once open.
    pub async fn wait(&self) {
        let mut rx = self.open.subscribe();
        let _ = rx.wait_for(|open| *open).await;
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }
}

impl Default for Gate {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared invocation counter; `next()` yields 1, 2, 3, ...
#[derive(Debug, Clone, Default)]
pub struct CallCounter(Arc<AtomicU64>);

impl CallCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one invocation and return its ordinal.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn count(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

/// Poll `condition` until it holds or `timeout` elapses.
pub async fn wait_until<F: Fn() -> bool>(condition: F, timeout: Duration) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if condition() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
}

/// Install a test-friendly tracing subscriber (respects `RUST_LOG`).
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ============================================================================
// INSTRUMENTED COLLABORATORS
// ============================================================================

/// One observed store or lock operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    Acquired(String),
    Released(String),
    Write(String),
}

/// Ordered, shared log of [`Event`]s.
#[derive(Debug, Clone, Default)]
pub struct EventLog(Arc<Mutex<Vec<Event>>>);

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, event: Event) {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }

    pub fn events(&self) -> Vec<Event> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn writes(&self) -> usize {
        self.events()
            .iter()
            .filter(|e| matches!(e, Event::Write(_)))
            .count()
    }
}

/// Lock wrapper that logs acquire and release order.
///
/// `Released` is logged before the inner release runs, so the next
/// `Acquired` always appears after it in the log.
pub struct InstrumentedLockService<L> {
    inner: L,
    log: EventLog,
}

impl<L: LockService> InstrumentedLockService<L> {
    pub fn new(inner: L, log: EventLog) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl<L: LockService> LockService for InstrumentedLockService<L> {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<Lease, LockError> {
        let granted = self.inner.acquire(name, lease).await?;
        self.log.push(Event::Acquired(name.to_string()));
        Ok(granted)
    }

    async fn release(&self, lease: Lease) -> Result<(), LockError> {
        self.log.push(Event::Released(lease.name().to_string()));
        self.inner.release(lease).await
    }
}

/// Store wrapper that logs every successful write.
pub struct RecordingStore<S> {
    inner: S,
    log: EventLog,
}

impl<S: KeyValueStore> RecordingStore<S> {
    pub fn new(inner: S, log: EventLog) -> Self {
        Self { inner, log }
    }
}

#[async_trait]
impl<S: KeyValueStore> KeyValueStore for RecordingStore<S> {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        self.inner.set(key, value).await?;
        self.log.push(Event::Write(key.to_string()));
        Ok(())
    }
}

// ============================================================================
// FAILING FAKES
// ============================================================================

/// In-memory store whose reads and writes can be switched to fail.
#[derive(Debug, Default)]
pub struct FailingStore {
    inner: InMemoryStore,
    fail_reads: AtomicBool,
    fail_writes: AtomicBool,
}

impl FailingStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.store(fail, Ordering::SeqCst);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }
}

#[async_trait]
impl KeyValueStore for FailingStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StoreError::ReadFailed {
                key: key.to_string(),
                reason: "injected read failure".to_string(),
            });
        }
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteFailed {
                key: key.to_string(),
                reason: "injected write failure".to_string(),
            });
        }
        self.inner.set(key, value).await
    }
}

/// Lock service that refuses every acquisition.
#[derive(Debug, Default)]
pub struct UnavailableLockService;

#[async_trait]
impl LockService for UnavailableLockService {
    async fn acquire(&self, name: &str, _lease: Duration) -> Result<Lease, LockError> {
        Err(LockError::AcquireFailed {
            name: name.to_string(),
            reason: "lock service unavailable".to_string(),
        })
    }

    async fn release(&self, lease: Lease) -> Result<(), LockError> {
        Err(LockError::ReleaseFailed {
            name: lease.name().to_string(),
            reason: "lock service unavailable".to_string(),
        })
    }
}

/// Lock wrapper whose `release` frees the inner lock but then reports the
/// lease as lost, as if it had expired and been taken over.
pub struct ReleaseFailingLockService<L> {
    inner: L,
}

impl<L: LockService> ReleaseFailingLockService<L> {
    pub fn new(inner: L) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<L: LockService> LockService for ReleaseFailingLockService<L> {
    async fn acquire(&self, name: &str, lease: Duration) -> Result<Lease, LockError> {
        self.inner.acquire(name, lease).await
    }

    async fn release(&self, lease: Lease) -> Result<(), LockError> {
        let name = lease.name().to_string();
        self.inner.release(lease).await?;
        Err(LockError::LeaseLost { name })
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Namespace-like identifiers (`users`, `orders_v2`, ...).
pub fn arb_namespace() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9_]{0,15}"
}

/// Call-argument shapes a cached function typically takes.
pub fn arb_args() -> impl Strategy<Value = (u64, String, BTreeMap<String, i32>)> {
    (
        any::<u64>(),
        "[a-zA-Z0-9 ]{0,16}",
        proptest::collection::btree_map("[a-z]{1,6}", any::<i32>(), 0..5),
    )
}
