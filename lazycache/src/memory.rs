//! In-process stale-while-revalidate cache.
//!
//! Each key owns a [`Slot`]: the latest record plus at most one in-flight
//! computation. The in-flight computation is a [`Shared`] future, so every
//! caller that needs it awaits the same result instead of starting another.
//! Computations are spawned on the runtime and finish even if all waiters go
//! away; only the computation itself clears the in-flight marker.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use lazycache_core::{
    compute_caught, CacheClock, CacheKey, CacheRecord, CacheResult, Computation,
    ComputationError, KeyCodec,
};

use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::options::WrapOptions;

type Pending<T> = Shared<BoxFuture<'static, CacheResult<Arc<CacheRecord<T>>>>>;

struct Slot<T> {
    record: Option<Arc<CacheRecord<T>>>,
    in_flight: Option<Pending<T>>,
}

impl<T> Default for Slot<T> {
    fn default() -> Self {
        Self {
            record: None,
            in_flight: None,
        }
    }
}

/// What a call decided while holding the slot map.
enum Plan<T> {
    Serve(T),
    Await(Pending<T>),
}

/// Per-process lazy cache around one async function.
///
/// Cheap to clone; clones share slots.
pub struct MemoryCache<A, T> {
    inner: Arc<Inner<A, T>>,
}

struct Inner<A, T> {
    namespace: String,
    computation: Arc<dyn Computation<A, T>>,
    codec: Arc<dyn KeyCodec<A>>,
    stale_after: Duration,
    clock: Arc<dyn CacheClock>,
    metrics: Arc<CacheMetrics>,
    slots: Mutex<HashMap<CacheKey, Slot<T>>>,
}

impl<A, T> Clone for MemoryCache<A, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<A, T> MemoryCache<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Wrap `computation`; records older than `stale_after` are served once
    /// more while a renewal runs.
    pub fn new<C>(
        namespace: impl Into<String>,
        computation: C,
        stale_after: Duration,
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
                slots: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.inner.namespace
    }

    pub fn stale_after(&self) -> Duration {
        self.inner.stale_after
    }

    /// Call the wrapped function through the cache.
    ///
    /// Blocks only when no record exists for `args`; a failure on that path
    /// (or of the computation being waited on) is returned to every waiter.
    pub async fn call(&self, args: A) -> CacheResult<T> {
        let key = CacheKey::derive(&self.inner.namespace, self.inner.codec.as_ref(), &args)?;
        match self.inner.plan(key, args) {
            Plan::Serve(value) => Ok(value),
            Plan::Await(pending) => pending.await.map(|record| record.value.clone()),
        }
    }

    /// The record currently held for `args`, without computing anything.
    pub fn peek(&self, args: &A) -> CacheResult<Option<Arc<CacheRecord<T>>>> {
        let key = CacheKey::derive(&self.inner.namespace, self.inner.codec.as_ref(), args)?;
        Ok(self
            .inner
            .lock_slots()
            .get(&key)
            .and_then(|slot| slot.record.clone()))
    }

    /// Returns true if a computation for `args` is running.
    pub fn is_computing(&self, args: &A) -> CacheResult<bool> {
        let key = CacheKey::derive(&self.inner.namespace, self.inner.codec.as_ref(), args)?;
        Ok(self
            .inner
            .lock_slots()
            .get(&key)
            .is_some_and(|slot| slot.in_flight.is_some()))
    }

    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.inner.metrics.snapshot()
    }
}

impl<A, T> Inner<A, T>
where
    A: Send + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn lock_slots(&self) -> MutexGuard<'_, HashMap<CacheKey, Slot<T>>> {
        // Slots are only ever replaced whole, so a poisoned map is still usable.
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn plan(self: &Arc<Self>, key: CacheKey, args: A) -> Plan<T> {
        let now = self.clock.now();
        let mut slots = self.lock_slots();
        let slot = slots.entry(key.clone()).or_default();

        if let Some(record) = &slot.record {
            let value = record.value.clone();
            if record.is_fresh(now, self.stale_after) {
                CacheMetrics::incr(&self.metrics.fresh_hits);
                return Plan::Serve(value);
            }

            CacheMetrics::incr(&self.metrics.stale_hits);
            if slot.in_flight.is_none() {
                CacheMetrics::incr(&self.metrics.renewals_started);
                tracing::debug!(key = %key, "Serving stale value, renewing in background");
                let pending = self.start(key.clone(), args);
                slot.in_flight = Some(pending.clone());
                self.spawn_renewal(key, pending);
            }
            return Plan::Serve(value);
        }

        CacheMetrics::incr(&self.metrics.cold_loads);
        if let Some(pending) = &slot.in_flight {
            CacheMetrics::incr(&self.metrics.coalesced_waits);
            return Plan::Await(pending.clone());
        }

        tracing::debug!(key = %key, "Cold key, computing");
        let pending = self.start(key, args);
        slot.in_flight = Some(pending.clone());
        tokio::spawn(pending.clone().map(drop));
        Plan::Await(pending)
    }

    /// Build the single shared computation for `key`.
    ///
    /// Nothing runs until the returned future is first polled, which happens
    /// in a spawned task after the slot lock is released. A panic in the
    /// computation resolves the future with an error, so `complete` always
    /// clears the in-flight marker.
    fn start(self: &Arc<Self>, key: CacheKey, args: A) -> Pending<T> {
        let inner = Arc::clone(self);
        async move {
            let outcome = compute_caught(inner.computation.as_ref(), args).await;
            inner.complete(&key, outcome)
        }
        .boxed()
        .shared()
    }

    fn complete(
        &self,
        key: &CacheKey,
        outcome: Result<T, ComputationError>,
    ) -> CacheResult<Arc<CacheRecord<T>>> {
        let mut slots = self.lock_slots();
        let slot = slots.entry(key.clone()).or_default();
        slot.in_flight = None;

        // A failure leaves the previous record (and its timestamp) in place.
        let value = outcome?;
        let record = Arc::new(CacheRecord::new(self.clock.now(), value));
        slot.record = Some(Arc::clone(&record));
        Ok(record)
    }

    fn spawn_renewal(&self, key: CacheKey, pending: Pending<T>) {
        let metrics = Arc::clone(&self.metrics);
        tokio::spawn(async move {
            match pending.await {
                Ok(_) => {
                    CacheMetrics::incr(&metrics.renewals_succeeded);
                    tracing::debug!(key = %key, "Background renewal completed");
                }
                Err(e) => {
                    CacheMetrics::incr(&metrics.renewals_failed);
                    tracing::warn!(key = %key, error = %e, "Background renewal failed, keeping previous value");
                }
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use lazycache_core::{CacheError, CodecError, ComputationPanic, FnKeyCodec};
    use lazycache_test_utils::{wait_until, CallCounter, Gate, ManualClock};

    const WAIT: Duration = Duration::from_secs(2);

    /// f returns 1, 2, 3, ... on successive invocations.
    fn counting(calls: &CallCounter) -> impl Computation<(), u64> {
        let calls = calls.clone();
        move |_: ()| {
            let calls = calls.clone();
            async move { Ok::<_, String>(calls.next()) }
        }
    }

    fn options(clock: &Arc<ManualClock>) -> WrapOptions<()> {
        WrapOptions::json().clock(Arc::clone(clock) as Arc<dyn CacheClock>)
    }

    #[tokio::test]
    async fn test_stale_while_revalidate_timeline() {
        let clock = Arc::new(ManualClock::at_epoch());
        let calls = CallCounter::new();
        let cache = MemoryCache::new(
            "timeline",
            counting(&calls),
            Duration::from_millis(1000),
            options(&clock),
        );

        assert_eq!(cache.call(()).await.expect("cold call should succeed"), 1);

        clock.advance_millis(100);
        assert_eq!(cache.call(()).await.unwrap(), 1);
        assert_eq!(calls.count(), 1, "fresh read must not invoke f");

        clock.advance_millis(1000);
        assert_eq!(cache.call(()).await.unwrap(), 1, "stale value served");
        let renewed = wait_until(
            || cache.peek(&()).unwrap().is_some_and(|r| r.value == 2),
            WAIT,
        )
        .await;
        assert!(renewed, "background renewal should replace the record");

        clock.advance_millis(100);
        assert_eq!(cache.call(()).await.unwrap(), 2);
        assert_eq!(calls.count(), 2);

        let metrics = cache.metrics();
        assert_eq!(metrics.cold_loads, 1);
        assert_eq!(metrics.fresh_hits, 2);
        assert_eq!(metrics.stale_hits, 1);
        assert_eq!(metrics.renewals_succeeded, 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_callers_share_one_computation() {
        let gate = Arc::new(Gate::new());
        let calls = CallCounter::new();
        let f = {
            let gate = Arc::clone(&gate);
            let calls = calls.clone();
            move |_: ()| {
                let gate = Arc::clone(&gate);
                let calls = calls.clone();
                async move {
                    calls.next();
                    gate.wait().await;
                    Ok::<_, String>(42u32)
                }
            }
        };
        let cache = MemoryCache::new("cold", f, Duration::from_secs(60), WrapOptions::json());

        let callers = join_all((0..5).map(|_| cache.call(())));
        let opener = async {
            assert!(wait_until(|| calls.count() == 1, WAIT).await);
            gate.open();
        };
        let (results, ()) = tokio::join!(callers, opener);

        for result in results {
            assert_eq!(result.expect("every caller gets the value"), 42);
        }
        assert_eq!(calls.count(), 1);
        assert_eq!(cache.metrics().coalesced_waits, 4);
        assert!(!cache.is_computing(&()).unwrap());
    }

    #[tokio::test]
    async fn test_stale_read_does_not_wait_for_renewal() {
        let clock = Arc::new(ManualClock::at_epoch());
        let gate = Arc::new(Gate::new());
        let calls = CallCounter::new();
        let f = {
            let gate = Arc::clone(&gate);
            let calls = calls.clone();
            move |_: ()| {
                let gate = Arc::clone(&gate);
                let n = calls.next();
                async move {
                    if n > 1 {
                        gate.wait().await;
                    }
                    Ok::<_, String>(n)
                }
            }
        };
        let cache = MemoryCache::new("slow", f, Duration::from_secs(1), options(&clock));
        assert_eq!(cache.call(()).await.unwrap(), 1);

        clock.advance(Duration::from_secs(5));
        let served = tokio::time::timeout(Duration::from_millis(500), cache.call(()))
            .await
            .expect("stale read must not block on the renewal");
        assert_eq!(served.unwrap(), 1);

        // Renewal still blocked: further stale reads neither wait nor start another.
        assert_eq!(cache.call(()).await.unwrap(), 1);
        assert!(cache.is_computing(&()).unwrap());
        assert_eq!(cache.metrics().renewals_started, 1);

        gate.open();
        assert!(wait_until(|| !cache.is_computing(&()).unwrap(), WAIT).await);
        assert_eq!(calls.count(), 2);
        assert_eq!(cache.peek(&()).unwrap().map(|r| r.value), Some(2));
    }

    #[tokio::test]
    async fn test_failed_renewal_keeps_record_and_retries() {
        let clock = Arc::new(ManualClock::at_epoch());
        let calls = CallCounter::new();
        let f = {
            let calls = calls.clone();
            move |_: ()| {
                let n = calls.next();
                async move {
                    if n == 2 {
                        Err("transient upstream failure".to_string())
                    } else {
                        Ok(n)
                    }
                }
            }
        };
        let cache = MemoryCache::new("heal", f, Duration::from_secs(1), options(&clock));
        assert_eq!(cache.call(()).await.unwrap(), 1);
        let first = cache.peek(&()).unwrap().expect("record after cold call");

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.call(()).await.unwrap(), 1);
        assert!(wait_until(|| cache.metrics().renewals_failed == 1, WAIT).await);

        let kept = cache.peek(&()).unwrap().expect("record survives failure");
        assert_eq!(kept.computed_at, first.computed_at);
        assert_eq!(kept.value, 1);

        assert_eq!(cache.call(()).await.unwrap(), 1, "still stale, retry starts");
        assert!(
            wait_until(
                || cache.peek(&()).unwrap().is_some_and(|r| r.value == 3),
                WAIT
            )
            .await
        );
        assert_eq!(cache.metrics().renewals_succeeded, 1);
    }

    #[tokio::test]
    async fn test_cold_failure_reaches_every_waiter() {
        let gate = Arc::new(Gate::new());
        let calls = CallCounter::new();
        let f = {
            let gate = Arc::clone(&gate);
            let calls = calls.clone();
            move |_: ()| {
                let gate = Arc::clone(&gate);
                calls.next();
                async move {
                    gate.wait().await;
                    Err::<u32, _>("boom")
                }
            }
        };
        let cache = MemoryCache::new("fail", f, Duration::from_secs(60), WrapOptions::json());

        let callers = join_all((0..3).map(|_| cache.call(())));
        let opener = async {
            assert!(wait_until(|| calls.count() == 1, WAIT).await);
            gate.open();
        };
        let (results, ()) = tokio::join!(callers, opener);

        for result in results {
            let err = result.unwrap_err();
            assert!(err.is_computation());
            assert_eq!(err.to_string(), "Computation failed: boom");
        }
        assert!(cache.peek(&()).unwrap().is_none(), "failure writes no record");
        assert!(!cache.is_computing(&()).unwrap());

        // Nothing is cached, so the next call tries again.
        let _ = cache.call(()).await;
        assert_eq!(calls.count(), 2);
    }

    #[tokio::test]
    async fn test_arguments_select_independent_records() {
        let calls = CallCounter::new();
        let f = {
            let calls = calls.clone();
            move |(a, b): (u32, u32)| {
                calls.next();
                async move { Ok::<_, String>(a * 10 + b) }
            }
        };
        let cache = MemoryCache::new("pairs", f, Duration::from_secs(60), WrapOptions::json());

        assert_eq!(cache.call((1, 2)).await.unwrap(), 12);
        assert_eq!(cache.call((2, 1)).await.unwrap(), 21);
        assert_eq!(cache.call((1, 2)).await.unwrap(), 12);
        assert_eq!(calls.count(), 2);
    }

    #[tokio::test]
    async fn test_custom_key_codec_groups_arguments() {
        let calls = CallCounter::new();
        let f = {
            let calls = calls.clone();
            move |name: String| {
                calls.next();
                async move { Ok::<_, String>(name.len()) }
            }
        };
        let codec = FnKeyCodec(|name: &String| name.to_lowercase());
        let cache = MemoryCache::new("names", f, Duration::from_secs(60), WrapOptions::new(codec));

        assert_eq!(cache.call("Alice".to_string()).await.unwrap(), 5);
        assert_eq!(cache.call("ALICE".to_string()).await.unwrap(), 5);
        assert_eq!(calls.count(), 1);
    }

    struct RefuseCodec;

    impl KeyCodec<()> for RefuseCodec {
        fn encode(&self, _: &()) -> Result<String, CodecError> {
            Err(CodecError::KeyEncoding {
                reason: "unencodable".to_string(),
            })
        }
    }

    #[tokio::test]
    async fn test_key_encoding_failure_is_reported() {
        let calls = CallCounter::new();
        let f = {
            let calls = calls.clone();
            move |_: ()| {
                calls.next();
                async { Ok::<_, String>(1u8) }
            }
        };
        let cache = MemoryCache::new(
            "refuse",
            f,
            Duration::from_secs(1),
            WrapOptions::new(RefuseCodec),
        );

        let err = cache.call(()).await.unwrap_err();
        assert!(matches!(err, CacheError::Codec(_)));
        assert_eq!(calls.count(), 0);
    }

    /// f panics on invocation `bad`, returns its ordinal otherwise.
    fn panicking_on(calls: &CallCounter, bad: u64) -> impl Computation<(), u64> {
        let calls = calls.clone();
        move |_: ()| {
            let n = calls.next();
            async move {
                if n == bad {
                    panic!("invocation {n} blew up");
                }
                Ok::<_, String>(n)
            }
        }
    }

    #[tokio::test]
    async fn test_cold_panic_is_reported_and_key_recovers() {
        let calls = CallCounter::new();
        let cache = MemoryCache::new(
            "panicky",
            panicking_on(&calls, 1),
            Duration::from_secs(60),
            WrapOptions::json(),
        );

        let err = cache.call(()).await.unwrap_err();
        let CacheError::Computation(inner) = &err else {
            panic!("expected a computation error, got {err:?}");
        };
        let panic = inner
            .downcast_ref::<ComputationPanic>()
            .expect("panic should surface as ComputationPanic");
        assert_eq!(panic.message, "invocation 1 blew up");
        assert!(!cache.is_computing(&()).unwrap());
        assert!(cache.peek(&()).unwrap().is_none());

        assert_eq!(cache.call(()).await.expect("retry should succeed"), 2);
        assert_eq!(calls.count(), 2);
    }

    #[tokio::test]
    async fn test_panicking_renewal_keeps_record_and_retries() {
        let clock = Arc::new(ManualClock::at_epoch());
        let calls = CallCounter::new();
        let cache = MemoryCache::new(
            "panicky",
            panicking_on(&calls, 2),
            Duration::from_secs(1),
            options(&clock),
        );
        assert_eq!(cache.call(()).await.unwrap(), 1);

        clock.advance(Duration::from_secs(2));
        assert_eq!(cache.call(()).await.unwrap(), 1);
        assert!(wait_until(|| cache.metrics().renewals_failed == 1, WAIT).await);
        assert!(!cache.is_computing(&()).unwrap());
        assert_eq!(cache.peek(&()).unwrap().map(|r| r.value), Some(1));

        assert_eq!(cache.call(()).await.unwrap(), 1, "stale read starts a new renewal");
        assert!(
            wait_until(
                || cache.peek(&()).unwrap().is_some_and(|r| r.value == 3),
                WAIT
            )
            .await
        );
        assert_eq!(calls.count(), 3);
    }
}
