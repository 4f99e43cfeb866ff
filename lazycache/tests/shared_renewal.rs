//! Several cache instances ("processes") sharing one store and lock.

use std::sync::Arc;
use std::time::Duration;

use lazycache::{
    CacheClock, CacheMetrics, DistributedCache, LazyCacheConfig, SharedStore, WrapOptions,
};
use lazycache_test_utils::{
    init_tracing, wait_until, CallCounter, Event, EventLog, Gate, InMemoryLockService,
    InMemoryStore, InstrumentedLockService, ManualClock, RecordingStore,
};

const LOCK: &str = "lazycache:lock:inventory:null";
const KEY: &str = "lazycache:inventory:null";

struct World {
    clock: Arc<ManualClock>,
    log: EventLog,
    shared: SharedStore,
    metrics: Arc<CacheMetrics>,
}

fn world() -> World {
    let log = EventLog::new();
    World {
        clock: Arc::new(ManualClock::at_epoch()),
        shared: SharedStore::new(
            RecordingStore::new(InMemoryStore::new(), log.clone()),
            InstrumentedLockService::new(InMemoryLockService::default(), log.clone()),
        ),
        log,
        metrics: Arc::new(CacheMetrics::new()),
    }
}

impl World {
    fn process<C>(&self, f: C) -> DistributedCache<(), u64>
    where
        C: lazycache::Computation<(), u64>,
    {
        let options = WrapOptions::json()
            .clock(Arc::clone(&self.clock) as Arc<dyn CacheClock>)
            .metrics(Arc::clone(&self.metrics));
        DistributedCache::new(
            "inventory",
            f,
            Duration::from_secs(1),
            self.shared.clone(),
            &LazyCacheConfig::default(),
            options,
        )
    }
}

/// f returns 1, 2, 3, ...; every call after the first waits for `gate`.
fn gated(calls: &CallCounter, gate: &Arc<Gate>) -> impl lazycache::Computation<(), u64> {
    let calls = calls.clone();
    let gate = Arc::clone(gate);
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
}

#[tokio::test]
async fn test_renewals_from_two_processes_never_overlap() {
    init_tracing();
    let world = world();
    let calls = CallCounter::new();
    let gate = Arc::new(Gate::new());
    let a = world.process(gated(&calls, &gate));
    let b = world.process(gated(&calls, &gate));

    assert_eq!(a.call(()).await.expect("cold call should succeed"), 1);
    assert_eq!(b.call(()).await.expect("b reads a's record"), 1);
    let cold_events = world.log.events().len();
    assert_eq!(cold_events, 3);

    world.clock.advance(Duration::from_secs(5));
    assert_eq!(a.call(()).await.unwrap(), 1);
    assert_eq!(b.call(()).await.unwrap(), 1);

    // One renewal is computing under the lock; the other is parked on it.
    assert!(wait_until(|| calls.count() == 2, Duration::from_secs(2)).await);
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(calls.count(), 2, "second renewal must wait for the lock");

    gate.open();
    let metrics = &world.metrics;
    assert!(
        wait_until(
            || metrics.snapshot().renewals_succeeded == 2,
            Duration::from_secs(2)
        )
        .await
    );

    let renewals = world.log.events()[cold_events..].to_vec();
    let one = [
        Event::Acquired(LOCK.to_string()),
        Event::Write(KEY.to_string()),
        Event::Released(LOCK.to_string()),
    ];
    assert_eq!(renewals, [one.clone(), one].concat());

    assert_eq!(calls.count(), 3);
    let record = a.peek(&()).await.unwrap().expect("record present");
    assert_eq!(record.value, 3, "last writer wins");
}

#[tokio::test]
async fn test_fresh_record_written_by_one_process_is_served_to_another() {
    let world = world();
    let calls = CallCounter::new();
    let gate = Arc::new(Gate::new());
    let a = world.process(gated(&calls, &gate));
    let b = world.process(gated(&calls, &gate));

    assert_eq!(a.call(()).await.unwrap(), 1);
    world.clock.advance_millis(500);
    assert_eq!(b.call(()).await.unwrap(), 1);

    assert_eq!(calls.count(), 1);
    assert_eq!(world.log.writes(), 1);
    let snapshot = world.metrics.snapshot();
    assert_eq!(snapshot.cold_loads, 1);
    assert_eq!(snapshot.fresh_hits, 1);
}
