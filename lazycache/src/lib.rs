//! LAZYCACHE - Stale-While-Revalidate Wrapping for Expensive Async Functions
//!
//! Wrap an async function once and call the wrapper instead. The first call
//! for a set of arguments computes and stores the result; later calls get the
//! stored result immediately, even after it has gone stale. A stale read
//! triggers a background renewal instead of making the caller wait.
//!
//! Two backends:
//! - [`MemoryCache`]: per-process, coalesces concurrent callers onto one
//!   computation per key.
//! - [`DistributedCache`]: records live in a shared [`KeyValueStore`] and
//!   renewals are serialized across processes by a lease [`LockService`].
//!
//! [`LazyCache`] picks one of them from configuration.
//!
//! ```ignore
//! let cache = LazyCache::open(LazyCacheConfig::from_env()?)?;
//! let report = cache.wrap("report", build_report, Duration::from_secs(60));
//! let value = report.call(ReportArgs { team: 7 }).await?;
//! ```
//!
//! All calls must run inside a Tokio runtime: renewals are spawned tasks.

pub mod distributed;
pub mod facade;
pub mod memory;
pub mod metrics;
pub mod options;

pub use distributed::{DistributedCache, SharedStore};
pub use facade::{Backend, LazyCache, LazyFn};
pub use memory::MemoryCache;
pub use metrics::{CacheMetrics, CacheMetricsSnapshot};
pub use options::WrapOptions;

// Re-export the types callers need to configure and implement backends.
pub use lazycache_core::{
    BackendKind, CacheClock, CacheError, CacheKey, CacheRecord, CacheResult, CodecError,
    ColdStartPolicy, Computation, ComputationError, ConfigError, FnKeyCodec, JsonKeyCodec,
    KeyCodec, LazyCacheConfig, Lease, LockError, StoreError, SystemClock, Timestamp,
};
pub use lazycache_storage::{
    InMemoryLockService, InMemoryStore, KeyValueStore, LmdbEnv, LmdbLockService, LmdbStore,
    LockService,
};
