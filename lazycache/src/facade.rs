//! Backend selection.
//!
//! A [`LazyCache`] fixes its backend when it is built. Every function wrapped
//! through it uses that backend for its whole life, so a key never moves
//! between the per-process and the shared cache.

use std::sync::Arc;
use std::time::Duration;

use lazycache_core::{
    BackendKind, CacheClock, CacheResult, Computation, JsonKeyCodec, KeyCodec, LazyCacheConfig,
    SystemClock,
};
use lazycache_storage::{LmdbEnv, LmdbLockService, LmdbStore};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::distributed::{DistributedCache, SharedStore};
use crate::memory::MemoryCache;
use crate::metrics::{CacheMetrics, CacheMetricsSnapshot};
use crate::options::WrapOptions;

/// Where wrapped functions keep their records.
#[derive(Clone)]
pub enum Backend {
    /// Per-process memory.
    Local,
    /// A store and lock shared between processes.
    Distributed(SharedStore),
}

impl Backend {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Distributed(_) => "distributed",
        }
    }
}

/// Entry point: wraps async functions with the configured backend.
pub struct LazyCache {
    config: LazyCacheConfig,
    backend: Backend,
    clock: Arc<dyn CacheClock>,
    metrics: Arc<CacheMetrics>,
}

impl LazyCache {
    /// Build the backend described by `config`.
    ///
    /// `BackendKind::Lmdb` opens (or creates) the environment; every process
    /// opening the same path shares records and renewal locks.
    pub fn open(config: LazyCacheConfig) -> CacheResult<Self> {
        config.validate()?;
        let backend = match &config.backend {
            BackendKind::Memory => Backend::Local,
            BackendKind::Lmdb { path, max_size_mb } => {
                let lmdb = LmdbEnv::open(path, *max_size_mb)?;
                let locks = LmdbLockService::new(
                    lmdb.clone(),
                    config.lock_acquire_timeout,
                    config.lock_poll_interval,
                );
                Backend::Distributed(SharedStore::new(LmdbStore::new(lmdb), locks))
            }
        };
        tracing::info!(
            backend = backend.name(),
            key_prefix = %config.key_prefix,
            "Lazy cache opened"
        );
        Ok(Self::assemble(config, backend))
    }

    /// Use caller-supplied store and lock clients (or force [`Backend::Local`]).
    ///
    /// `config.backend` is ignored; the remaining settings still apply.
    pub fn with_backend(config: LazyCacheConfig, backend: Backend) -> CacheResult<Self> {
        config.validate()?;
        Ok(Self::assemble(config, backend))
    }

    /// Per-process cache with default settings.
    pub fn local() -> Self {
        Self::assemble(LazyCacheConfig::default(), Backend::Local)
    }

    fn assemble(config: LazyCacheConfig, backend: Backend) -> Self {
        Self {
            config,
            backend,
            clock: Arc::new(SystemClock),
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    /// Judge freshness (and stamp records) with `clock`.
    pub fn with_clock(mut self, clock: Arc<dyn CacheClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &LazyCacheConfig {
        &self.config
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    /// Counters summed over every function wrapped by this cache.
    pub fn metrics(&self) -> CacheMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Wrap `f` with keys derived from the JSON encoding of its arguments.
    pub fn wrap<A, T, C>(
        &self,
        namespace: impl Into<String>,
        f: C,
        stale_after: Duration,
    ) -> LazyFn<A, T>
    where
        A: Serialize + Send + 'static,
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        C: Computation<A, T>,
    {
        self.wrap_with_codec(namespace, JsonKeyCodec, f, stale_after)
    }

    /// Wrap `f` with keys derived by `codec`.
    pub fn wrap_with_codec<A, T, K, C>(
        &self,
        namespace: impl Into<String>,
        codec: K,
        f: C,
        stale_after: Duration,
    ) -> LazyFn<A, T>
    where
        A: Send + 'static,
        T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
        K: KeyCodec<A> + 'static,
        C: Computation<A, T>,
    {
        let options = WrapOptions::new(codec)
            .clock(Arc::clone(&self.clock))
            .metrics(Arc::clone(&self.metrics));

        match &self.backend {
            Backend::Local => LazyFn::Local(MemoryCache::new(namespace, f, stale_after, options)),
            Backend::Distributed(shared) => LazyFn::Distributed(DistributedCache::new(
                namespace,
                f,
                stale_after,
                shared.clone(),
                &self.config,
                options,
            )),
        }
    }
}

/// A wrapped function; call it with the same arguments as the original.
pub enum LazyFn<A, T> {
    Local(MemoryCache<A, T>),
    Distributed(DistributedCache<A, T>),
}

impl<A, T> Clone for LazyFn<A, T> {
    fn clone(&self) -> Self {
        match self {
            Self::Local(cache) => Self::Local(cache.clone()),
            Self::Distributed(cache) => Self::Distributed(cache.clone()),
        }
    }
}

impl<A, T> LazyFn<A, T>
where
    A: Send + 'static,
    T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    pub async fn call(&self, args: A) -> CacheResult<T> {
        match self {
            Self::Local(cache) => cache.call(args).await,
            Self::Distributed(cache) => cache.call(args).await,
        }
    }

    pub fn namespace(&self) -> &str {
        match self {
            Self::Local(cache) => cache.namespace(),
            Self::Distributed(cache) => cache.namespace(),
        }
    }

    pub fn is_distributed(&self) -> bool {
        matches!(self, Self::Distributed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lazycache_core::{CacheError, ConfigError};
    use lazycache_test_utils::{init_tracing, CallCounter, InMemoryLockService, InMemoryStore};
    use tempfile::TempDir;

    fn counting(calls: &CallCounter) -> impl Computation<u32, u64> {
        let calls = calls.clone();
        move |n: u32| {
            let calls = calls.clone();
            async move { Ok::<_, String>(u64::from(n) * 100 + calls.next()) }
        }
    }

    #[tokio::test]
    async fn test_local_backend_wraps_memory_cache() {
        let cache = LazyCache::local();
        let calls = CallCounter::new();
        let f = cache.wrap("local", counting(&calls), Duration::from_secs(60));
        assert!(!f.is_distributed());
        assert_eq!(f.namespace(), "local");

        assert_eq!(f.call(3).await.expect("call should succeed"), 301);
        assert_eq!(f.call(3).await.unwrap(), 301);
        assert_eq!(calls.count(), 1);

        let metrics = cache.metrics();
        assert_eq!(metrics.cold_loads, 1);
        assert_eq!(metrics.fresh_hits, 1);
    }

    #[tokio::test]
    async fn test_injected_shared_store_selects_distributed() {
        let store = Arc::new(InMemoryStore::new());
        let shared = SharedStore {
            store: Arc::clone(&store) as _,
            locks: Arc::new(InMemoryLockService::default()),
        };
        let config = LazyCacheConfig::default().with_key_prefix("app:");
        let cache = LazyCache::with_backend(config, Backend::Distributed(shared))
            .expect("valid config");
        let f = cache.wrap("dist", counting(&CallCounter::new()), Duration::from_secs(60));

        assert!(f.is_distributed());
        assert_eq!(f.call(7).await.unwrap(), 701);
        assert!(store.raw("app:dist:7").is_some());
    }

    #[tokio::test]
    async fn test_open_memory_config() {
        let cache = LazyCache::open(LazyCacheConfig::memory()).expect("open should succeed");
        assert_eq!(cache.backend().name(), "local");
    }

    #[tokio::test]
    async fn test_open_lmdb_config_shares_records_between_caches() {
        init_tracing();
        let temp_dir = TempDir::new().expect("TempDir creation should succeed");
        let config = LazyCacheConfig::lmdb(temp_dir.path());

        let cache = LazyCache::open(config).expect("open should succeed");
        assert_eq!(cache.backend().name(), "distributed");

        let calls = CallCounter::new();
        let first = cache.wrap("lmdb", counting(&calls), Duration::from_secs(60));
        let second = cache.wrap("lmdb", counting(&calls), Duration::from_secs(60));

        assert_eq!(first.call(1).await.unwrap(), 101);
        assert_eq!(second.call(1).await.unwrap(), 101, "read from the shared store");
        assert_eq!(calls.count(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let config = LazyCacheConfig::default().with_lock_lease(Duration::ZERO);
        let err = LazyCache::with_backend(config, Backend::Local)
            .err()
            .expect("zero lease should be rejected");
        assert!(matches!(err, CacheError::Config(ConfigError::InvalidValue { .. })));
    }

    #[tokio::test]
    async fn test_explicit_codec() {
        let cache = LazyCache::local();
        let calls = CallCounter::new();
        let f = cache.wrap_with_codec(
            "parity",
            lazycache_core::FnKeyCodec(|n: &u32| (n % 2).to_string()),
            counting(&calls),
            Duration::from_secs(60),
        );

        assert_eq!(f.call(2).await.unwrap(), 201);
        assert_eq!(f.call(4).await.unwrap(), 201, "same key as 2");
        assert_eq!(calls.count(), 1);
    }
}
