//! Per-wrap wiring shared by both backends.

use std::sync::Arc;

use lazycache_core::{CacheClock, JsonKeyCodec, KeyCodec, SystemClock};
use serde::Serialize;

use crate::metrics::CacheMetrics;

/// How a wrapped function derives keys, reads time, and reports activity.
pub struct WrapOptions<A> {
    pub codec: Arc<dyn KeyCodec<A>>,
    pub clock: Arc<dyn CacheClock>,
    pub metrics: Arc<CacheMetrics>,
}

impl<A> WrapOptions<A> {
    /// Use `codec` for keys, the system clock, and private metrics.
    pub fn new(codec: impl KeyCodec<A> + 'static) -> Self {
        Self {
            codec: Arc::new(codec),
            clock: Arc::new(SystemClock),
            metrics: Arc::new(CacheMetrics::new()),
        }
    }

    /// JSON-encoded argument keys.
    pub fn json() -> Self
    where
        A: Serialize,
    {
        Self::new(JsonKeyCodec)
    }

    pub fn clock(mut self, clock: Arc<dyn CacheClock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn metrics(mut self, metrics: Arc<CacheMetrics>) -> Self {
        self.metrics = metrics;
        self
    }
}

impl<A> Clone for WrapOptions<A> {
    fn clone(&self) -> Self {
        Self {
            codec: Arc::clone(&self.codec),
            clock: Arc::clone(&self.clock),
            metrics: Arc::clone(&self.metrics),
        }
    }
}
