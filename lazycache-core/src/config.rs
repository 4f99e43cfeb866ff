//! Configuration types

use crate::constants::*;
use crate::error::{CacheError, CacheResult, ConfigError};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Where cache records live.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BackendKind {
    /// Per-process memory; nothing shared between processes.
    Memory,
    /// LMDB environment shared by every process on the host.
    Lmdb { path: PathBuf, max_size_mb: usize },
}

/// What a distributed cache does on a cold key once it holds the lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ColdStartPolicy {
    /// Compute immediately. Two processes racing a cold key may both compute;
    /// only their store writes are serialized (last writer wins).
    #[default]
    Unguarded,
    /// Re-read the store after taking the lock and reuse a fresh record
    /// written by whoever held the lock before.
    RecheckUnderLock,
}

impl FromStr for ColdStartPolicy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "unguarded" => Ok(Self::Unguarded),
            "recheck" | "recheck_under_lock" => Ok(Self::RecheckUnderLock),
            _ => Err(ConfigError::InvalidValue {
                field: ENV_COLD_START.to_string(),
                value: s.to_string(),
                reason: "expected 'unguarded' or 'recheck'".to_string(),
            }),
        }
    }
}

/// Master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LazyCacheConfig {
    pub backend: BackendKind,
    /// Prefix for store keys and lock names.
    pub key_prefix: String,
    /// Lease granted to the renewal lock.
    pub lock_lease: Duration,
    /// Upper bound on waiting for the renewal lock.
    pub lock_acquire_timeout: Duration,
    /// Poll interval for lock services without push wake-ups.
    pub lock_poll_interval: Duration,
    pub cold_start: ColdStartPolicy,
}

impl Default for LazyCacheConfig {
    fn default() -> Self {
        Self {
            backend: BackendKind::Memory,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            lock_lease: Duration::from_secs(DEFAULT_LOCK_LEASE_SECS),
            lock_acquire_timeout: Duration::from_secs(DEFAULT_LOCK_ACQUIRE_TIMEOUT_SECS),
            lock_poll_interval: Duration::from_millis(DEFAULT_LOCK_POLL_INTERVAL_MS),
            cold_start: ColdStartPolicy::Unguarded,
        }
    }
}

impl LazyCacheConfig {
    /// Memory backend with default lock settings.
    pub fn memory() -> Self {
        Self::default()
    }

    /// LMDB backend at `path` with default lock settings.
    pub fn lmdb(path: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendKind::Lmdb {
                path: path.into(),
                max_size_mb: DEFAULT_LMDB_MAX_SIZE_MB,
            },
            ..Self::default()
        }
    }

    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    pub fn with_lock_lease(mut self, lease: Duration) -> Self {
        self.lock_lease = lease;
        self
    }

    pub fn with_lock_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.lock_acquire_timeout = timeout;
        self
    }

    pub fn with_lock_poll_interval(mut self, interval: Duration) -> Self {
        self.lock_poll_interval = interval;
        self
    }

    pub fn with_cold_start(mut self, policy: ColdStartPolicy) -> Self {
        self.cold_start = policy;
        self
    }

    /// Create LazyCacheConfig from environment variables.
    ///
    /// # Environment Variables
    /// - `LAZYCACHE_BACKEND`: `memory` or `lmdb` (default: memory)
    /// - `LAZYCACHE_LMDB_PATH`: LMDB directory, required when backend is `lmdb`
    /// - `LAZYCACHE_LMDB_MAX_SIZE_MB`: LMDB map size (default: 256)
    /// - `LAZYCACHE_KEY_PREFIX`: Store key prefix (default: `lazycache:`)
    /// - `LAZYCACHE_LOCK_LEASE_SECS`: Renewal lock lease (default: 180)
    /// - `LAZYCACHE_LOCK_ACQUIRE_TIMEOUT_SECS`: Lock wait bound (default: 30)
    /// - `LAZYCACHE_LOCK_POLL_INTERVAL_MS`: Lock poll interval (default: 50)
    /// - `LAZYCACHE_COLD_START`: `unguarded` or `recheck` (default: unguarded)
    pub fn from_env() -> CacheResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable lookup.
    pub fn from_lookup<L>(lookup: L) -> CacheResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let backend = match lookup(ENV_BACKEND).as_deref().map(str::to_lowercase) {
            None => BackendKind::Memory,
            Some(kind) if kind == "memory" => BackendKind::Memory,
            Some(kind) if kind == "lmdb" => {
                let path = lookup(ENV_LMDB_PATH).ok_or_else(|| ConfigError::MissingRequired {
                    field: ENV_LMDB_PATH.to_string(),
                })?;
                let max_size_mb = parse_or(&lookup, ENV_LMDB_MAX_SIZE_MB, DEFAULT_LMDB_MAX_SIZE_MB)?;
                BackendKind::Lmdb {
                    path: PathBuf::from(path),
                    max_size_mb,
                }
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    field: ENV_BACKEND.to_string(),
                    value: other,
                    reason: "expected 'memory' or 'lmdb'".to_string(),
                }
                .into())
            }
        };

        let config = Self {
            backend,
            key_prefix: lookup(ENV_KEY_PREFIX).unwrap_or_else(|| DEFAULT_KEY_PREFIX.to_string()),
            lock_lease: Duration::from_secs(parse_or(
                &lookup,
                ENV_LOCK_LEASE_SECS,
                DEFAULT_LOCK_LEASE_SECS,
            )?),
            lock_acquire_timeout: Duration::from_secs(parse_or(
                &lookup,
                ENV_LOCK_ACQUIRE_TIMEOUT_SECS,
                DEFAULT_LOCK_ACQUIRE_TIMEOUT_SECS,
            )?),
            lock_poll_interval: Duration::from_millis(parse_or(
                &lookup,
                ENV_LOCK_POLL_INTERVAL_MS,
                DEFAULT_LOCK_POLL_INTERVAL_MS,
            )?),
            cold_start: match lookup(ENV_COLD_START) {
                Some(raw) => raw.parse()?,
                None => ColdStartPolicy::default(),
            },
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    ///
    /// Returns Ok(()) if valid, Err(CacheError::Config) if invalid.
    pub fn validate(&self) -> CacheResult<()> {
        if self.lock_lease.is_zero() {
            return Err(invalid("lock_lease", &self.lock_lease, "must be positive"));
        }
        if self.lock_acquire_timeout.is_zero() {
            return Err(invalid(
                "lock_acquire_timeout",
                &self.lock_acquire_timeout,
                "must be positive",
            ));
        }
        if self.lock_poll_interval.is_zero() {
            return Err(invalid(
                "lock_poll_interval",
                &self.lock_poll_interval,
                "must be positive",
            ));
        }
        if self.lock_poll_interval >= self.lock_acquire_timeout {
            return Err(invalid(
                "lock_poll_interval",
                &self.lock_poll_interval,
                "must be shorter than lock_acquire_timeout",
            ));
        }
        if let BackendKind::Lmdb { path, max_size_mb } = &self.backend {
            if path.as_os_str().is_empty() {
                return Err(invalid("backend.path", path, "must not be empty"));
            }
            if *max_size_mb == 0 {
                return Err(invalid("backend.max_size_mb", max_size_mb, "must be positive"));
            }
            if max_size_mb.checked_mul(1024 * 1024).is_none() {
                return Err(invalid(
                    "backend.max_size_mb",
                    max_size_mb,
                    "map size in bytes does not fit in usize",
                ));
            }
        }
        Ok(())
    }
}

fn invalid(field: &str, value: &dyn std::fmt::Debug, reason: &str) -> CacheError {
    CacheError::Config(ConfigError::InvalidValue {
        field: field.to_string(),
        value: format!("{value:?}"),
        reason: reason.to_string(),
    })
}

fn parse_or<L, V>(lookup: &L, name: &str, default: V) -> Result<V, ConfigError>
where
    L: Fn(&str) -> Option<String>,
    V: FromStr,
{
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
            field: name.to_string(),
            value: raw.clone(),
            reason: "not a valid number".to_string(),
        }),
    }
}
