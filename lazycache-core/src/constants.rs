//! Default values and environment variable names.

/// Prefix applied to every store key and lock name.
pub const DEFAULT_KEY_PREFIX: &str = "lazycache:";

/// Lease granted to a renewal lock (3 minutes).
pub const DEFAULT_LOCK_LEASE_SECS: u64 = 180;

/// How long a renewal waits for a lock before giving up.
pub const DEFAULT_LOCK_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Poll interval for lock services that cannot push wake-ups.
pub const DEFAULT_LOCK_POLL_INTERVAL_MS: u64 = 50;

/// Default LMDB map size in megabytes.
pub const DEFAULT_LMDB_MAX_SIZE_MB: usize = 256;

// ============================================================================
// ENVIRONMENT VARIABLES
// ============================================================================

pub const ENV_BACKEND: &str = "LAZYCACHE_BACKEND";
pub const ENV_LMDB_PATH: &str = "LAZYCACHE_LMDB_PATH";
pub const ENV_LMDB_MAX_SIZE_MB: &str = "LAZYCACHE_LMDB_MAX_SIZE_MB";
pub const ENV_KEY_PREFIX: &str = "LAZYCACHE_KEY_PREFIX";
pub const ENV_LOCK_LEASE_SECS: &str = "LAZYCACHE_LOCK_LEASE_SECS";
pub const ENV_LOCK_ACQUIRE_TIMEOUT_SECS: &str = "LAZYCACHE_LOCK_ACQUIRE_TIMEOUT_SECS";
pub const ENV_LOCK_POLL_INTERVAL_MS: &str = "LAZYCACHE_LOCK_POLL_INTERVAL_MS";
pub const ENV_COLD_START: &str = "LAZYCACHE_COLD_START";
