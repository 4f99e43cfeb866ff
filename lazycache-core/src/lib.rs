//! LAZYCACHE Core - Shared Types
//!
//! Data types, key derivation and the error taxonomy used by every other
//! lazycache crate. Nothing in here performs I/O.

use chrono::{DateTime, Utc};
use uuid::Uuid;

pub mod clock;
pub mod computation;
pub mod config;
pub mod constants;
pub mod error;
pub mod key;
pub mod lease;
pub mod record;

// ============================================================================
// IDENTITY TYPES
// ============================================================================

/// Timestamp type using UTC timezone.
pub type Timestamp = DateTime<Utc>;

/// Lease token identifier using UUIDv7 for timestamp-sortable IDs.
pub type LeaseToken = Uuid;

/// Generate a new UUIDv7 lease token.
pub fn new_lease_token() -> LeaseToken {
    Uuid::now_v7()
}

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use clock::{CacheClock, SystemClock};
pub use computation::{compute_caught, Computation};
pub use config::{BackendKind, ColdStartPolicy, LazyCacheConfig};
pub use error::{
    CacheError, CacheResult, CodecError, ComputationError, ComputationPanic, ConfigError, LockError,
    StoreError,
};
pub use key::{CacheKey, FnKeyCodec, JsonKeyCodec, KeyCodec};
pub use lease::Lease;
pub use record::CacheRecord;
