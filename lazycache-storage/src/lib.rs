//! LAZYCACHE Storage - Shared Store and Lock Clients
//!
//! Defines the key-value store and lease lock abstractions a distributed
//! cache coordinates through, plus two implementations of each:
//!
//! - In-memory, for single-process deployments and tests
//! - LMDB, shared by every process that opens the same environment directory

pub mod backends;
pub mod traits;

pub use backends::lmdb::{LmdbEnv, LmdbLockService, LmdbStore};
pub use backends::memory::{InMemoryLockService, InMemoryStore};
pub use traits::{KeyValueStore, LockService};
