//! Error types for lazycache operations

use std::any::Any;
use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Failure raised by the wrapped computation.
///
/// The original error is kept behind an `Arc` so one failure can be handed to
/// every caller waiting on the same in-flight computation.
#[derive(Clone)]
pub struct ComputationError {
    inner: Arc<dyn StdError + Send + Sync>,
}

impl ComputationError {
    /// Wrap any error (or message) produced by the wrapped computation.
    pub fn new(error: impl Into<Box<dyn StdError + Send + Sync>>) -> Self {
        Self {
            inner: Arc::from(error.into()),
        }
    }

    /// Borrow the original error as a concrete type, if it is one.
    pub fn downcast_ref<E: StdError + 'static>(&self) -> Option<&E> {
        self.inner.downcast_ref::<E>()
    }

    /// Borrow the original error.
    pub fn inner(&self) -> &(dyn StdError + Send + Sync + 'static) {
        self.inner.as_ref()
    }
}

/// The wrapped computation panicked instead of returning.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("computation panicked: {message}")]
pub struct ComputationPanic {
    pub message: String,
}

impl ComputationPanic {
    /// Recover the panic message from an unwind payload.
    pub fn from_payload(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "non-string panic payload".to_string());
        Self { message }
    }
}

impl fmt::Debug for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComputationError").field(&self.inner).finish()
    }
}

impl fmt::Display for ComputationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.inner)
    }
}

impl StdError for ComputationError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner.source()
    }
}

/// Key-value store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Read failed for key {key}: {reason}")]
    ReadFailed { key: String, reason: String },

    #[error("Write failed for key {key}: {reason}")]
    WriteFailed { key: String, reason: String },

    #[error("Store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Distributed lock errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    #[error("Timed out after {waited:?} waiting for lock {name}")]
    AcquireTimeout { name: String, waited: Duration },

    #[error("Lock acquisition failed for {name}: {reason}")]
    AcquireFailed { name: String, reason: String },

    #[error("Lock release failed for {name}: {reason}")]
    ReleaseFailed { name: String, reason: String },

    #[error("Lease on {name} was lost before release")]
    LeaseLost { name: String },
}

/// Key and record encoding errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CodecError {
    #[error("Could not encode cache key: {reason}")]
    KeyEncoding { reason: String },

    #[error("Could not encode cache record: {reason}")]
    RecordEncoding { reason: String },

    #[error("Could not decode cache record for {key}: {reason}")]
    RecordDecoding { key: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingRequired { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all lazycache errors.
#[derive(Debug, Clone, Error)]
pub enum CacheError {
    #[error("Computation failed: {0}")]
    Computation(#[from] ComputationError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl CacheError {
    /// Returns true if the wrapped computation itself failed.
    pub fn is_computation(&self) -> bool {
        matches!(self, Self::Computation(_))
    }
}

/// Result type alias for lazycache operations.
pub type CacheResult<T> = Result<T, CacheError>;

// =============================================================================
// TESTS
// =============================================================================
