//! Cached computation results.

use crate::clock::age_at;
use crate::error::CodecError;
use crate::Timestamp;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;

/// One computed value and the moment it was computed.
///
/// Records are never mutated: a renewal builds a new record and swaps it in.
/// In a shared store a record is encoded as self-describing JSON:
///
/// ```text
/// {"computed_at":"2024-01-01T00:00:00Z","value":<value>}
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRecord<T> {
    pub computed_at: Timestamp,
    pub value: T,
}

impl<T> CacheRecord<T> {
    pub fn new(computed_at: Timestamp, value: T) -> Self {
        Self { computed_at, value }
    }

    /// How old the record is at `now`.
    pub fn age(&self, now: Timestamp) -> Duration {
        age_at(self.computed_at, now)
    }

    /// A record is fresh while `now - computed_at <= stale_after`.
    pub fn is_fresh(&self, now: Timestamp, stale_after: Duration) -> bool {
        self.age(now) <= stale_after
    }

    pub fn is_stale(&self, now: Timestamp, stale_after: Duration) -> bool {
        !self.is_fresh(now, stale_after)
    }

    pub fn into_value(self) -> T {
        self.value
    }
}

impl<T: Serialize> CacheRecord<T> {
    /// Encode for a text key-value store.
    pub fn encode(&self) -> Result<String, CodecError> {
        serde_json::to_string(self).map_err(|e| CodecError::RecordEncoding {
            reason: e.to_string(),
        })
    }
}

impl<T: DeserializeOwned> CacheRecord<T> {
    /// Decode a payload previously produced by [`CacheRecord::encode`].
    pub fn decode(key: &str, raw: &str) -> Result<Self, CodecError> {
        serde_json::from_str(raw).map_err(|e| CodecError::RecordDecoding {
            key: key.to_string(),
            reason: e.to_string(),
        })
    }
}
