//! Cache key derivation.
//!
//! A [`CacheKey`] is the namespace followed by a canonical encoding of the call
//! arguments. The encoding is pluggable through [`KeyCodec`] so callers can pin
//! argument order and types explicitly instead of relying on whatever a generic
//! serializer happens to emit.

use crate::error::CodecError;
use serde::Serialize;
use std::fmt;

/// Canonical encoding of call arguments.
///
/// # Implementation Requirements
///
/// - Equal argument values must always encode to the same string
/// - Argument order is significant: `(1, 2)` and `(2, 1)` must differ
pub trait KeyCodec<A: ?Sized>: Send + Sync {
    fn encode(&self, args: &A) -> Result<String, CodecError>;
}

/// Default codec: compact JSON via `serde_json`.
///
/// Canonical for a fixed Rust type (struct fields in declaration order, tuple
/// elements by position). Arguments containing maps must use an ordered map
/// such as `BTreeMap`; `HashMap` iteration order is not stable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonKeyCodec;

impl<A: Serialize + ?Sized> KeyCodec<A> for JsonKeyCodec {
    fn encode(&self, args: &A) -> Result<String, CodecError> {
        serde_json::to_string(args).map_err(|e| CodecError::KeyEncoding {
            reason: e.to_string(),
        })
    }
}

/// Codec backed by a caller-supplied key function.
#[derive(Clone, Copy)]
pub struct FnKeyCodec<F>(pub F);

impl<A: ?Sized, F> KeyCodec<A> for FnKeyCodec<F>
where
    F: Fn(&A) -> String + Send + Sync,
{
    fn encode(&self, args: &A) -> Result<String, CodecError> {
        Ok((self.0)(args))
    }
}

/// Namespaced key identifying one argument tuple of one wrapped function.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for `args` under `namespace`.
    pub fn derive<A: ?Sized>(
        namespace: &str,
        codec: &dyn KeyCodec<A>,
        args: &A,
    ) -> Result<Self, CodecError> {
        let encoded = codec.encode(args)?;
        Ok(Self(format!("{namespace}:{encoded}")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the record lives in a shared store.
    pub fn store_key(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.0)
    }

    /// Name of the renewal lock guarding this key.
    pub fn lock_name(&self, prefix: &str) -> String {
        format!("{prefix}lock:{}", self.0)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
