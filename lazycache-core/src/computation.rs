//! The wrapped computation seam.

use crate::error::{ComputationError, ComputationPanic};
use futures_util::future::{BoxFuture, FutureExt};
use std::error::Error as StdError;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// An expensive asynchronous function whose results are cached.
///
/// Implemented for every `Fn(A) -> impl Future<Output = Result<T, E>>` whose
/// error converts into a boxed error, so plain async closures can be wrapped
/// directly.
pub trait Computation<A, T>: Send + Sync + 'static {
    fn compute(&self, args: A) -> BoxFuture<'static, Result<T, ComputationError>>;
}

impl<A, T, E, F, Fut> Computation<A, T> for F
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: Into<Box<dyn StdError + Send + Sync>>,
{
    fn compute(&self, args: A) -> BoxFuture<'static, Result<T, ComputationError>> {
        (self)(args)
            .map(|result| result.map_err(ComputationError::new))
            .boxed()
    }
}

/// Run `computation` on `args`, reporting a panic as a [`ComputationError`].
///
/// Caches keep per-key bookkeeping around every computation; a panic that
/// escaped would skip its cleanup and wedge the key.
pub async fn compute_caught<A: 'static, T: 'static>(
    computation: &dyn Computation<A, T>,
    args: A,
) -> Result<T, ComputationError> {
    let attempt = AssertUnwindSafe(async move { computation.compute(args).await });
    match attempt.catch_unwind().await {
        Ok(outcome) => outcome,
        Err(payload) => Err(ComputationError::new(ComputationPanic::from_payload(
            payload.as_ref(),
        ))),
    }
}
