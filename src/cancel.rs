//! Cancellation-aware futures.
//!
//! Every suspension point of a capture attempt (config fetch, position fix,
//! store append) is raced against the attempt's `CancellationToken`.

use async_trait::async_trait;
use std::future::Future;
use tokio_util::sync::CancellationToken;

/// Returned when a future lost the race against its cancellation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;

/// Extension trait for making futures cancellable.
#[async_trait]
pub trait OrCancelExt: Sized {
    type Output;

    /// Race this future against the token. Cancellation wins ties.
    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Cancelled>;
}

#[async_trait]
impl<F> OrCancelExt for F
where
    F: Future + Send,
    F::Output: Send,
{
    type Output = F::Output;

    async fn or_cancel(self, token: &CancellationToken) -> Result<Self::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = token.cancelled() => Err(Cancelled),
            res = self => Ok(res),
        }
    }
}
