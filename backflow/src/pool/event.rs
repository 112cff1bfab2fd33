use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_stream::Stream;
use tokio_util::sync::ReusableBoxFuture;

/// <sup>[`serde`](https://serde.rs)</sup>
/// Pool state transitions.
///
/// Every acquire, release and eviction is reported to the limit strategy, to registered
/// [`StateChangeListener`]s and to every [`StateChangeStream`].
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PoolStateChange {
    /// A new physical connection was created.
    NewConnectionCreated,
    /// Creating a new physical connection failed.
    ConnectFailed,
    /// An idle connection was handed out.
    ConnectionReuse,
    /// A connection was closed and its permit returned.
    ConnectionEviction,
    /// Acquire started.
    AcquireAttempted,
    /// Acquire produced a connection.
    AcquireSucceeded,
    /// Acquire failed before a connect attempt was made.
    AcquireFailed,
    /// Release started.
    ReleaseAttempted,
    /// Release finished, either by parking or by discarding the connection.
    ReleaseSucceeded,
    /// Release was rejected.
    ReleaseFailed,
}

/// Synchronous observer of [`PoolStateChange`]s.
///
/// Called inline by the pool operation that caused the change, so implementations must be cheap
/// and must not block. Implemented for closures with matching signature.
pub trait StateChangeListener: Send + Sync {
    /// Handles a single state change.
    fn on_state_change(&self, change: PoolStateChange);
}

impl<F> StateChangeListener for F
where
    F: Fn(PoolStateChange) + Send + Sync,
{
    fn on_state_change(&self, change: PoolStateChange) {
        self(change)
    }
}

/// Stream of pool state changes.
///
/// Ends when the pool shuts down. A slow consumer that falls behind the broadcast capacity skips
/// the overwritten changes.
pub struct StateChangeStream {
    inner: ReusableBoxFuture<'static, (RecvResult, ChangeReceiver)>,
}

type RecvResult = core::result::Result<PoolStateChange, RecvError>;
type ChangeReceiver = broadcast::Receiver<PoolStateChange>;

impl StateChangeStream {
    pub(crate) fn new(rx: broadcast::Receiver<PoolStateChange>) -> Self {
        Self {
            inner: ReusableBoxFuture::new(make_future(rx)),
        }
    }

    pub(crate) fn closed() -> Self {
        let (_, rx) = broadcast::channel(1);
        Self::new(rx)
    }
}

async fn make_future(mut rx: ChangeReceiver) -> (RecvResult, ChangeReceiver) {
    let result = rx.recv().await;
    (result, rx)
}

impl Stream for StateChangeStream {
    type Item = PoolStateChange;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            let (result, rx) = ready!(self.inner.poll(cx));
            self.inner.set(make_future(rx));

            match result {
                Ok(change) => return Poll::Ready(Some(change)),
                Err(RecvError::Closed) => return Poll::Ready(None),
                Err(RecvError::Lagged(skipped)) => {
                    log::warn!("state change stream lagged behind, {skipped} changes skipped");
                }
            }
        }
    }
}

impl Debug for StateChangeStream {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateChangeStream").finish_non_exhaustive()
    }
}
