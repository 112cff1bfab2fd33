//! # Multiple producers / multiple consumers broadcast channel
//!
//! Thin wrapper over [`broadcast`] where receivers can be cloned. Used to fan out pool state
//! changes to independent observers.

use std::fmt::{Debug, Formatter};
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::{RecvError, SendError, TryRecvError};

/// MPMC sender.
///
/// Behaves almost identical to [`broadcast::Sender`] except that sending without receivers is not
/// an error.
#[derive(Clone)]
pub struct Sender<T> {
    inner: broadcast::Sender<T>,
}

/// MPMC receiver.
///
/// Behaves almost identical to [`broadcast::Receiver`] except that it can be cloned. Cloning
/// does not create an identical receiver. Instead, it creates a new receiver, that listens to
/// values sent after its creation.
pub struct Receiver<T> {
    inner: broadcast::Receiver<T>,
}

impl<T: Clone> Sender<T> {
    /// Broadcasts a value to all active receivers.
    ///
    /// Returns the number of receivers that will see the value. A value sent while nobody
    /// listens is dropped.
    pub fn send(&self, value: T) -> usize {
        match self.inner.send(value) {
            Ok(n_receivers) => n_receivers,
            Err(SendError(_)) => 0,
        }
    }

    /// Creates a new receiver for values sent after this call.
    pub fn subscribe(&self) -> Receiver<T> {
        Receiver {
            inner: self.inner.subscribe(),
        }
    }

    /// Number of active receivers.
    pub fn receiver_count(&self) -> usize {
        self.inner.receiver_count()
    }
}

impl<T: Clone> Receiver<T> {
    /// Waits for the next value.
    ///
    /// Behaves identical to [`broadcast::Receiver::recv`].
    pub async fn recv(&mut self) -> Result<T, RecvError> {
        self.inner.recv().await
    }

    /// Waits for the next value at most `timeout`.
    ///
    /// Returns `None` when deadline is reached.
    pub async fn recv_timeout(&mut self, timeout: Duration) -> Option<Result<T, RecvError>> {
        tokio::time::timeout(timeout, self.inner.recv()).await.ok()
    }

    /// Attempts to return a pending value without waiting.
    pub fn try_recv(&mut self) -> Result<T, TryRecvError> {
        self.inner.try_recv()
    }

    /// Creates a new receiver subscribed to the same channel.
    pub fn resubscribe(&self) -> Receiver<T> {
        Self {
            inner: self.inner.resubscribe(),
        }
    }

    /// Returns inner [`broadcast::Receiver`].
    pub fn into_inner(self) -> broadcast::Receiver<T> {
        self.inner
    }
}

impl<T> Debug for Sender<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").finish_non_exhaustive()
    }
}

impl<T> Debug for Receiver<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver").finish_non_exhaustive()
    }
}

impl<T: Clone> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        self.resubscribe()
    }
}

/// Creates a bounded broadcast channel.
///
/// # Panics
///
/// Panics if `capacity` is `0` or larger than `usize::MAX / 2`.
pub fn channel<T: Clone>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let (tx, rx) = broadcast::channel(capacity);
    (Sender { inner: tx }, Receiver { inner: rx })
}
