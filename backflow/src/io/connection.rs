use std::fmt::{Debug, Formatter};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::{mpsc, oneshot};

use crate::io::channel::{ChannelControl, ChannelEvent};
use crate::io::{ChannelAttributes, ChannelConfig, ConnectionId, ConnectionInfo, Input};
use crate::utils::Closable;

use crate::prelude::*;

/// Live transport-level session.
///
/// A connection is a handle to a channel event loop which owns the socket. Reading happens
/// through a single [`Input`] stream at a time, writing is buffered by [`Connection::write`] and
/// sent to the peer by [`Connection::flush`].
///
/// Dropping a connection closes the channel without flushing pending writes. Use
/// [`Connection::close`] to flush and wait until the channel is closed.
pub struct Connection<R, W> {
    info: ConnectionInfo,
    config: ChannelConfig,
    events: mpsc::UnboundedSender<ChannelEvent<R, W>>,
    attributes: Arc<ChannelAttributes>,
    state: Closable,
    eager_input: Option<Input<R>>,
    detached: bool,
}

impl<R, W> Connection<R, W> {
    pub(crate) fn new(
        info: ConnectionInfo,
        config: ChannelConfig,
        events: mpsc::UnboundedSender<ChannelEvent<R, W>>,
        attributes: Arc<ChannelAttributes>,
        state: Closable,
        eager_input: Option<Input<R>>,
    ) -> Self {
        Self {
            info,
            config,
            events,
            attributes,
            state,
            eager_input,
            detached: false,
        }
    }

    /// Connection `ID`.
    pub fn id(&self) -> ConnectionId {
        self.info.id()
    }

    /// Information about this connection.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Channel configuration this connection was created with.
    pub fn config(&self) -> &ChannelConfig {
        &self.config
    }

    /// Channel attributes.
    pub fn attributes(&self) -> &ChannelAttributes {
        &self.attributes
    }

    /// Returns `true` while the underlying channel is open.
    pub fn is_active(&self) -> bool {
        !self.state.is_closed()
    }

    /// Encodes `item` into the write buffer of the channel.
    ///
    /// Nothing is sent to the peer until the next [`Connection::flush`]. The returned completion
    /// resolves once the flush carrying this item finishes. Completions resolve in the order
    /// items were written.
    pub fn write(&self, item: W) -> WriteCompletion {
        let (tx, rx) = oneshot::channel();
        match self.events.send(ChannelEvent::Write(item, tx)) {
            Ok(_) => WriteCompletion::pending(rx),
            Err(_) => WriteCompletion::failed(Error::ChannelClosed),
        }
    }

    /// Flushes all writes submitted before this call.
    ///
    /// Resolves once every earlier write is completed.
    pub fn flush(&self) -> WriteCompletion {
        let (tx, rx) = oneshot::channel();
        match self.events.send(ChannelEvent::Flush(tx)) {
            Ok(_) => WriteCompletion::pending(rx),
            Err(_) => WriteCompletion::failed(Error::ChannelClosed),
        }
    }

    /// Writes a single item and flushes it.
    pub async fn write_and_flush(&self, item: W) -> Result<()> {
        let written = self.write(item);
        self.flush().await?;
        written.await
    }

    /// Drops all unflushed writes. Their completions fail with [`Error::WriteCancelled`].
    pub fn cancel_pending_writes(&self) {
        let _ = self.events.send(ChannelEvent::CancelPendingWrites);
    }

    /// Flushes pending writes and closes the channel.
    ///
    /// Resolves once the channel is closed and the active input, if any, is completed.
    pub async fn close(mut self) -> Result<()> {
        self.detached = true;
        let (tx, rx) = oneshot::channel();
        let close = ChannelEvent::Close {
            flush: true,
            reply: Some(tx),
        };
        if self.events.send(close).is_err() {
            return Ok(());
        }
        rx.await.unwrap_or(Ok(()))
    }

    /// Closes the channel without flushing and without waiting.
    pub fn close_now(&self) {
        let _ = self.events.send(ChannelEvent::Close {
            flush: false,
            reply: None,
        });
    }

    /// Prepares the channel for the next holder of a pooled connection.
    ///
    /// Completes the previous input and registers a fresh eager input when configured.
    pub(crate) async fn reuse(&mut self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.events
            .send(ChannelEvent::Reuse(tx))
            .map_err(|_| Error::ChannelClosed)?;

        let eager_input = rx.await.map_err(|_| Error::ChannelClosed)?;
        self.eager_input = eager_input;
        Ok(())
    }

    /// Moves the handle out, leaving `self` inert.
    pub(crate) fn detach(&mut self) -> Self {
        self.detached = true;
        Self {
            info: self.info.clone(),
            config: self.config.clone(),
            events: self.events.clone(),
            attributes: self.attributes.clone(),
            state: self.state.clone(),
            eager_input: self.eager_input.take(),
            detached: false,
        }
    }
}

impl<R: Send + 'static, W: Send + 'static> Connection<R, W> {
    /// Subscribes to inbound items.
    ///
    /// Returns the eagerly registered input if the channel was configured with
    /// [`ChannelConfig::eager_input`] and it was not taken yet. Otherwise registers a new input
    /// subscriber. Registration errors are reported as the first item of the returned stream:
    /// [`Error::OnlyOneInputSubscriber`] if another input is active, and
    /// [`Error::LazyInputSubscription`] for lazy subscriptions on auto-read channels.
    pub fn input(&mut self) -> Input<R> {
        if let Some(input) = self.eager_input.take() {
            return input;
        }

        let control = ChannelControl::shared(self.events.downgrade());
        let (input, producer) = Input::subscribe(self.config.auto_read(), control);
        let subscribe = ChannelEvent::SubscribeInput(producer.clone());
        if self.events.send(subscribe).is_err() {
            producer.send_on_complete();
        }
        input
    }
}

impl<R, W> Debug for Connection<R, W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("info", &self.info)
            .field("active", &!self.state.is_closed())
            .finish_non_exhaustive()
    }
}

impl<R, W> Drop for Connection<R, W> {
    fn drop(&mut self) {
        if self.detached {
            return;
        }
        let _ = self.events.send(ChannelEvent::Close {
            flush: false,
            reply: None,
        });
    }
}

/// Completion signal of a write or a flush.
///
/// Resolves with an error if the channel closes first.
#[derive(Debug)]
pub struct WriteCompletion {
    state: CompletionState,
}

#[derive(Debug)]
enum CompletionState {
    Pending(oneshot::Receiver<Result<()>>),
    Ready(Option<Result<()>>),
}

impl WriteCompletion {
    fn pending(rx: oneshot::Receiver<Result<()>>) -> Self {
        Self {
            state: CompletionState::Pending(rx),
        }
    }

    fn failed(err: Error) -> Self {
        Self {
            state: CompletionState::Ready(Some(Err(err))),
        }
    }
}

impl Future for WriteCompletion {
    type Output = Result<()>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            CompletionState::Pending(rx) => match Pin::new(rx).poll(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(Error::ChannelClosed)),
                Poll::Pending => Poll::Pending,
            },
            CompletionState::Ready(result) => {
                Poll::Ready(result.take().unwrap_or(Err(Error::ChannelClosed)))
            }
        }
    }
}
