use std::fmt::{Debug, Formatter};
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use tokio::sync::mpsc;
use tokio_stream::Stream;

use crate::io::producer::{InputControl, InputId, InputSignal, ReadProducer, UNBOUNDED};

use crate::prelude::*;

static NEXT_INPUT_ID: AtomicU64 = AtomicU64::new(1);

/// Inbound stream of a [`Connection`](super::Connection).
///
/// Items are delivered strictly in arrival order and only while there is outstanding demand.
/// Demand is added explicitly by [`Input::request`] or [`Input::request_unbounded`]. When the
/// stream is polled with no buffered items and no outstanding demand, it requests a single item,
/// so a plain `while let Some(item) = input.next().await` loop consumes one item at a time.
///
/// The stream ends with `None` when the channel closes or when the connection is handed to the
/// next holder of a pooled connection. Errors are terminal: after yielding `Some(Err(_))` the
/// stream yields `None`.
///
/// Dropping an input unsubscribes it. A non-pooled connection is closed once its input is dropped
/// and no other input subscriber claims the channel in the same event-loop turn.
pub struct Input<R> {
    producer: Arc<ReadProducer<R>>,
    rx: mpsc::UnboundedReceiver<InputSignal<R>>,
    done: bool,
}

impl<R> Input<R> {
    /// Creates a subscription together with the producer the channel delivers to.
    pub(crate) fn subscribe(
        auto_read: bool,
        control: Arc<dyn InputControl>,
    ) -> (Self, Arc<ReadProducer<R>>) {
        let id: InputId = NEXT_INPUT_ID.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        let producer = Arc::new(ReadProducer::new(id, auto_read, tx, control));

        let input = Self {
            producer: producer.clone(),
            rx,
            done: false,
        };
        (input, producer)
    }

    /// Input that has already terminated, with an error if `err` is set.
    pub(crate) fn terminated(control: Arc<dyn InputControl>, err: Option<Error>) -> Self {
        let (input, producer) = Self::subscribe(true, control);
        match err {
            None => producer.send_on_complete(),
            Some(err) => producer.send_on_error(err),
        }
        input
    }

    /// Adds `n` items to outstanding demand.
    pub fn request(&self, n: u64) {
        self.producer.request(n);
    }

    /// Disables backpressure tracking for this input.
    pub fn request_unbounded(&self) {
        self.producer.request(UNBOUNDED);
    }

    /// Outstanding demand. Returns [`u64::MAX`] for unbounded inputs.
    pub fn requested(&self) -> u64 {
        self.producer.requested()
    }
}

impl<R> Stream for Input<R> {
    type Item = Result<R>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }

        match this.rx.poll_recv(cx) {
            Poll::Ready(Some(InputSignal::Item(item))) => Poll::Ready(Some(Ok(item))),
            Poll::Ready(Some(InputSignal::Error(err))) => {
                this.done = true;
                Poll::Ready(Some(Err(err)))
            }
            Poll::Ready(Some(InputSignal::Complete)) | Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            Poll::Pending => {
                if this.producer.requested() == 0 && this.producer.is_active() {
                    this.producer.request(1);
                }
                Poll::Pending
            }
        }
    }
}

impl<R> Debug for Input<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input")
            .field("id", &self.producer.id())
            .field("requested", &self.producer.requested())
            .field("done", &self.done)
            .finish()
    }
}

impl<R> Drop for Input<R> {
    fn drop(&mut self) {
        self.rx.close();
        self.producer.control().unsubscribed(self.producer.id());
    }
}
