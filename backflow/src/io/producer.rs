//! # Demand-tracked read producer
//!
//! A [`ReadProducer`] sits between a channel event loop and exactly one [`Input`](super::Input).
//! The consumer adds demand, the event loop delivers items while demand lasts and asks
//! [`ReadProducer::should_read_more`] whether the socket should be read again.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use crate::prelude::*;

/// Demand value that disables backpressure tracking for a subscription.
pub(crate) const UNBOUNDED: u64 = u64::MAX;

/// Input subscription identifier.
pub(crate) type InputId = u64;

/// Signals sent from a producer to its input.
#[derive(Debug)]
pub(crate) enum InputSignal<R> {
    Item(R),
    Error(Error),
    Complete,
}

/// Outcome of [`ReadProducer::deliver`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum Delivery {
    Delivered,
    /// Demand was exhausted, subscriber was terminated with a backpressure error.
    Violation,
    /// Subscriber is gone or already terminated, item was dropped.
    Inactive,
}

/// Hooks back into the owning channel event loop.
pub(crate) trait InputControl: Send + Sync {
    /// Event loop may attempt more reads.
    fn request_read(&self);

    /// Input with the given identifier was dropped by its consumer.
    fn unsubscribed(&self, id: InputId);
}

pub(crate) struct ReadProducer<R> {
    id: InputId,
    requested: AtomicU64,
    terminated: AtomicBool,
    auto_read: bool,
    sink: mpsc::UnboundedSender<InputSignal<R>>,
    control: Arc<dyn InputControl>,
}

impl<R> ReadProducer<R> {
    pub(crate) fn new(
        id: InputId,
        auto_read: bool,
        sink: mpsc::UnboundedSender<InputSignal<R>>,
        control: Arc<dyn InputControl>,
    ) -> Self {
        Self {
            id,
            requested: AtomicU64::new(0),
            terminated: AtomicBool::new(false),
            auto_read,
            sink,
            control,
        }
    }

    pub(crate) fn id(&self) -> InputId {
        self.id
    }

    pub(crate) fn control(&self) -> &Arc<dyn InputControl> {
        &self.control
    }

    /// Adds `n` to outstanding demand.
    ///
    /// Demand saturates at [`UNBOUNDED`], once reached it stays latched for the lifetime of this
    /// subscription.
    pub(crate) fn request(&self, n: u64) {
        if n == 0 {
            return;
        }

        let _ = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(match current {
                    UNBOUNDED => UNBOUNDED,
                    current => current.saturating_add(n),
                })
            });

        if !self.auto_read {
            self.control.request_read();
        }
    }

    /// Outstanding demand.
    pub(crate) fn requested(&self) -> u64 {
        self.requested.load(Ordering::Acquire)
    }

    /// Delivers an item if there is outstanding demand.
    ///
    /// Delivering with zero demand terminates the subscriber with
    /// [`Error::MissingBackpressure`], the item is dropped.
    pub(crate) fn deliver(&self, item: R) -> Delivery {
        if !self.is_active() {
            return Delivery::Inactive;
        }

        let granted = self
            .requested
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| match current {
                UNBOUNDED => Some(UNBOUNDED),
                0 => None,
                current => Some(current - 1),
            })
            .is_ok();

        if !granted {
            self.send_on_error(Error::MissingBackpressure);
            return Delivery::Violation;
        }

        match self.sink.send(InputSignal::Item(item)) {
            Ok(_) => Delivery::Delivered,
            Err(_) => Delivery::Inactive,
        }
    }

    /// Returns `true` if subscriber is active and has outstanding demand.
    pub(crate) fn should_read_more(&self) -> bool {
        self.is_active() && self.requested() > 0
    }

    /// Returns `true` if subscriber neither terminated nor went away.
    pub(crate) fn is_active(&self) -> bool {
        !self.terminated.load(Ordering::Acquire) && !self.sink.is_closed()
    }

    /// Terminates subscriber with an error. Only the first terminal signal is sent.
    pub(crate) fn send_on_error(&self, err: Error) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            let _ = self.sink.send(InputSignal::Error(err));
        }
    }

    /// Completes subscriber. Only the first terminal signal is sent.
    pub(crate) fn send_on_complete(&self) {
        if !self.terminated.swap(true, Ordering::AcqRel) {
            let _ = self.sink.send(InputSignal::Complete);
        }
    }
}
