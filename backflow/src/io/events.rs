//! # Transport events
//!
//! Side channel reporting per-operation outcomes and durations. The library emits these events
//! but never interprets them.

use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Duration;

use crate::io::ConnectionInfo;

/// Transport-level event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connect attempt started.
    ConnectStart,
    /// Connect attempt succeeded.
    ConnectSuccess {
        /// Time spent connecting.
        duration: Duration,
    },
    /// Connect attempt failed.
    ConnectFailed {
        /// Time spent before failure.
        duration: Duration,
    },
    /// Bytes were read from the socket.
    BytesRead {
        /// Number of bytes.
        count: usize,
    },
    /// Item was encoded into the write buffer.
    WriteSuccess {
        /// Number of encoded bytes.
        bytes: usize,
    },
    /// Buffered writes were flushed to the socket.
    FlushSuccess {
        /// Time spent flushing.
        duration: Duration,
    },
    /// Flush failed.
    FlushFailed {
        /// Time spent before failure.
        duration: Duration,
    },
    /// Channel was closed.
    CloseSuccess {
        /// Time between close request and teardown completion.
        duration: Duration,
    },
    /// Pooled connection was explicitly discarded by its holder.
    PooledConnectionEviction,
}

/// Receiver of [`TransportEvent`]s.
///
/// Implemented for closures with matching signature.
pub trait TransportEventListener: Send + Sync {
    /// Called synchronously on the task that produced the event.
    fn on_event(&self, info: &ConnectionInfo, event: &TransportEvent);
}

impl<F> TransportEventListener for F
where
    F: Fn(&ConnectionInfo, &TransportEvent) + Send + Sync,
{
    fn on_event(&self, info: &ConnectionInfo, event: &TransportEvent) {
        self(info, event)
    }
}

/// Optional shared listener.
#[derive(Clone, Default)]
pub struct TransportEvents {
    listener: Option<Arc<dyn TransportEventListener>>,
}

impl TransportEvents {
    /// Wraps a listener.
    pub fn new(listener: Arc<dyn TransportEventListener>) -> Self {
        Self {
            listener: Some(listener),
        }
    }

    /// Listener that drops all events.
    pub fn none() -> Self {
        Self::default()
    }

    pub(crate) fn emit(&self, info: &ConnectionInfo, event: TransportEvent) {
        if let Some(listener) = &self.listener {
            listener.on_event(info, &event);
        }
    }
}

impl Debug for TransportEvents {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportEvents")
            .field("enabled", &self.listener.is_some())
            .finish()
    }
}
