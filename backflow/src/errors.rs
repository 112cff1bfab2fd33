//! # Backflow errors
//!
//! All fallible operations return [`Result`] with the crate-wide [`Error`]. Variants are meant to
//! be matched on: pool exhaustion, backpressure violations and subscription misuse are distinct
//! conditions that callers usually handle differently.

use std::sync::Arc;

/// Backflow result type.
pub type Result<T> = core::result::Result<T, Error>;

/// Backflow error.
#[derive(Clone, Debug, thiserror::Error)]
pub enum Error {
    /// No creation permit is available and the idle queue yielded nothing.
    #[error("connection pool is exhausted")]
    PoolExhausted,

    /// Acquire attempt on a pool that has been shut down.
    #[error("connection pool is already shut down")]
    PoolShutdown,

    /// The channel produced more data than the subscriber has demanded.
    #[error("received more data on the channel than demanded by the subscriber")]
    MissingBackpressure,

    /// A second connection subscriber tried to register on a channel.
    #[error("only one subscriber allowed for connection")]
    OnlyOneConnectionSubscriber,

    /// A second input subscriber tried to register while another one is active.
    #[error("only one subscriber allowed for connection input")]
    OnlyOneInputSubscriber,

    /// Input subscription arrived after the channel started reading automatically.
    #[error("channel is set to auto-read but the input subscription was lazy")]
    LazyInputSubscription,

    /// Connection passed to a pool that does not own it.
    #[error("connection is not owned by this pool")]
    ForeignConnection,

    /// Channel event loop has already finished.
    #[error("channel is closed")]
    ChannelClosed,

    /// Pending write was cancelled before it was flushed.
    #[error("pending write was cancelled")]
    WriteCancelled,

    /// Codec failed to decode inbound data or encode outbound data.
    #[error("codec error: {0}")]
    Codec(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(Arc<std::io::Error>),
}

impl From<std::io::Error> for Error {
    fn from(value: std::io::Error) -> Self {
        Error::Io(Arc::new(value))
    }
}

impl Error {
    /// Returns `true` if error was caused by the underlying transport.
    pub fn is_io(&self) -> bool {
        matches!(self, Error::Io(_))
    }

    /// Returns `true` if error signals that a subscriber broke the demand contract.
    pub fn is_backpressure_violation(&self) -> bool {
        matches!(self, Error::MissingBackpressure)
    }
}

#[cfg(test)]
mod errors_tests {
    use super::*;

    #[test]
    fn io_errors_are_shared_between_clones() {
        let err = Error::from(std::io::Error::new(
            std::io::ErrorKind::ConnectionReset,
            "reset",
        ));
        let cloned = err.clone();

        assert!(err.is_io());
        match (err, cloned) {
            (Error::Io(left), Error::Io(right)) => assert!(Arc::ptr_eq(&left, &right)),
            _ => unreachable!(),
        }
    }

    #[test]
    fn backpressure_violation_is_distinguishable() {
        assert!(Error::MissingBackpressure.is_backpressure_violation());
        assert!(!Error::PoolExhausted.is_backpressure_violation());
    }
}
