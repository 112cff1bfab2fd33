use async_trait::async_trait;

use crate::io::Connection;

use crate::prelude::*;

/// Creates physical connections.
///
/// A [`ConnectionPool`](crate::pool::ConnectionPool) calls [`ChannelFactory::connect`] whenever
/// the idle queue is empty and a creation permit is available. Dropping the returned future
/// cancels the connect attempt.
#[async_trait]
pub trait ChannelFactory<R, W>: Send + Sync {
    /// Connects a new channel and returns its connection once the channel is active.
    async fn connect(&self) -> Result<Connection<R, W>>;
}
