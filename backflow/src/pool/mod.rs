//! # Connection pool
//!
//! [`ConnectionPool`] keeps a lock-free queue of idle connections and creates new ones through a
//! [`ChannelFactory`](crate::io::ChannelFactory) when the queue is empty and the
//! [`PoolLimitStrategy`] grants a permit. Admission never waits: an exhausted pool fails the
//! acquire with [`Error::PoolExhausted`](crate::Error::PoolExhausted).
//!
//! Every acquire, release and eviction is reported as a [`PoolStateChange`] to the strategy, to
//! the built-in statistics ([`PoolStats`]), to synchronous [`StateChangeListener`]s and to every
//! [`StateChangeStream`] returned by [`ConnectionPool::state_changes`].
//!
//! Connections that stay idle longer than [`PoolConfig::max_idle_time`] are evicted lazily by
//! acquire and periodically by a background sweep.

mod cleanup;
mod config;
mod connection_pool;
mod event;
mod pooled;
mod stats;
pub(crate) mod strategy;

pub use config::{IdleCleanup, PoolConfig, PoolConfigBuilder};
pub use connection_pool::ConnectionPool;
pub use event::{PoolStateChange, StateChangeListener, StateChangeStream};
pub use pooled::PooledConnection;
pub use stats::PoolStats;
pub use strategy::{MaxConnectionsStrategy, PoolLimitStrategy};
