use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use arc_swap::ArcSwapOption;
use crossbeam_queue::SegQueue;

use crate::io::ChannelFactory;
use crate::pool::cleanup::{IdleCleanupHandler, IdleSweep};
use crate::pool::pooled::Owner;
use crate::pool::stats::StatsCollector;
use crate::pool::strategy::CreationPermit;
use crate::pool::{
    IdleCleanup, PoolConfig, PoolLimitStrategy, PoolStateChange, PoolStats, PooledConnection,
    StateChangeListener, StateChangeStream,
};
use crate::runtime::EventLoopProvider;
use crate::utils::{mpmc, Closer};

use crate::prelude::*;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Bounded pool of reusable connections.
///
/// [`ConnectionPool::acquire`] hands out an idle connection if a usable one is parked, and creates
/// a new one through the [`ChannelFactory`] otherwise, as long as the limit strategy grants a
/// permit. Connections come back through [`PooledConnection::close`],
/// [`ConnectionPool::release`] or simply by being dropped.
///
/// The pool is cheap to clone, all clones share the same state.
///
/// # Usage
///
/// ```rust,no_run
/// # #[tokio::main] async fn main() {
/// use backflow::io::{Lines, TcpChannelFactory};
/// use backflow::pool::{ConnectionPool, PoolConfig};
/// use tokio_stream::StreamExt;
///
/// let factory = TcpChannelFactory::new("127.0.0.1:5600", Lines::new()).unwrap();
/// let config = PoolConfig::builder().max_connections(4).build().unwrap();
/// let pool = ConnectionPool::new(factory, config).unwrap();
///
/// let mut connection = pool.acquire().await.unwrap();
/// connection.write_and_flush("ping".to_string()).await.unwrap();
/// let reply = connection.input().next().await;
/// connection.close(true).await.unwrap();
/// # }
/// ```
pub struct ConnectionPool<R, W> {
    inner: Arc<PoolInner<R, W>>,
}

struct PoolInner<R, W> {
    id: u64,
    config: PoolConfig,
    factory: Arc<dyn ChannelFactory<R, W>>,
    strategy: Arc<dyn PoolLimitStrategy>,
    idle: SegQueue<PooledConnection<R, W>>,
    shutdown: AtomicBool,
    cleanup: Closer,
    sweeps: SweepGate,
    broadcast: ArcSwapOption<mpmc::Sender<PoolStateChange>>,
    stats: StatsCollector,
}

impl<R: Send + 'static, W: Send + 'static> ConnectionPool<R, W> {
    /// Creates a pool over `factory`.
    ///
    /// Starts the idle sweep according to [`PoolConfig::idle_cleanup`].
    pub fn new(factory: impl ChannelFactory<R, W> + 'static, config: PoolConfig) -> Result<Self> {
        Self::with_shared_factory(Arc::new(factory), config)
    }

    /// Creates a pool over a factory shared with other components.
    pub fn with_shared_factory(
        factory: Arc<dyn ChannelFactory<R, W>>,
        config: PoolConfig,
    ) -> Result<Self> {
        let provider = match config.idle_cleanup() {
            IdleCleanup::Shared => Some(EventLoopProvider::global()?),
            IdleCleanup::Custom(provider) => Some(provider.clone()),
            IdleCleanup::Disabled => None,
        };

        let (broadcast, _) = mpmc::channel(config.state_change_capacity());
        let inner = Arc::new(PoolInner {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            strategy: config.make_strategy(),
            config,
            factory,
            idle: SegQueue::new(),
            shutdown: AtomicBool::new(false),
            cleanup: Closer::new(),
            sweeps: SweepGate::default(),
            broadcast: ArcSwapOption::from_pointee(broadcast),
            stats: StatsCollector::default(),
        });

        if let Some(provider) = provider {
            let weak = Arc::downgrade(&inner);
            let sweep: Weak<dyn IdleSweep> = weak;
            IdleCleanupHandler::new(inner.id, sweep, inner.config.cleanup_period())
                .spawn(&provider, inner.cleanup.to_closable());
        }
        log::debug!("[pool #{}] created with {:?}", inner.id, inner.config);

        Ok(Self { inner })
    }

    /// Pool identifier, unique within the process.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Pool configuration.
    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    /// Acquires a connection.
    ///
    /// Idle connections are tried first, unusable ones met on the way are discarded. When the
    /// idle queue is exhausted, a new connection is created if the limit strategy grants a permit.
    ///
    /// # Errors
    ///
    /// * [`Error::PoolShutdown`] after [`ConnectionPool::shutdown`].
    /// * [`Error::PoolExhausted`] if no idle connection is available and no permit is granted.
    /// * Connect errors of the factory, the permit is returned in this case.
    ///
    /// Dropping the returned future cancels the acquire, an in-flight connect attempt is
    /// cancelled and its permit is returned.
    pub async fn acquire(&self) -> Result<PooledConnection<R, W>> {
        let inner = &self.inner;
        inner.emit(PoolStateChange::AcquireAttempted);
        let mut pending = PendingAcquire::new(inner);

        if inner.is_shut_down() {
            pending.finish(PoolStateChange::AcquireFailed);
            return Err(Error::PoolShutdown);
        }

        loop {
            let sweeps_finished = inner.sweeps.finished();
            let Some(mut connection) = inner.idle.pop() else {
                // A running sweep may hold idle connections outside of the queue.
                if inner.sweeps.started_since(sweeps_finished) {
                    tokio::task::yield_now().await;
                    continue;
                }
                break;
            };

            if !connection.is_usable() {
                log::debug!("[pool #{}] evicting unusable idle {connection:?}", inner.id);
                inner.discard_connection(connection);
                continue;
            }

            connection.mark_in_use();
            match connection.reuse().await {
                Ok(_) => {
                    log::trace!("[pool #{}] reusing {connection:?}", inner.id);
                    inner.emit(PoolStateChange::ConnectionReuse);
                    pending.finish(PoolStateChange::AcquireSucceeded);
                    return Ok(connection);
                }
                Err(err) => {
                    log::debug!("[pool #{}] can't reuse {connection:?}: {err}", inner.id);
                    inner.discard_connection(connection);
                }
            }
        }

        let permit = match CreationPermit::try_acquire(&inner.strategy) {
            Some(permit) => permit,
            None => {
                log::trace!("[pool #{}] exhausted", inner.id);
                pending.finish(PoolStateChange::AcquireFailed);
                return Err(Error::PoolExhausted);
            }
        };

        match inner.factory.connect().await {
            Ok(connection) => {
                let weak = Arc::downgrade(&self.inner);
                let owner: Weak<dyn Owner<R, W>> = weak;
                let connection = PooledConnection::new(
                    connection,
                    permit,
                    owner,
                    inner.id,
                    inner.config.max_idle_time(),
                    inner.config.transport_events.clone(),
                );
                log::debug!("[pool #{}] created {connection:?}", inner.id);
                inner.emit(PoolStateChange::NewConnectionCreated);
                pending.finish(PoolStateChange::AcquireSucceeded);
                Ok(connection)
            }
            Err(err) => {
                drop(permit);
                log::debug!("[pool #{}] connect failed: {err}", inner.id);
                pending.finish(PoolStateChange::ConnectFailed);
                Err(err)
            }
        }
    }

    /// Returns a connection to the pool without flushing.
    ///
    /// Unusable connections, and any connection released after shutdown, are discarded. Both
    /// outcomes are reported as a successful release.
    ///
    /// # Errors
    ///
    /// [`Error::ForeignConnection`] if `connection` belongs to another pool. The connection is
    /// then released to the pool it belongs to.
    pub fn release(&self, mut connection: PooledConnection<R, W>) -> Result<()> {
        let inner = &self.inner;
        if connection.owner_id() != inner.id {
            inner.emit(PoolStateChange::ReleaseAttempted);
            log::debug!("[pool #{}] rejecting foreign {connection:?}", inner.id);
            inner.emit(PoolStateChange::ReleaseFailed);
            return Err(Error::ForeignConnection);
        }

        if connection.is_usable() {
            connection.prepare_release();
        }
        inner.release_connection(connection);
        Ok(())
    }

    /// Closes a connection and returns its permit.
    ///
    /// # Errors
    ///
    /// [`Error::ForeignConnection`] if `connection` belongs to another pool. The connection is
    /// discarded by the pool it belongs to.
    pub fn discard(&self, connection: PooledConnection<R, W>) -> Result<()> {
        let inner = &self.inner;
        if connection.owner_id() != inner.id {
            log::debug!("[pool #{}] discarding foreign {connection:?}", inner.id);
            connection.discard();
            return Err(Error::ForeignConnection);
        }

        inner.discard_connection(connection);
        Ok(())
    }

    /// Shuts the pool down.
    ///
    /// Stops the idle sweep, discards idle connections and ends state change streams. Connections
    /// in use are discarded when they come back. Subsequent calls do nothing.
    pub fn shutdown(&self) {
        let inner = &self.inner;
        if inner
            .shutdown
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }

        log::debug!("[pool #{}] shutting down", inner.id);
        inner.cleanup.close();
        let discarded = inner.drain_idle();
        inner.broadcast.store(None);
        log::debug!(
            "[pool #{}] shut down, {discarded} idle connections discarded",
            inner.id
        );
    }

    /// Returns `true` once the pool is shut down.
    pub fn is_shut_down(&self) -> bool {
        self.inner.is_shut_down()
    }

    /// Subscribes to state changes.
    ///
    /// Streams created after shutdown end immediately. A stream that falls more than
    /// [`PoolConfig::state_change_capacity`] changes behind skips the overwritten ones and logs a
    /// warning. Observers that must see every change exactly once should be registered with
    /// [`PoolConfigBuilder::listener`](crate::pool::PoolConfigBuilder::listener) instead.
    pub fn state_changes(&self) -> StateChangeStream {
        match &*self.inner.broadcast.load() {
            Some(broadcast) => StateChangeStream::new(broadcast.subscribe().into_inner()),
            None => StateChangeStream::closed(),
        }
    }

    /// Statistics snapshot.
    pub fn stats(&self) -> PoolStats {
        self.inner.stats.snapshot(self.inner.idle.len())
    }

    /// Number of connections parked in the idle queue.
    pub fn idle_count(&self) -> usize {
        self.inner.idle.len()
    }

    /// Permits the limit strategy can still grant.
    pub fn available_permits(&self) -> usize {
        self.inner.strategy.available_permits()
    }

    /// Evicts unusable idle connections now and returns their number.
    ///
    /// The same sweep runs periodically unless [`IdleCleanup::Disabled`].
    pub fn evict_expired(&self) -> usize {
        self.inner.evict_expired()
    }
}

impl<R, W> Clone for ConnectionPool<R, W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R, W> Debug for ConnectionPool<R, W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.inner.id)
            .field("idle", &self.inner.idle.len())
            .field("shutdown", &self.inner.is_shut_down())
            .field("strategy", &self.inner.strategy)
            .finish_non_exhaustive()
    }
}

impl<R, W> PoolInner<R, W> {
    fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    fn emit(&self, change: PoolStateChange) {
        log::trace!("[pool #{}] {change:?}", self.id);

        self.strategy.on_state_change(&change);
        self.stats.on_state_change(change);
        for listener in &self.config.listeners {
            listener.on_state_change(change);
        }
        if let Some(broadcast) = &*self.broadcast.load() {
            broadcast.send(change);
        }
    }
}

impl<R: Send + 'static, W: Send + 'static> PoolInner<R, W> {
    fn release_connection(&self, mut connection: PooledConnection<R, W>) {
        self.emit(PoolStateChange::ReleaseAttempted);

        if self.is_shut_down() || !connection.is_usable() {
            log::debug!("[pool #{}] discarding released {connection:?}", self.id);
            self.discard_connection(connection);
            self.emit(PoolStateChange::ReleaseSucceeded);
            return;
        }

        log::trace!("[pool #{}] parking {connection:?}", self.id);
        connection.mark_idle();
        self.idle.push(connection);

        // Shutdown may have drained the queue right before the push.
        if self.is_shut_down() {
            self.drain_idle();
        }
        self.emit(PoolStateChange::ReleaseSucceeded);
    }

    fn discard_connection(&self, connection: PooledConnection<R, W>) {
        log::trace!("[pool #{}] closing {connection:?}", self.id);
        connection.close_now();
        self.emit(PoolStateChange::ConnectionEviction);
    }

    fn drain_idle(&self) -> usize {
        let mut discarded = 0;
        while let Some(connection) = self.idle.pop() {
            self.discard_connection(connection);
            discarded += 1;
        }
        discarded
    }
}

impl<R: Send + 'static, W: Send + 'static> Owner<R, W> for PoolInner<R, W> {
    fn release(&self, connection: PooledConnection<R, W>) {
        self.release_connection(connection);
    }

    fn discard(&self, connection: PooledConnection<R, W>) {
        self.discard_connection(connection);
    }
}

impl<R: Send + 'static, W: Send + 'static> IdleSweep for PoolInner<R, W> {
    fn evict_expired(&self) -> usize {
        let _sweep = self.sweeps.enter();
        let mut evicted = 0;
        for _ in 0..self.idle.len() {
            let connection = match self.idle.pop() {
                Some(connection) => connection,
                None => break,
            };
            if connection.is_usable() {
                self.idle.push(connection);
            } else {
                log::debug!("[pool #{}] evicting expired {connection:?}", self.id);
                self.discard_connection(connection);
                evicted += 1;
            }
        }

        if self.is_shut_down() {
            evicted += self.drain_idle();
        }
        evicted
    }
}

/// Emits the terminal event of an acquire, [`PoolStateChange::AcquireFailed`] if the acquire is
/// dropped before it resolves.
struct PendingAcquire<'a, R, W> {
    inner: &'a PoolInner<R, W>,
    finished: bool,
}

impl<'a, R, W> PendingAcquire<'a, R, W> {
    fn new(inner: &'a PoolInner<R, W>) -> Self {
        Self {
            inner,
            finished: false,
        }
    }

    fn finish(&mut self, change: PoolStateChange) {
        self.finished = true;
        self.inner.emit(change);
    }
}

impl<R, W> Drop for PendingAcquire<'_, R, W> {
    fn drop(&mut self) {
        if !self.finished {
            log::debug!("[pool #{}] acquire cancelled", self.inner.id);
            self.inner.emit(PoolStateChange::AcquireFailed);
        }
    }
}

/// Tracks idle sweeps, which take connections out of the idle queue while checking them.
#[derive(Debug, Default)]
struct SweepGate {
    started: AtomicU64,
    finished: AtomicU64,
}

impl SweepGate {
    fn enter(&self) -> SweepGuard<'_> {
        self.started.fetch_add(1, Ordering::SeqCst);
        SweepGuard { gate: self }
    }

    fn finished(&self) -> u64 {
        self.finished.load(Ordering::SeqCst)
    }

    /// Returns `true` if a sweep that was not finished at `finished` has started.
    fn started_since(&self, finished: u64) -> bool {
        self.started.load(Ordering::SeqCst) > finished
    }
}

struct SweepGuard<'a> {
    gate: &'a SweepGate,
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.gate.finished.fetch_add(1, Ordering::SeqCst);
    }
}
