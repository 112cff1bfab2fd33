use std::fmt::{Debug, Formatter};
use std::ops::{Deref, DerefMut};
use std::sync::Weak;
use std::time::Duration;

use tokio::time::Instant;

use crate::io::{Connection, TransportEvent, TransportEvents};
use crate::pool::strategy::CreationPermit;

use crate::prelude::*;

/// Receiver of released and discarded pooled connections.
pub(crate) trait Owner<R, W>: Send + Sync {
    /// Takes back a usable connection.
    fn release(&self, connection: PooledConnection<R, W>);

    /// Closes a connection and returns its permit.
    fn discard(&self, connection: PooledConnection<R, W>);
}

/// Connection borrowed from a [`ConnectionPool`](crate::pool::ConnectionPool).
///
/// Dereferences to [`Connection`] for all I/O. Give the connection back with
/// [`PooledConnection::close`], throw it away with [`PooledConnection::discard`]. A pooled
/// connection that is simply dropped is released to its pool without flushing.
///
/// Input streams taken from a pooled connection complete when the connection is handed to the
/// next holder.
pub struct PooledConnection<R, W> {
    connection: Connection<R, W>,
    permit: Option<CreationPermit>,
    owner: Weak<dyn Owner<R, W>>,
    owner_id: u64,
    last_returned: Instant,
    max_idle_time: Duration,
    idle: bool,
    returned: bool,
    transport_events: TransportEvents,
}

impl<R, W> PooledConnection<R, W> {
    pub(crate) fn new(
        connection: Connection<R, W>,
        permit: CreationPermit,
        owner: Weak<dyn Owner<R, W>>,
        owner_id: u64,
        max_idle_time: Duration,
        transport_events: TransportEvents,
    ) -> Self {
        connection.attributes().set_pooled(true);
        Self {
            connection,
            permit: Some(permit),
            owner,
            owner_id,
            last_returned: Instant::now(),
            max_idle_time,
            idle: false,
            returned: false,
            transport_events,
        }
    }

    /// Returns `true` if the connection can be handed out again.
    ///
    /// A connection is usable while its channel is active, it was not marked for discarding and,
    /// while parked in the pool, it has been idle for less than the maximum idle time.
    pub fn is_usable(&self) -> bool {
        if !self.connection.is_active() || self.connection.attributes().is_marked_for_discard() {
            return false;
        }
        !self.idle || self.last_returned.elapsed() < self.max_idle_time
    }

    /// Time this connection may stay idle in the pool.
    pub fn max_idle_time(&self) -> Duration {
        self.max_idle_time
    }

    /// Flushes pending writes if `flush` is set and gives the connection back to its pool.
    ///
    /// Unusable connections are discarded instead. A failed flush discards the connection and is
    /// reported to the caller.
    pub async fn close(mut self, flush: bool) -> Result<()> {
        if flush {
            if let Err(err) = self.connection.flush().await {
                log::debug!(
                    "[{:?}] flush before release failed, discarding: {err}",
                    self.connection.info()
                );
                self.detach().hand_to_owner(Handover::Discard);
                return Err(err);
            }
        }

        self.detach().release_to_owner();
        Ok(())
    }

    /// Closes the connection for good, it is never reused.
    pub fn discard(mut self) {
        self.transport_events.emit(
            self.connection.info(),
            TransportEvent::PooledConnectionEviction,
        );
        self.detach().hand_to_owner(Handover::Discard);
    }

    pub(crate) fn owner_id(&self) -> u64 {
        self.owner_id
    }

    /// Marks connection as parked in the idle queue.
    pub(crate) fn mark_idle(&mut self) {
        self.idle = true;
        self.returned = true;
    }

    /// Marks connection as handed out to a caller.
    pub(crate) fn mark_in_use(&mut self) {
        self.idle = false;
        self.returned = false;
    }

    /// Prepares the channel for the next holder.
    pub(crate) async fn reuse(&mut self) -> Result<()> {
        self.connection.reuse().await
    }

    /// Closes the channel and returns the permit without involving the owner.
    pub(crate) fn close_now(mut self) {
        self.returned = true;
        self.connection.close_now();
        self.permit.take();
    }

    fn release_to_owner(mut self) {
        if !self.is_usable() {
            log::debug!(
                "[{:?}] connection is not usable, discarding",
                self.connection.info()
            );
            self.hand_to_owner(Handover::Discard);
            return;
        }

        self.prepare_release();
        self.hand_to_owner(Handover::Release);
    }

    /// Applies keep-alive hint and drops unflushed writes before the connection is parked.
    pub(crate) fn prepare_release(&mut self) {
        if let Some(keep_alive) = self.connection.attributes().keep_alive_timeout() {
            self.max_idle_time = keep_alive;
        }
        self.connection.cancel_pending_writes();
        self.last_returned = Instant::now();
    }

    fn hand_to_owner(mut self, handover: Handover) {
        self.returned = true;
        match (self.owner.upgrade(), handover) {
            (Some(owner), Handover::Release) => owner.release(self),
            (Some(owner), Handover::Discard) => owner.discard(self),
            (None, _) => {
                log::trace!(
                    "[{:?}] pool is gone, closing connection",
                    self.connection.info()
                );
                self.close_now();
            }
        }
    }

    /// Moves the connection out, leaving `self` inert.
    fn detach(&mut self) -> Self {
        self.returned = true;
        Self {
            connection: self.connection.detach(),
            permit: self.permit.take(),
            owner: self.owner.clone(),
            owner_id: self.owner_id,
            last_returned: self.last_returned,
            max_idle_time: self.max_idle_time,
            idle: self.idle,
            returned: false,
            transport_events: self.transport_events.clone(),
        }
    }
}

enum Handover {
    Release,
    Discard,
}

impl<R, W> Deref for PooledConnection<R, W> {
    type Target = Connection<R, W>;

    fn deref(&self) -> &Self::Target {
        &self.connection
    }
}

impl<R, W> DerefMut for PooledConnection<R, W> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.connection
    }
}

impl<R, W> Debug for PooledConnection<R, W> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("connection", &self.connection)
            .field("idle", &self.idle)
            .field("max_idle_time", &self.max_idle_time)
            .finish_non_exhaustive()
    }
}

impl<R, W> Drop for PooledConnection<R, W> {
    fn drop(&mut self) {
        if !self.returned {
            self.detach().release_to_owner();
        }
    }
}
