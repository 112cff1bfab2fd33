use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};

use crate::pool::{PoolStateChange, StateChangeListener};

/// <sup>[`serde`](https://serde.rs)</sup>
/// Snapshot of pool statistics.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Connections parked in the idle queue.
    pub idle_count: u64,
    /// Connections held by callers.
    pub in_use_count: u64,
    /// Open physical connections.
    pub total_connections: u64,
    /// Acquire calls in progress.
    pub pending_acquires: u64,
    /// Release calls in progress.
    pub pending_releases: u64,
}

/// Counters maintained from state changes.
#[derive(Debug, Default)]
pub(crate) struct StatsCollector {
    created: AtomicU64,
    evicted: AtomicU64,
    pending_acquires: AtomicI64,
    pending_releases: AtomicI64,
}

impl StatsCollector {
    pub(crate) fn snapshot(&self, idle_count: usize) -> PoolStats {
        let created = self.created.load(Ordering::Acquire);
        let evicted = self.evicted.load(Ordering::Acquire);
        let total_connections = created.saturating_sub(evicted);
        let idle_count = (idle_count as u64).min(total_connections);

        PoolStats {
            idle_count,
            in_use_count: total_connections - idle_count,
            total_connections,
            pending_acquires: self.pending_acquires.load(Ordering::Acquire).max(0) as u64,
            pending_releases: self.pending_releases.load(Ordering::Acquire).max(0) as u64,
        }
    }
}

impl StateChangeListener for StatsCollector {
    fn on_state_change(&self, change: PoolStateChange) {
        match change {
            PoolStateChange::NewConnectionCreated => {
                self.created.fetch_add(1, Ordering::AcqRel);
            }
            PoolStateChange::ConnectionEviction => {
                self.evicted.fetch_add(1, Ordering::AcqRel);
            }
            PoolStateChange::AcquireAttempted => {
                self.pending_acquires.fetch_add(1, Ordering::AcqRel);
            }
            PoolStateChange::AcquireSucceeded
            | PoolStateChange::AcquireFailed
            | PoolStateChange::ConnectFailed => {
                self.pending_acquires.fetch_sub(1, Ordering::AcqRel);
            }
            PoolStateChange::ReleaseAttempted => {
                self.pending_releases.fetch_add(1, Ordering::AcqRel);
            }
            PoolStateChange::ReleaseSucceeded | PoolStateChange::ReleaseFailed => {
                self.pending_releases.fetch_sub(1, Ordering::AcqRel);
            }
            PoolStateChange::ConnectionReuse => {}
        }
    }
}
