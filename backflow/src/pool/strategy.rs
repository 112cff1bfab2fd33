//! # Admission permit strategies
//!
//! A pool asks its [`PoolLimitStrategy`] for a permit before creating a physical connection. The
//! permit is held by the connection for its whole life and returned exactly once, when the
//! connection is closed or its creation fails.

use std::fmt::{Debug, Formatter};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::pool::PoolStateChange;

/// Limits the number of physical connections of a pool.
///
/// Every successful [`PoolLimitStrategy::try_acquire_permit`] is paired with exactly one
/// [`PoolLimitStrategy::release_permit`].
pub trait PoolLimitStrategy: Send + Sync + Debug {
    /// Grants a permit to create a new connection if one is available.
    fn try_acquire_permit(&self) -> bool;

    /// Returns a permit granted earlier.
    fn release_permit(&self);

    /// Permits that can still be granted. Returns [`usize::MAX`] for unbounded strategies.
    fn available_permits(&self) -> usize;

    /// Observes pool state changes.
    fn on_state_change(&self, _change: &PoolStateChange) {}
}

/// Strategy with a fixed, adjustable maximum of connections.
pub struct MaxConnectionsStrategy {
    limit: AtomicUsize,
    outstanding: AtomicUsize,
    granted: AtomicU64,
    returned: AtomicU64,
}

impl MaxConnectionsStrategy {
    /// Creates a strategy allowing at most `max_connections` connections.
    pub fn new(max_connections: usize) -> Self {
        Self {
            limit: AtomicUsize::new(max_connections),
            outstanding: AtomicUsize::new(0),
            granted: AtomicU64::new(0),
            returned: AtomicU64::new(0),
        }
    }

    /// Creates a strategy without a limit.
    pub fn unbounded() -> Self {
        Self::new(usize::MAX)
    }

    /// Current maximum of connections.
    pub fn max_connections(&self) -> usize {
        self.limit.load(Ordering::Acquire)
    }

    /// Raises the maximum by `n` and returns the new value.
    pub fn increment_max_connections(&self, n: usize) -> usize {
        self.update_limit(|limit| limit.saturating_add(n))
    }

    /// Lowers the maximum by `n` and returns the new value.
    ///
    /// Connections above the new maximum are not closed, new ones are not created until enough
    /// permits are returned.
    pub fn decrement_max_connections(&self, n: usize) -> usize {
        self.update_limit(|limit| match limit {
            usize::MAX => usize::MAX,
            limit => limit.saturating_sub(n),
        })
    }

    /// Number of permits handed out so far.
    pub fn permits_granted(&self) -> u64 {
        self.granted.load(Ordering::Acquire)
    }

    /// Number of permits returned so far.
    pub fn permits_returned(&self) -> u64 {
        self.returned.load(Ordering::Acquire)
    }

    /// Permits currently held by connections.
    pub fn outstanding_permits(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    fn update_limit(&self, update: impl Fn(usize) -> usize) -> usize {
        let mut current = self.limit.load(Ordering::Acquire);
        loop {
            let next = update(current);
            match self.limit.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return next,
                Err(actual) => current = actual,
            }
        }
    }
}

impl Default for MaxConnectionsStrategy {
    fn default() -> Self {
        Self::unbounded()
    }
}

impl PoolLimitStrategy for MaxConnectionsStrategy {
    fn try_acquire_permit(&self) -> bool {
        let limit = self.limit.load(Ordering::Acquire);
        let granted = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |outstanding| {
                (outstanding < limit).then_some(outstanding + 1)
            })
            .is_ok();

        if granted {
            self.granted.fetch_add(1, Ordering::AcqRel);
        }
        granted
    }

    fn release_permit(&self) {
        let released = self
            .outstanding
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |outstanding| {
                outstanding.checked_sub(1)
            })
            .is_ok();

        if released {
            self.returned.fetch_add(1, Ordering::AcqRel);
        } else {
            log::error!("permit returned to {self:?} without being granted");
        }
    }

    fn available_permits(&self) -> usize {
        match self.limit.load(Ordering::Acquire) {
            usize::MAX => usize::MAX,
            limit => limit.saturating_sub(self.outstanding.load(Ordering::Acquire)),
        }
    }
}

impl Debug for MaxConnectionsStrategy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxConnectionsStrategy")
            .field("limit", &self.limit.load(Ordering::Relaxed))
            .field("outstanding", &self.outstanding.load(Ordering::Relaxed))
            .finish()
    }
}

/// Permit to keep one physical connection open.
///
/// Returned to its strategy when dropped.
pub(crate) struct CreationPermit {
    strategy: Arc<dyn PoolLimitStrategy>,
}

impl CreationPermit {
    pub(crate) fn try_acquire(strategy: &Arc<dyn PoolLimitStrategy>) -> Option<Self> {
        strategy.try_acquire_permit().then(|| Self {
            strategy: strategy.clone(),
        })
    }
}

impl Debug for CreationPermit {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CreationPermit").finish_non_exhaustive()
    }
}

impl Drop for CreationPermit {
    fn drop(&mut self) {
        self.strategy.release_permit();
    }
}

#[cfg(test)]
mod strategy_tests {
    use super::*;

    #[test]
    fn permits_are_bounded() {
        let strategy = MaxConnectionsStrategy::new(2);
        assert!(strategy.try_acquire_permit());
        assert!(strategy.try_acquire_permit());
        assert!(!strategy.try_acquire_permit());
        assert_eq!(strategy.available_permits(), 0);

        strategy.release_permit();
        assert_eq!(strategy.available_permits(), 1);
        assert_eq!(strategy.permits_granted(), 2);
        assert_eq!(strategy.permits_returned(), 1);
    }

    #[test]
    fn unbounded_strategy_always_grants() {
        let strategy = MaxConnectionsStrategy::unbounded();
        for _ in 0..1_000 {
            assert!(strategy.try_acquire_permit());
        }
        assert_eq!(strategy.available_permits(), usize::MAX);
        assert_eq!(strategy.decrement_max_connections(10), usize::MAX);
    }

    #[test]
    fn limit_can_be_adjusted() {
        let strategy = MaxConnectionsStrategy::new(1);
        assert!(strategy.try_acquire_permit());
        assert!(!strategy.try_acquire_permit());

        assert_eq!(strategy.increment_max_connections(2), 3);
        assert!(strategy.try_acquire_permit());
        assert_eq!(strategy.available_permits(), 1);

        assert_eq!(strategy.decrement_max_connections(5), 0);
        assert_eq!(strategy.available_permits(), 0);
        assert!(!strategy.try_acquire_permit());
    }

    #[test]
    fn unmatched_release_is_ignored() {
        let strategy = MaxConnectionsStrategy::new(1);
        strategy.release_permit();
        assert_eq!(strategy.permits_returned(), 0);
        assert_eq!(strategy.available_permits(), 1);
    }

    #[test]
    fn creation_permit_is_returned_once_on_drop() {
        let strategy: Arc<dyn PoolLimitStrategy> = Arc::new(MaxConnectionsStrategy::new(1));
        let permit = CreationPermit::try_acquire(&strategy).unwrap();
        assert!(CreationPermit::try_acquire(&strategy).is_none());

        drop(permit);
        assert_eq!(strategy.available_permits(), 1);
        assert!(CreationPermit::try_acquire(&strategy).is_some());
    }

    #[test]
    fn concurrent_permits_are_conserved() {
        let strategy = Arc::new(MaxConnectionsStrategy::new(8));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let strategy = strategy.clone();
                std::thread::spawn(move || {
                    for _ in 0..10_000 {
                        if strategy.try_acquire_permit() {
                            strategy.release_permit();
                        }
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(strategy.permits_granted(), strategy.permits_returned());
        assert_eq!(strategy.available_permits(), 8);
    }
}
