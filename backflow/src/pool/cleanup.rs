use std::sync::Weak;
use std::time::Duration;

use crate::runtime::EventLoopProvider;
use crate::utils::Closable;

/// Pool side of the idle sweep.
pub(crate) trait IdleSweep: Send + Sync {
    /// Discards unusable idle connections and returns their number.
    fn evict_expired(&self) -> usize;
}

/// Periodically evicts expired idle connections.
///
/// Holds only a weak reference to the pool, so a forgotten pool is not kept alive by its sweep.
pub(crate) struct IdleCleanupHandler {
    pool_id: u64,
    pool: Weak<dyn IdleSweep>,
    period: Duration,
}

impl IdleCleanupHandler {
    pub(crate) fn new(pool_id: u64, pool: Weak<dyn IdleSweep>, period: Duration) -> Self {
        Self {
            pool_id,
            pool,
            period,
        }
    }

    pub(crate) fn spawn(self, provider: &EventLoopProvider, state: Closable) {
        provider.spawn(async move {
            let pool_id = self.pool_id;
            log::trace!("[pool #{pool_id}] idle cleanup started, period: {:?}", self.period);

            while !state.is_closed() {
                tokio::time::sleep(self.period).await;
                if state.is_closed() {
                    break;
                }

                let pool = match self.pool.upgrade() {
                    Some(pool) => pool,
                    None => break,
                };
                let evicted = pool.evict_expired();
                if evicted > 0 {
                    log::debug!("[pool #{pool_id}] idle cleanup evicted {evicted} connections");
                }
            }

            log::trace!("[pool #{pool_id}] idle cleanup stopped");
        });
    }
}

#[cfg(test)]
mod cleanup_tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use crate::utils::Closer;

    #[derive(Default)]
    struct CountingSweep {
        sweeps: AtomicUsize,
    }

    impl IdleSweep for CountingSweep {
        fn evict_expired(&self) -> usize {
            self.sweeps.fetch_add(1, Ordering::AcqRel);
            0
        }
    }

    fn start(sweep: &Arc<CountingSweep>, closer: &Closer) {
        let weak: Weak<dyn IdleSweep> = Arc::downgrade(sweep) as Weak<dyn IdleSweep>;
        IdleCleanupHandler::new(1, weak, Duration::from_millis(30)).spawn(
            &EventLoopProvider::current().unwrap(),
            closer.to_closable(),
        );
    }

    #[tokio::test(start_paused = true)]
    async fn sweeps_once_per_period() {
        let sweep = Arc::new(CountingSweep::default());
        let closer = Closer::new();
        start(&sweep, &closer);

        tokio::time::sleep(Duration::from_millis(95)).await;
        assert_eq!(sweep.sweeps.load(Ordering::Acquire), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_closed() {
        let sweep = Arc::new(CountingSweep::default());
        let closer = Closer::new();
        start(&sweep, &closer);

        tokio::time::sleep(Duration::from_millis(35)).await;
        closer.close();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(sweep.sweeps.load(Ordering::Acquire), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn stops_when_pool_is_gone() {
        let sweep = Arc::new(CountingSweep::default());
        let closer = Closer::new();
        start(&sweep, &closer);

        tokio::time::sleep(Duration::from_millis(35)).await;
        let weak = Arc::downgrade(&sweep);
        drop(sweep);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(weak.upgrade().is_none());
    }
}
