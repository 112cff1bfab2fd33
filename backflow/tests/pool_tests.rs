use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use backflow::io::{Lines, MemoryChannelFactory, MemoryPeers};
use backflow::pool::{
    ConnectionPool, IdleCleanup, MaxConnectionsStrategy, PoolConfig, PoolConfigBuilder,
    PoolStateChange,
};
use backflow::runtime::EventLoopProvider;
use backflow::Error;
use tokio_stream::StreamExt;

static INIT_LOGGER: Once = Once::new();
const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Debug;

fn init_logger() {
    INIT_LOGGER.call_once(|| {
        env_logger::builder()
            // Suppress everything below `warn` for third-party modules
            .filter_level(log::LevelFilter::Warn)
            // Allow everything above `LOG_LEVEL` from current package
            .filter_module(env!("CARGO_PKG_NAME"), LOG_LEVEL)
            .is_test(true)
            .init();
    });
}

fn make_pool(config: PoolConfigBuilder) -> (ConnectionPool<String, String>, MemoryPeers) {
    init_logger();
    let (factory, peers) = MemoryChannelFactory::new(Lines::new());
    let pool = ConnectionPool::new(factory, config.build().unwrap()).unwrap();
    (pool, peers)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permits_are_conserved_under_concurrent_load() {
    const MAX_CONNECTIONS: usize = 4;

    let strategy = Arc::new(MaxConnectionsStrategy::new(MAX_CONNECTIONS));
    let (pool, _peers) = make_pool(
        PoolConfig::builder()
            .limit_strategy(strategy.clone())
            .idle_cleanup(IdleCleanup::Disabled),
    );

    let tasks: Vec<_> = (0..16)
        .map(|task| {
            let pool = pool.clone();
            let strategy = strategy.clone();
            tokio::spawn(async move {
                let mut acquired = 0;
                for round in 0..50 {
                    match pool.acquire().await {
                        Ok(connection) => {
                            acquired += 1;
                            match (task + round) % 3 {
                                0 => pool.release(connection).unwrap(),
                                1 => pool.discard(connection).unwrap(),
                                _ => drop(connection),
                            }
                        }
                        Err(Error::PoolExhausted) => tokio::task::yield_now().await,
                        Err(err) => panic!("unexpected acquire error: {err}"),
                    }
                    assert!(strategy.outstanding_permits() <= MAX_CONNECTIONS);
                }
                acquired
            })
        })
        .collect();

    let mut acquired = 0;
    for task in tasks {
        acquired += task.await.unwrap();
    }
    assert!(acquired > 0);

    pool.shutdown();
    assert_eq!(strategy.permits_granted(), strategy.permits_returned());
    assert_eq!(strategy.outstanding_permits(), 0);
    assert_eq!(pool.stats().total_connections, 0);
    assert_eq!(pool.stats().pending_acquires, 0);
    assert_eq!(pool.stats().pending_releases, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn acquire_racing_sweep_never_gets_expired_connection() {
    let (pool, _peers) = make_pool(
        PoolConfig::builder()
            .max_connections(4)
            .max_idle_time(Duration::from_millis(20))
            .cleanup_floor(Duration::from_millis(5))
            .idle_cleanup(IdleCleanup::Custom(EventLoopProvider::current().unwrap())),
    );

    for _ in 0..5 {
        let mut connections = Vec::new();
        for _ in 0..4 {
            connections.push(pool.acquire().await.unwrap());
        }
        drop(connections);
        assert_eq!(pool.idle_count(), 4);
        tokio::time::sleep(Duration::from_millis(25)).await;

        let sweep = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.evict_expired() })
        };
        let acquires: Vec<_> = (0..4)
            .map(|_| {
                let pool = pool.clone();
                tokio::spawn(async move {
                    let connection = pool.acquire().await.unwrap();
                    assert!(connection.is_usable());
                    connection
                })
            })
            .collect();

        sweep.await.unwrap();
        for acquire in acquires {
            drop(acquire.await.unwrap());
        }
        assert!(pool.stats().total_connections <= 4);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_connection_is_found_while_sweeps_run() {
    let (pool, _peers) = make_pool(
        PoolConfig::builder()
            .max_connections(1)
            .idle_cleanup(IdleCleanup::Disabled),
    );
    drop(pool.acquire().await.unwrap());

    let stop = Arc::new(AtomicBool::new(false));
    let sweepers: Vec<_> = (0..3)
        .map(|_| {
            let pool = pool.clone();
            let stop = stop.clone();
            std::thread::spawn(move || {
                while !stop.load(Ordering::Acquire) {
                    assert_eq!(pool.evict_expired(), 0);
                }
            })
        })
        .collect();

    let mut result = Ok(());
    for _ in 0..2_000 {
        match pool.acquire().await {
            Ok(connection) => drop(connection),
            Err(err) => {
                result = Err(err);
                break;
            }
        }
    }

    stop.store(true, Ordering::Release);
    for sweeper in sweepers {
        sweeper.join().unwrap();
    }
    assert!(result.is_ok(), "acquire failed: {result:?}");
    assert_eq!(pool.stats().total_connections, 1);
}

#[tokio::test(start_paused = true)]
async fn released_connection_is_reused_before_connecting() {
    let (pool, _peers) = make_pool(
        PoolConfig::builder()
            .max_connections(1)
            .idle_cleanup(IdleCleanup::Disabled),
    );

    let first = pool.acquire().await.unwrap();
    let id = first.id();
    assert!(matches!(pool.acquire().await, Err(Error::PoolExhausted)));

    pool.release(first).unwrap();
    tokio::time::advance(Duration::from_millis(100)).await;

    let second = pool.acquire().await.unwrap();
    assert_eq!(second.id(), id);
    assert_eq!(pool.stats().total_connections, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_connection_is_swept_and_permit_returned() {
    let (pool, _peers) = make_pool(
        PoolConfig::builder()
            .max_connections(1)
            .max_idle_time(Duration::from_millis(100))
            .idle_cleanup(IdleCleanup::Custom(EventLoopProvider::current().unwrap())),
    );
    let mut changes = pool.state_changes();

    drop(pool.acquire().await.unwrap());
    assert_eq!(pool.available_permits(), 0);

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(pool.idle_count(), 0);
    assert_eq!(pool.available_permits(), 1);

    let mut evicted = false;
    while let Ok(Some(change)) =
        tokio::time::timeout(Duration::from_millis(10), changes.next()).await
    {
        evicted |= change == PoolStateChange::ConnectionEviction;
    }
    assert!(evicted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_shutdown_discards_each_idle_connection_once() {
    let evictions = Arc::new(AtomicUsize::new(0));
    let listener = {
        let evictions = evictions.clone();
        move |change: PoolStateChange| {
            if change == PoolStateChange::ConnectionEviction {
                evictions.fetch_add(1, Ordering::AcqRel);
            }
        }
    };
    let (pool, _peers) = make_pool(
        PoolConfig::builder()
            .idle_cleanup(IdleCleanup::Disabled)
            .listener(Arc::new(listener)),
    );

    let mut connections = Vec::new();
    for _ in 0..8 {
        connections.push(pool.acquire().await.unwrap());
    }
    drop(connections);
    assert_eq!(pool.idle_count(), 8);

    let shutdowns: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { pool.shutdown() })
        })
        .collect();
    for shutdown in shutdowns {
        shutdown.await.unwrap();
    }

    assert_eq!(evictions.load(Ordering::Acquire), 8);
    assert_eq!(pool.idle_count(), 0);
    assert!(matches!(pool.acquire().await, Err(Error::PoolShutdown)));
}
