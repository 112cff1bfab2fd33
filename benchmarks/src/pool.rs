use std::time::Instant;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio_stream::StreamExt;

use backflow::io::{Lines, MemoryChannelFactory, MemoryPeers};
use backflow::pool::{ConnectionPool, IdleCleanup, PoolConfig, PooledConnection};
use backflow::Error;

fn make_pool(max_connections: usize) -> (ConnectionPool<String, String>, MemoryPeers) {
    let (factory, peers) = MemoryChannelFactory::new(Lines::new());
    let config = PoolConfig::builder()
        .max_connections(max_connections)
        .idle_cleanup(IdleCleanup::Disabled)
        .build()
        .unwrap();
    (ConnectionPool::new(factory, config).unwrap(), peers)
}

async fn acquire(pool: &ConnectionPool<String, String>) -> PooledConnection<String, String> {
    loop {
        match pool.acquire().await {
            Ok(connection) => return connection,
            Err(Error::PoolExhausted) => tokio::task::yield_now().await,
            Err(err) => panic!("acquire failed: {err:?}"),
        }
    }
}

/// Runs `n_tasks` tasks, each acquiring and releasing a connection `n_iter` times.
pub async fn benchmark_pool_churn(n_tasks: usize, max_connections: usize, n_iter: usize) {
    let (pool, _peers) = make_pool(max_connections);

    let started = Instant::now();
    let handles: Vec<_> = (0..n_tasks)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move {
                for _ in 0..n_iter {
                    let connection = acquire(&pool).await;
                    pool.release(connection).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }
    let elapsed = started.elapsed();

    log::info!(
        "[benchmark_pool_churn] {n_iter} acquire/release cycles per {n_tasks} tasks over {} connections: {}s",
        pool.stats().total_connections,
        elapsed.as_secs_f32()
    );
    pool.shutdown();
}

/// Sends `n_iter` line requests per connection through an in-memory echo peer.
pub async fn benchmark_pool_round_trip(max_connections: usize, n_iter: usize) {
    let (pool, mut peers) = make_pool(max_connections);

    tokio::spawn(async move {
        while let Some(peer) = peers.next().await {
            tokio::spawn(async move {
                let (reader, mut writer) = tokio::io::split(peer.into_stream());
                let mut lines = BufReader::new(reader).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if writer.write_all(format!("{line}\n").as_bytes()).await.is_err() {
                        break;
                    }
                }
            });
        }
    });

    let started = Instant::now();
    let handles: Vec<_> = (0..max_connections)
        .map(|task| {
            let pool = pool.clone();
            tokio::spawn(async move {
                for i in 0..n_iter {
                    let mut connection = acquire(&pool).await;
                    let mut input = connection.input();
                    let request = format!("{task}:{i}");
                    connection.write_and_flush(request.clone()).await.unwrap();
                    assert_eq!(input.next().await.unwrap().unwrap(), request);
                    drop(input);
                    connection.close(false).await.unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.await.unwrap();
    }

    log::info!(
        "[benchmark_pool_round_trip] {n_iter} round trips over {max_connections} pooled connections: {}s",
        started.elapsed().as_secs_f32()
    );
    pool.shutdown();
}
