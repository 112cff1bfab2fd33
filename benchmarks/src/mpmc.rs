use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Barrier;

use backflow::pool::PoolStateChange;
use backflow::utils::mpmc;

/// Fans `n_iter` state changes out to `n_receivers` tasks.
pub async fn benchmark_mpmc_broadcast(n_receivers: usize, n_iter: usize) {
    let (tx, rx) = mpmc::channel(n_iter.max(1));
    let start = Arc::new(Barrier::new(n_receivers + 1));

    let handles: Vec<_> = (0..n_receivers)
        .map(|_| {
            let mut rx = rx.clone();
            let start = start.clone();
            tokio::spawn(async move {
                start.wait().await;
                for _ in 0..n_iter {
                    rx.recv().await.unwrap();
                }
            })
        })
        .collect();
    drop(rx);

    start.wait().await;
    let started = Instant::now();
    for i in 0..n_iter {
        let change = if i % 2 == 0 {
            PoolStateChange::AcquireAttempted
        } else {
            PoolStateChange::AcquireSucceeded
        };
        tx.send(change);
    }
    for handle in handles {
        handle.await.unwrap();
    }

    log::info!(
        "[benchmark_mpmc_broadcast] send {n_iter} state changes to {n_receivers} receivers: {}s",
        started.elapsed().as_secs_f32()
    )
}

/// Collects state changes from `n_senders` tasks sending `n_iter` values each.
pub async fn benchmark_mpmc_collect(n_senders: usize, n_iter: usize) {
    let (tx, mut rx) = mpmc::channel(n_senders * n_iter);
    let start = Arc::new(Barrier::new(n_senders + 1));

    for _ in 0..n_senders {
        let tx = tx.clone();
        let start = start.clone();
        tokio::spawn(async move {
            start.wait().await;
            for _ in 0..n_iter {
                tx.send(PoolStateChange::ReleaseSucceeded);
            }
        });
    }

    start.wait().await;
    let started = Instant::now();
    for _ in 0..n_senders * n_iter {
        rx.recv().await.unwrap();
    }

    log::info!(
        "[benchmark_mpmc_collect] {n_iter} per {n_senders} senders to a single receiver: {}s",
        started.elapsed().as_secs_f32()
    )
}
