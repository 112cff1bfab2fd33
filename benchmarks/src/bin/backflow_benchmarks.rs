#[cfg(feature = "mpmc")]
use backflow_benchmarks::mpmc::{benchmark_mpmc_broadcast, benchmark_mpmc_collect};
#[cfg(feature = "pool")]
use backflow_benchmarks::pool::{benchmark_pool_churn, benchmark_pool_round_trip};

#[tokio::main]
async fn main() {
    // Setup logger
    env_logger::builder()
        .filter_level(log::LevelFilter::Info) // Suppress everything below `info` for third-party modules.
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Trace) // Allow everything from current package
        .init();

    #[cfg(feature = "mpmc")]
    {
        log::info!("[benchmark_mpmc_broadcast]");
        benchmark_mpmc_broadcast(1_000, 1_000).await;

        log::info!("[benchmark_mpmc_collect]");
        benchmark_mpmc_collect(100, 1_000).await;
    }

    #[cfg(feature = "pool")]
    {
        log::info!("[benchmark_pool_churn]");
        benchmark_pool_churn(64, 16, 1_000).await;

        log::info!("[benchmark_pool_round_trip]");
        benchmark_pool_round_trip(16, 1_000).await;
    }
}
