use std::time::Duration;

use tokio_stream::StreamExt;

use backflow::io::{Lines, TcpChannelFactory, TcpServer};
use backflow::pool::{ConnectionPool, PoolConfig};
use backflow::Error;

const ADDR: &str = "127.0.0.1:5601";
const N_REQUESTS: usize = 12;

async fn serve() {
    let server = TcpServer::bind(ADDR, Lines::new()).await.unwrap();
    tokio::task::spawn(async move {
        let mut incoming = std::pin::pin!(server.incoming());
        while let Some(Ok(mut connection)) = incoming.next().await {
            tokio::task::spawn(async move {
                let id = connection.id();
                let mut input = connection.input();
                while let Some(Ok(line)) = input.next().await {
                    let reply = format!("{line} served by {id}");
                    if connection.write_and_flush(reply).await.is_err() {
                        break;
                    }
                }
            });
        }
    });
}

async fn request(pool: ConnectionPool<String, String>, i: usize) -> backflow::Result<String> {
    let mut connection = loop {
        match pool.acquire().await {
            Ok(connection) => break connection,
            Err(Error::PoolExhausted) => tokio::time::sleep(Duration::from_millis(5)).await,
            Err(err) => return Err(err),
        }
    };

    let mut input = connection.input();
    connection.write_and_flush(format!("request #{i}")).await?;
    let reply = input.next().await.unwrap_or(Err(Error::ChannelClosed))?;

    connection.close(true).await?;
    Ok(reply)
}

async fn run() {
    serve().await;

    let factory = TcpChannelFactory::new(ADDR, Lines::new()).unwrap();
    let config = PoolConfig::builder()
        .max_connections(3)
        .max_idle_time(Duration::from_secs(5))
        .build()
        .unwrap();
    let pool = ConnectionPool::new(factory, config).unwrap();

    let mut changes = pool.state_changes();
    tokio::task::spawn(async move {
        while let Some(change) = changes.next().await {
            log::info!("[pool] {change:?}");
        }
    });

    let handles: Vec<_> = (0..N_REQUESTS)
        .map(|i| tokio::task::spawn(request(pool.clone(), i)))
        .collect();
    for handle in handles {
        match handle.await.unwrap() {
            Ok(reply) => log::info!("[client] {reply}"),
            Err(err) => log::error!("[client] request failed: {err:?}"),
        }
    }

    log::info!("[pool] {:?}", pool.stats());
    pool.shutdown();
}

#[tokio::main]
async fn main() {
    // Setup logger
    env_logger::builder()
        .filter_level(log::LevelFilter::Info) // Suppress everything below `info` for third-party modules.
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Trace) // Allow everything from current package
        .init();

    run().await;
}
