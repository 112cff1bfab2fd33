use std::time::Duration;

use tokio_stream::StreamExt;

use backflow::io::{ChannelFactory, Lines, TcpChannelFactory, TcpServer};

const ADDR: &str = "127.0.0.1:5600";

async fn run() {
    let server = TcpServer::bind(ADDR, Lines::new()).await.unwrap();
    tokio::task::spawn(async move {
        let mut incoming = std::pin::pin!(server.incoming());
        while let Some(Ok(mut connection)) = incoming.next().await {
            log::info!("[server] accepted {:?}", connection.info());
            let mut input = connection.input();
            while let Some(Ok(line)) = input.next().await {
                log::info!("[server] received: {line}");
                if let Err(err) = connection.write_and_flush(line.to_uppercase()).await {
                    log::error!("[server] write failed: {err:?}");
                    break;
                }
            }
        }
    });

    let factory = TcpChannelFactory::new(ADDR, Lines::new()).unwrap();
    let mut client = factory.connect().await.unwrap();
    let mut input = client.input();
    input.request(10);

    for i in 0..10 {
        let _ = client.write(format!("line #{i}"));
    }
    client.flush().await.unwrap();

    for _ in 0..10 {
        match tokio::time::timeout(Duration::from_secs(1), input.next()).await {
            Ok(Some(Ok(line))) => log::info!("[client] received: {line}"),
            Ok(Some(Err(err))) => {
                log::error!("[client] error: {err:?}");
                break;
            }
            Ok(None) | Err(_) => break,
        }
    }

    client.close().await.unwrap();
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // Setup logger
    env_logger::builder()
        .filter_level(log::LevelFilter::Info) // Suppress everything below `info` for third-party modules.
        .filter_module(env!("CARGO_PKG_NAME"), log::LevelFilter::Trace) // Allow everything from current package
        .init();

    run().await;
}
