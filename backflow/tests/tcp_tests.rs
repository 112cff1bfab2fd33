use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use portpicker::Port;
use tokio_stream::StreamExt;

use backflow::io::{
    ChannelFactory, ConnectionInfo, Lines, TcpChannelFactory, TcpServer, TransportEvent,
    TransportEvents,
};
use backflow::pool::{ConnectionPool, PoolConfig};
use backflow::Error;

static INIT_LOGGER: Once = Once::new();
const LOG_LEVEL: log::LevelFilter = log::LevelFilter::Debug;
const HOST: &str = "127.0.0.1";
const HOLD_DURATION: Duration = Duration::from_millis(500);

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

fn unused_port() -> Port {
    portpicker::pick_unused_port().unwrap()
}

fn make_addr(port: Port) -> String {
    format!("{HOST}:{port}")
}

/// Answers every line with `echo: <line>`.
async fn spawn_echo_server(addr: &str) {
    let server = TcpServer::bind(addr, Lines::new()).await.unwrap();
    tokio::spawn(async move {
        let mut incoming = std::pin::pin!(server.incoming());
        while let Some(Ok(mut connection)) = incoming.next().await {
            tokio::spawn(async move {
                let mut input = connection.input();
                while let Some(Ok(line)) = input.next().await {
                    if connection
                        .write_and_flush(format!("echo: {line}"))
                        .await
                        .is_err()
                    {
                        break;
                    }
                }
            });
        }
    });
}

/// Sends a greeting to every peer right after accepting it and keeps the socket open for a while.
async fn spawn_greeting_server(addr: &str) {
    let server = TcpServer::bind(addr, Lines::new()).await.unwrap();
    tokio::spawn(async move {
        while let Ok(connection) = server.accept().await {
            tokio::spawn(async move {
                let _ = connection.write_and_flush("hello".to_string()).await;
                tokio::time::sleep(HOLD_DURATION).await;
                drop(connection);
            });
        }
    });
}

#[tokio::test(flavor = "multi_thread")]
async fn pooled_connections_talk_to_echo_server() {
    init_logger();
    let addr = make_addr(unused_port());
    spawn_echo_server(&addr).await;

    let factory = TcpChannelFactory::new(addr.as_str(), Lines::new()).unwrap();
    let config = PoolConfig::builder().max_connections(2).build().unwrap();
    let pool = ConnectionPool::new(factory, config).unwrap();

    for i in 0..5 {
        let mut connection = pool.acquire().await.unwrap();
        let mut input = connection.input();
        connection
            .write_and_flush(format!("request {i}"))
            .await
            .unwrap();
        assert_eq!(
            input.next().await.unwrap().unwrap(),
            format!("echo: request {i}")
        );
        connection.close(true).await.unwrap();
    }

    let stats = pool.stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.idle_count, 1);
    pool.shutdown();
}

#[tokio::test(flavor = "multi_thread")]
async fn writes_are_acknowledged_in_order() {
    init_logger();
    let addr = make_addr(unused_port());
    spawn_echo_server(&addr).await;

    let factory = TcpChannelFactory::new(addr.as_str(), Lines::new()).unwrap();
    let mut connection = factory.connect().await.unwrap();
    let mut input = connection.input();
    input.request(3);

    let completions: Vec<_> = (0..3)
        .map(|i| connection.write(format!("line {i}")))
        .collect();
    connection.flush().await.unwrap();
    for completion in completions {
        completion.await.unwrap();
    }

    for i in 0..3 {
        assert_eq!(
            input.next().await.unwrap().unwrap(),
            format!("echo: line {i}")
        );
    }
    connection.close().await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn lazy_input_on_auto_read_channel_is_rejected() {
    init_logger();
    let addr = make_addr(unused_port());
    spawn_greeting_server(&addr).await;

    let factory = TcpChannelFactory::new(addr.as_str(), Lines::new().auto_read(true)).unwrap();
    let mut connection = factory.connect().await.unwrap();
    let mut input = connection.input();

    assert!(matches!(
        input.next().await,
        Some(Err(Error::LazyInputSubscription))
    ));
    assert!(connection.is_active());
}

#[tokio::test(flavor = "multi_thread")]
async fn eager_input_on_auto_read_channel_receives_early_data() {
    init_logger();
    let addr = make_addr(unused_port());
    spawn_greeting_server(&addr).await;

    let configurator = Lines::new().auto_read(true).eager_input(true);
    let factory = TcpChannelFactory::new(addr.as_str(), configurator).unwrap();
    let mut connection = factory.connect().await.unwrap();
    let mut input = connection.input();

    assert_eq!(input.next().await.unwrap().unwrap(), "hello");
}

#[tokio::test(flavor = "multi_thread")]
async fn connect_failure_is_reported() {
    init_logger();
    let events = Arc::new(Mutex::new(Vec::new()));
    let transport_events = {
        let events = events.clone();
        TransportEvents::new(Arc::new(move |_: &ConnectionInfo, event: &TransportEvent| {
            events.lock().unwrap().push(event.clone());
        }))
    };

    let factory = TcpChannelFactory::new(make_addr(unused_port()), Lines::new())
        .unwrap()
        .with_transport_events(transport_events);
    let config = PoolConfig::builder().max_connections(1).build().unwrap();
    let pool = ConnectionPool::new(factory, config).unwrap();

    assert!(pool.acquire().await.unwrap_err().is_io());
    assert_eq!(pool.available_permits(), 1);

    let events = events.lock().unwrap();
    assert_eq!(events.first(), Some(&TransportEvent::ConnectStart));
    assert!(matches!(
        events.last(),
        Some(TransportEvent::ConnectFailed { .. })
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn server_side_input_ends_when_client_closes() {
    init_logger();
    let addr = make_addr(unused_port());
    let server = TcpServer::bind(addr.as_str(), Lines::new()).await.unwrap();

    let factory = TcpChannelFactory::new(addr.as_str(), Lines::new()).unwrap();
    let client = factory.connect().await.unwrap();
    let mut accepted = server.accept().await.unwrap();

    client.write_and_flush("bye".to_string()).await.unwrap();
    client.close().await.unwrap();

    let mut input = accepted.input();
    assert_eq!(input.next().await.unwrap().unwrap(), "bye");
    assert!(input.next().await.is_none());
}
