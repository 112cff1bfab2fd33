use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_stream::Stream;

use crate::io::channel::Channel;
use crate::io::{
    ChannelConfig, Connection, ConnectionDetails, ConnectionInfo, PipelineConfigurator,
    TransportEvents,
};
use crate::runtime::EventLoopProvider;
use crate::utils::net::resolve_socket_addr;

use crate::prelude::*;

/// TCP server.
///
/// Each accepted socket gets its own channel event loop and is handed out as a [`Connection`].
///
/// # Usage
///
/// ```rust,no_run
/// # #[tokio::main] async fn main() {
/// use backflow::io::{Lines, TcpServer};
/// use tokio_stream::StreamExt;
///
/// let server = TcpServer::bind("127.0.0.1:5600", Lines::new()).await.unwrap();
/// let incoming = server.incoming();
/// tokio::pin!(incoming);
///
/// while let Some(Ok(mut connection)) = incoming.next().await {
///     let mut input = connection.input();
///     while let Some(Ok(line)) = input.next().await {
///         connection.write_and_flush(line).await.unwrap();
///     }
/// }
/// # }
/// ```
pub struct TcpServer<P> {
    listener: TcpListener,
    bind_addr: SocketAddr,
    configurator: Arc<P>,
    transport_events: TransportEvents,
    provider: Option<EventLoopProvider>,
}

impl<P: PipelineConfigurator> TcpServer<P> {
    /// Binds to `addr`.
    ///
    /// Accepts as `addr` anything that implements [`ToSocketAddrs`], prefers IPv4 addresses if
    /// available.
    pub async fn bind(addr: impl ToSocketAddrs, configurator: P) -> Result<Self> {
        let addr = resolve_socket_addr(addr)?;
        let listener = TcpListener::bind(addr).await?;
        let bind_addr = listener.local_addr()?;
        log::debug!("[tcp server {bind_addr}] listening");

        Ok(Self {
            listener,
            bind_addr,
            configurator: Arc::new(configurator),
            transport_events: TransportEvents::none(),
            provider: None,
        })
    }

    /// Sets the transport events listener of accepted channels.
    pub fn with_transport_events(mut self, transport_events: TransportEvents) -> Self {
        self.transport_events = transport_events;
        self
    }

    /// Sets the runtime channel event loops are spawned on.
    pub fn with_provider(mut self, provider: EventLoopProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Address the server is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.bind_addr
    }

    /// Waits for the next peer.
    pub async fn accept(&self) -> Result<Connection<P::Read, P::Write>> {
        let (stream, peer_addr) = self.listener.accept().await?;
        let info = ConnectionInfo::new(ConnectionDetails::TcpServer {
            bind_addr: self.bind_addr,
            peer_addr,
        });
        log::debug!("[{info:?}] accepted");

        let mut config = ChannelConfig::default();
        let codec = self.configurator.configure(&mut config);
        let mut channel = Channel::new(stream, codec, info)
            .with_config(config)
            .with_transport_events(self.transport_events.clone());
        if let Some(provider) = &self.provider {
            channel = channel.with_provider(provider.clone());
        }

        channel.connect().await
    }

    /// Stream of accepted connections.
    pub fn incoming(self) -> impl Stream<Item = Result<Connection<P::Read, P::Write>>> {
        async_stream::stream! {
            loop {
                yield self.accept().await;
            }
        }
    }
}
