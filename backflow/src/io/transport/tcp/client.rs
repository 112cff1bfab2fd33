use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::net::TcpStream;

use crate::io::channel::Channel;
use crate::io::{
    ChannelConfig, ChannelFactory, Connection, ConnectionDetails, ConnectionInfo,
    PipelineConfigurator, TransportEvent, TransportEvents,
};
use crate::runtime::EventLoopProvider;
use crate::utils::net::resolve_socket_addr;

use crate::prelude::*;

/// Factory of outgoing TCP connections.
///
/// # Usage
///
/// ```rust,no_run
/// # #[tokio::main] async fn main() {
/// use backflow::io::{ChannelFactory, Lines, TcpChannelFactory};
///
/// let factory = TcpChannelFactory::new("127.0.0.1:5600", Lines::new()).unwrap();
/// let connection = factory.connect().await.unwrap();
/// connection.write_and_flush("hello".to_string()).await.unwrap();
/// # }
/// ```
pub struct TcpChannelFactory<P> {
    addr: SocketAddr,
    configurator: Arc<P>,
    transport_events: TransportEvents,
    provider: Option<EventLoopProvider>,
    nodelay: bool,
}

impl<P: PipelineConfigurator> TcpChannelFactory<P> {
    /// Creates a factory connecting to `addr`.
    ///
    /// Accepts as `addr` anything that implements [`ToSocketAddrs`], prefers IPv4 addresses if
    /// available.
    pub fn new(addr: impl ToSocketAddrs, configurator: P) -> Result<Self> {
        Ok(Self {
            addr: resolve_socket_addr(addr)?,
            configurator: Arc::new(configurator),
            transport_events: TransportEvents::none(),
            provider: None,
            nodelay: true,
        })
    }

    /// Sets the transport events listener of created channels.
    pub fn with_transport_events(mut self, transport_events: TransportEvents) -> Self {
        self.transport_events = transport_events;
        self
    }

    /// Sets the runtime channel event loops are spawned on.
    pub fn with_provider(mut self, provider: EventLoopProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Enables or disables `TCP_NODELAY` on created sockets. Enabled by default.
    pub fn with_nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// Server address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl<P: PipelineConfigurator> ChannelFactory<P::Read, P::Write> for TcpChannelFactory<P> {
    async fn connect(&self) -> Result<Connection<P::Read, P::Write>> {
        let info = ConnectionInfo::new(ConnectionDetails::TcpClient {
            remote_addr: self.addr,
        });
        self.transport_events
            .emit(&info, TransportEvent::ConnectStart);

        let started = Instant::now();
        let stream = match TcpStream::connect(self.addr).await {
            Ok(stream) => stream,
            Err(err) => {
                log::debug!("[{info:?}] connect failed: {err:?}");
                self.transport_events.emit(
                    &info,
                    TransportEvent::ConnectFailed {
                        duration: started.elapsed(),
                    },
                );
                return Err(err.into());
            }
        };
        if let Err(err) = stream.set_nodelay(self.nodelay) {
            log::trace!("[{info:?}] can't set TCP_NODELAY: {err:?}");
        }
        self.transport_events.emit(
            &info,
            TransportEvent::ConnectSuccess {
                duration: started.elapsed(),
            },
        );

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
}
