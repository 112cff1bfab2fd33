//! # In-memory transport
//!
//! Every connect creates a [`tokio::io::duplex`] pipe. The channel side is served by a regular
//! channel event loop, the peer side is published through [`MemoryPeers`].

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::consts::DEFAULT_MEMORY_TRANSPORT_CAPACITY;
use crate::io::channel::Channel;
use crate::io::{
    ChannelConfig, ChannelFactory, Connection, ConnectionDetails, ConnectionInfo,
    PipelineConfigurator, TransportEvent, TransportEvents,
};
use crate::runtime::EventLoopProvider;

use crate::prelude::*;

/// Factory of in-memory connections.
///
/// # Usage
///
/// ```rust,no_run
/// # #[tokio::main] async fn main() {
/// use backflow::io::{ChannelFactory, Lines, MemoryChannelFactory};
/// use tokio::io::AsyncWriteExt;
/// use tokio_stream::StreamExt;
///
/// let (factory, mut peers) = MemoryChannelFactory::new(Lines::new());
/// let mut connection = factory.connect().await.unwrap();
///
/// let mut peer = peers.next().await.unwrap();
/// peer.stream().write_all(b"hello\n").await.unwrap();
///
/// let mut input = connection.input();
/// assert_eq!(input.next().await.unwrap().unwrap(), "hello");
/// # }
/// ```
pub struct MemoryChannelFactory<P> {
    configurator: Arc<P>,
    capacity: usize,
    seq: AtomicU64,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    transport_events: TransportEvents,
    provider: Option<EventLoopProvider>,
}

impl<P: PipelineConfigurator> MemoryChannelFactory<P> {
    /// Creates a factory and the receiver of peer ends.
    pub fn new(configurator: P) -> (Self, MemoryPeers) {
        let (tx, rx) = mpsc::unbounded_channel();
        let factory = Self {
            configurator: Arc::new(configurator),
            capacity: DEFAULT_MEMORY_TRANSPORT_CAPACITY,
            seq: AtomicU64::new(0),
            peers: tx,
            transport_events: TransportEvents::none(),
            provider: None,
        };
        (factory, MemoryPeers { rx })
    }

    /// Sets the buffer size of created pipes.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
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

    /// Number of connections created so far.
    pub fn created(&self) -> u64 {
        self.seq.load(Ordering::Acquire)
    }
}

#[async_trait]
impl<P: PipelineConfigurator> ChannelFactory<P::Read, P::Write> for MemoryChannelFactory<P> {
    async fn connect(&self) -> Result<Connection<P::Read, P::Write>> {
        let seq = self.seq.fetch_add(1, Ordering::AcqRel);
        let info = ConnectionInfo::new(ConnectionDetails::Memory { seq });
        let started = Instant::now();
        self.transport_events
            .emit(&info, TransportEvent::ConnectStart);

        let (local, remote) = tokio::io::duplex(self.capacity);
        if self.peers.send(MemoryPeer { seq, stream: remote }).is_err() {
            log::trace!("[{info:?}] peer receiver is gone, peer end dropped");
        }
        self.transport_events.emit(
            &info,
            TransportEvent::ConnectSuccess {
                duration: started.elapsed(),
            },
        );

        let mut config = ChannelConfig::default();
        let codec = self.configurator.configure(&mut config);
        let mut channel = Channel::new(local, codec, info)
            .with_config(config)
            .with_transport_events(self.transport_events.clone());
        if let Some(provider) = &self.provider {
            channel = channel.with_provider(provider.clone());
        }

        channel.connect().await
    }
}

/// Receiver of peer ends created by a [`MemoryChannelFactory`].
///
/// Implements [`Stream`](tokio_stream::Stream), ends when the factory is dropped.
#[derive(Debug)]
pub struct MemoryPeers {
    rx: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryPeers {
    /// Returns an already created peer without waiting.
    pub fn try_next(&mut self) -> Option<MemoryPeer> {
        self.rx.try_recv().ok()
    }
}

impl tokio_stream::Stream for MemoryPeers {
    type Item = MemoryPeer;

    fn poll_next(
        self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<MemoryPeer>> {
        self.get_mut().rx.poll_recv(cx)
    }
}

/// Remote end of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    seq: u64,
    stream: DuplexStream,
}

impl MemoryPeer {
    /// Sequence number matching [`ConnectionDetails::Memory`] of the channel side.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Peer stream.
    pub fn stream(&mut self) -> &mut DuplexStream {
        &mut self.stream
    }

    /// Consumes the peer and returns its stream.
    pub fn into_stream(self) -> DuplexStream {
        self.stream
    }
}
