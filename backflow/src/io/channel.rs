//! # Channel event loop
//!
//! Every physical connection is served by a single task that owns the socket, the codec and the
//! [`ConnectionBridge`]. Handles living on other tasks never touch that state directly, they post
//! [`ChannelEvent`]s into the task queue.

use std::io;
use std::sync::Arc;
use std::time::Instant;

use bytes::BytesMut;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::codec::{Decoder, Encoder};

use crate::io::bridge::ConnectionBridge;
use crate::io::producer::{InputControl, InputId, ReadProducer};
use crate::io::{
    ChannelAttributes, ChannelConfig, Connection, ConnectionInfo, Input, TransportEvent,
    TransportEvents,
};
use crate::runtime::EventLoopProvider;
use crate::utils::{Closable, Closer};

use crate::prelude::*;

/// Receiver of a single emitted connection.
pub(crate) type ConnectionSubscriber<R, W> = oneshot::Sender<Result<Connection<R, W>>>;

/// Events posted into a channel event loop.
pub(crate) enum ChannelEvent<R, W> {
    SubscribeConnection(ConnectionSubscriber<R, W>),
    EmitConnection,
    SubscribeInput(Arc<ReadProducer<R>>),
    InputUnsubscribed(InputId),
    Reuse(oneshot::Sender<Option<Input<R>>>),
    ReadRequested,
    Write(W, oneshot::Sender<Result<()>>),
    Flush(oneshot::Sender<Result<()>>),
    CancelPendingWrites,
    Close {
        flush: bool,
        reply: Option<oneshot::Sender<Result<()>>>,
    },
}

/// [`InputControl`] posting into a channel event loop.
pub(crate) struct ChannelControl<R, W> {
    events: mpsc::WeakUnboundedSender<ChannelEvent<R, W>>,
}

impl<R: Send + 'static, W: Send + 'static> ChannelControl<R, W> {
    pub(crate) fn shared(
        events: mpsc::WeakUnboundedSender<ChannelEvent<R, W>>,
    ) -> Arc<dyn InputControl> {
        Arc::new(Self { events })
    }
}

impl<R: Send, W: Send> InputControl for ChannelControl<R, W> {
    fn request_read(&self) {
        if let Some(events) = self.events.upgrade() {
            let _ = events.send(ChannelEvent::ReadRequested);
        }
    }

    fn unsubscribed(&self, id: InputId) {
        if let Some(events) = self.events.upgrade() {
            let _ = events.send(ChannelEvent::InputUnsubscribed(id));
        }
    }
}

/// Everything the bridge needs to mint connections and inputs for its channel.
pub(crate) struct ChannelHandle<R, W> {
    info: ConnectionInfo,
    config: ChannelConfig,
    events: mpsc::WeakUnboundedSender<ChannelEvent<R, W>>,
    attributes: Arc<ChannelAttributes>,
    state: Closable,
}

impl<R: Send + 'static, W: Send + 'static> ChannelHandle<R, W> {
    pub(crate) fn new(
        info: ConnectionInfo,
        config: ChannelConfig,
        events: mpsc::WeakUnboundedSender<ChannelEvent<R, W>>,
        attributes: Arc<ChannelAttributes>,
        state: Closable,
    ) -> Self {
        Self {
            info,
            config,
            events,
            attributes,
            state,
        }
    }

    pub(crate) fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    pub(crate) fn config(&self) -> &ChannelConfig {
        &self.config
    }

    pub(crate) fn attributes(&self) -> &ChannelAttributes {
        &self.attributes
    }

    pub(crate) fn control(&self) -> Arc<dyn InputControl> {
        ChannelControl::shared(self.events.clone())
    }

    /// Creates a connection handle, `None` if the event loop is no longer reachable.
    pub(crate) fn connection(&self, eager_input: Option<Input<R>>) -> Option<Connection<R, W>> {
        let events = self.events.upgrade()?;
        Some(Connection::new(
            self.info.clone(),
            self.config.clone(),
            events,
            self.attributes.clone(),
            self.state.clone(),
            eager_input,
        ))
    }
}

/// <sup>[`unstable`](crate#features)</sup>
/// Unspawned channel over an arbitrary duplex transport.
///
/// Custom transports create a channel from an I/O object and a codec and then either
/// [`Channel::connect`] it, which spawns the event loop and waits for the emitted
/// [`Connection`], or defer emission until an external stage (like a handshake) completes.
pub struct Channel<T, C, R, W> {
    io: T,
    codec: C,
    info: ConnectionInfo,
    config: ChannelConfig,
    transport_events: TransportEvents,
    provider: Option<EventLoopProvider>,
    events_tx: mpsc::UnboundedSender<ChannelEvent<R, W>>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent<R, W>>,
    deferred: bool,
}

impl<T, C, R, W> Channel<T, C, R, W>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    C: Decoder<Item = R, Error = Error> + Encoder<W, Error = Error> + Send + 'static,
    R: Send + 'static,
    W: Send + 'static,
{
    /// Creates a channel over `io` with default configuration.
    pub fn new(io: T, codec: C, info: ConnectionInfo) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            io,
            codec,
            info,
            config: ChannelConfig::default(),
            transport_events: TransportEvents::none(),
            provider: None,
            events_tx,
            events_rx,
            deferred: false,
        }
    }

    /// Sets channel configuration.
    pub fn with_config(mut self, config: ChannelConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the transport events listener.
    pub fn with_transport_events(mut self, transport_events: TransportEvents) -> Self {
        self.transport_events = transport_events;
        self
    }

    /// Sets the runtime the event loop is spawned on. Defaults to [`EventLoopProvider::global`].
    pub fn with_provider(mut self, provider: EventLoopProvider) -> Self {
        self.provider = Some(provider);
        self
    }

    #[cfg_attr(not(feature = "unstable"), allow(dead_code))]
    /// Defers connection emission until the returned trigger fires.
    ///
    /// Dropping the trigger without firing it closes the channel.
    pub fn defer_emission(&mut self) -> EmissionTrigger<R, W> {
        self.deferred = true;
        EmissionTrigger {
            events: self.events_tx.clone(),
            fired: false,
        }
    }

    /// Spawns the event loop and waits for the connection to be emitted.
    pub async fn connect(self) -> Result<Connection<R, W>> {
        let (tx, rx) = oneshot::channel();
        self.spawn(Some(tx))?;
        rx.await.map_err(|_| Error::ChannelClosed)?
    }

    /// Spawns the event loop. The connection is emitted to `subscriber`, a channel without a
    /// subscriber is closed right after it becomes active.
    pub(crate) fn spawn(
        self,
        subscriber: Option<ConnectionSubscriber<R, W>>,
    ) -> Result<JoinHandle<()>> {
        let provider = match self.provider {
            Some(provider) => provider,
            None => EventLoopProvider::global()?,
        };
        let info = self.info;
        let state = Closer::new();
        let attributes = Arc::new(ChannelAttributes::default());

        let handle = ChannelHandle::new(
            info.clone(),
            self.config.clone(),
            self.events_tx.downgrade(),
            attributes,
            state.to_closable(),
        );
        let mut bridge = ConnectionBridge::new(handle);
        if let Some(subscriber) = subscriber {
            bridge.subscribe_connection(subscriber);
        }

        let (reader, writer) = tokio::io::split(self.io);
        let task = ChannelTask {
            info: info.clone(),
            read_buf: BytesMut::with_capacity(self.config.read_buffer_capacity()),
            config: self.config,
            reader,
            writer,
            codec: self.codec,
            write_buf: BytesMut::new(),
            pending_writes: Vec::new(),
            close_replies: Vec::new(),
            events_rx: self.events_rx,
            bridge,
            state,
            transport_events: self.transport_events,
            read_closed: false,
            close_started: None,
            emitter: Some(self.events_tx),
        };

        log::trace!("[{info:?}] spawning channel event loop");
        let deferred = self.deferred;
        let handler = provider.spawn(task.run(deferred));

        Ok(provider.spawn(async move {
            if let Err(err) = handler.await {
                log::error!("[{info:?}] channel event loop failed: {err:?}");
            }
        }))
    }
}

/// Fires a deferred connection emission.
///
/// Obtained from [`Channel::defer_emission`].
#[cfg_attr(not(feature = "unstable"), allow(dead_code))]
pub struct EmissionTrigger<R, W> {
    events: mpsc::UnboundedSender<ChannelEvent<R, W>>,
    fired: bool,
}

#[cfg_attr(not(feature = "unstable"), allow(dead_code))]
impl<R, W> EmissionTrigger<R, W> {
    /// Emits the connection to its subscriber.
    pub fn fire(mut self) {
        self.fired = true;
        let _ = self.events.send(ChannelEvent::EmitConnection);
    }
}

impl<R, W> Drop for EmissionTrigger<R, W> {
    fn drop(&mut self) {
        if !self.fired {
            let _ = self.events.send(ChannelEvent::Close {
                flush: false,
                reply: None,
            });
        }
    }
}

enum Flow {
    Continue,
    Break,
}

enum Step<E> {
    Event(Option<E>),
    Read(io::Result<usize>),
}

struct ChannelTask<T, C, R, W> {
    info: ConnectionInfo,
    config: ChannelConfig,
    reader: ReadHalf<T>,
    writer: WriteHalf<T>,
    codec: C,
    read_buf: BytesMut,
    write_buf: BytesMut,
    pending_writes: Vec<oneshot::Sender<Result<()>>>,
    close_replies: Vec<oneshot::Sender<Result<()>>>,
    events_rx: mpsc::UnboundedReceiver<ChannelEvent<R, W>>,
    bridge: ConnectionBridge<R, W>,
    state: Closer,
    transport_events: TransportEvents,
    read_closed: bool,
    close_started: Option<Instant>,
    /// Keeps the queue open until the connection is emitted.
    emitter: Option<mpsc::UnboundedSender<ChannelEvent<R, W>>>,
}

impl<T, C, R, W> ChannelTask<T, C, R, W>
where
    T: AsyncRead + AsyncWrite + Send + 'static,
    C: Decoder<Item = R, Error = Error> + Encoder<W, Error = Error> + Send + 'static,
    R: Send + 'static,
    W: Send + 'static,
{
    async fn run(mut self, deferred: bool) {
        let info = self.info.clone();
        log::debug!("[{info:?}] channel active");

        if !deferred {
            self.emit_connection();
        }

        'run: loop {
            if self.bridge.close_requested() {
                break;
            }
            if self.read_closed && self.read_buf.is_empty() {
                log::debug!("[{info:?}] peer closed connection");
                break;
            }

            let read_enabled =
                !self.read_closed && (self.config.auto_read() || self.bridge.should_read_more());
            if read_enabled {
                self.read_buf.reserve(self.config.read_buffer_capacity());
            }

            let step = tokio::select! {
                biased;
                event = self.events_rx.recv() => Step::Event(event),
                read = self.reader.read_buf(&mut self.read_buf), if read_enabled => Step::Read(read),
            };

            match step {
                Step::Event(None) => {
                    log::trace!("[{info:?}] all channel handles are dropped");
                    break;
                }
                Step::Event(Some(event)) => {
                    if let Flow::Break = self.handle_event(event).await {
                        break;
                    }
                    while let Ok(event) = self.events_rx.try_recv() {
                        if let Flow::Break = self.handle_event(event).await {
                            break 'run;
                        }
                    }
                    self.bridge.end_of_turn();
                    self.decode();
                }
                Step::Read(Ok(0)) => {
                    self.read_closed = true;
                    self.decode();
                }
                Step::Read(Ok(count)) => {
                    log::trace!("[{info:?}] read {count} bytes");
                    self.transport_events
                        .emit(&info, TransportEvent::BytesRead { count });
                    self.decode();
                }
                Step::Read(Err(err)) => {
                    log::debug!("[{info:?}] read failed: {err:?}");
                    if let Some(err) = self.bridge.on_exception(Error::from(err)) {
                        log::debug!("[{info:?}] unhandled channel error: {err}");
                    }
                    break;
                }
            }
        }

        self.teardown().await;
    }

    async fn handle_event(&mut self, event: ChannelEvent<R, W>) -> Flow {
        match event {
            ChannelEvent::SubscribeConnection(subscriber) => {
                self.bridge.subscribe_connection(subscriber)
            }
            ChannelEvent::EmitConnection => self.emit_connection(),
            ChannelEvent::SubscribeInput(producer) => self.bridge.subscribe_input(producer),
            ChannelEvent::InputUnsubscribed(id) => self.bridge.input_unsubscribed(id),
            ChannelEvent::Reuse(reply) => {
                let eager_input = self.bridge.reset_input();
                let _ = reply.send(eager_input);
            }
            ChannelEvent::ReadRequested => {}
            ChannelEvent::Write(item, ack) => self.write(item, ack),
            ChannelEvent::Flush(ack) => return self.flush(Some(ack)).await,
            ChannelEvent::CancelPendingWrites => self.cancel_pending_writes(),
            ChannelEvent::Close { flush, reply } => {
                self.close_started = Some(Instant::now());
                if flush {
                    let _ = self.flush(None).await;
                }
                if let Some(reply) = reply {
                    self.close_replies.push(reply);
                }
                return Flow::Break;
            }
        }

        if self.bridge.close_requested() {
            Flow::Break
        } else {
            Flow::Continue
        }
    }

    fn emit_connection(&mut self) {
        self.bridge.emit_connection();
        // From now on only connection handles keep the queue open.
        self.emitter = None;
    }

    /// Decodes buffered bytes while somebody wants items.
    fn decode(&mut self) {
        while !self.read_buf.is_empty()
            && (self.config.auto_read() || self.bridge.should_read_more())
        {
            let decoded = if self.read_closed {
                self.codec.decode_eof(&mut self.read_buf)
            } else {
                self.codec.decode(&mut self.read_buf)
            };

            match decoded {
                Ok(Some(item)) => self.bridge.on_read(Ok(item)),
                Ok(None) => {
                    if self.read_closed {
                        self.read_buf.clear();
                    }
                    break;
                }
                Err(err) => {
                    self.read_buf.clear();
                    self.bridge.on_read(Err(err));
                    break;
                }
            }
        }
    }

    fn write(&mut self, item: W, ack: oneshot::Sender<Result<()>>) {
        let before = self.write_buf.len();
        match self.codec.encode(item, &mut self.write_buf) {
            Ok(_) => {
                let bytes = self.write_buf.len() - before;
                self.transport_events
                    .emit(&self.info, TransportEvent::WriteSuccess { bytes });
                self.pending_writes.push(ack);
            }
            Err(err) => {
                self.write_buf.truncate(before);
                let _ = ack.send(Err(err));
            }
        }
    }

    async fn flush(&mut self, ack: Option<oneshot::Sender<Result<()>>>) -> Flow {
        let info = self.info.clone();
        let started = Instant::now();

        match self.flush_buffer().await {
            Ok(_) => {
                for pending in self.pending_writes.drain(..) {
                    let _ = pending.send(Ok(()));
                }
                if let Some(ack) = ack {
                    let _ = ack.send(Ok(()));
                }
                log::trace!("[{info:?}] flushed");
                self.transport_events.emit(
                    &info,
                    TransportEvent::FlushSuccess {
                        duration: started.elapsed(),
                    },
                );
                Flow::Continue
            }
            Err(err) => {
                let err = Error::from(err);
                for pending in self.pending_writes.drain(..) {
                    let _ = pending.send(Err(err.clone()));
                }
                if let Some(ack) = ack {
                    let _ = ack.send(Err(err.clone()));
                }
                log::debug!("[{info:?}] flush failed: {err}");
                self.transport_events.emit(
                    &info,
                    TransportEvent::FlushFailed {
                        duration: started.elapsed(),
                    },
                );
                if let Some(err) = self.bridge.on_exception(err) {
                    log::debug!("[{info:?}] unhandled channel error: {err}");
                }
                Flow::Break
            }
        }
    }

    async fn flush_buffer(&mut self) -> io::Result<()> {
        if !self.write_buf.is_empty() {
            self.writer.write_all(&self.write_buf).await?;
            self.write_buf.clear();
        }
        self.writer.flush().await
    }

    fn cancel_pending_writes(&mut self) {
        if self.pending_writes.is_empty() && self.write_buf.is_empty() {
            return;
        }
        log::trace!(
            "[{:?}] cancelling {} pending writes",
            self.info,
            self.pending_writes.len()
        );
        self.write_buf.clear();
        for pending in self.pending_writes.drain(..) {
            let _ = pending.send(Err(Error::WriteCancelled));
        }
    }

    async fn teardown(mut self) {
        let info = self.info.clone();
        let started = self.close_started.unwrap_or_else(Instant::now);

        log::trace!("[{info:?}] tearing down in {:?} state", self.bridge.state());
        self.state.close();
        self.emitter = None;
        for pending in self.pending_writes.drain(..) {
            let _ = pending.send(Err(Error::ChannelClosed));
        }
        if let Err(err) = self.writer.shutdown().await {
            log::trace!("[{info:?}] shutdown failed: {err:?}");
        }
        self.bridge.on_unregistered();

        self.events_rx.close();
        while let Ok(event) = self.events_rx.try_recv() {
            match event {
                ChannelEvent::SubscribeConnection(subscriber) => {
                    self.bridge.subscribe_connection(subscriber)
                }
                ChannelEvent::SubscribeInput(producer) => self.bridge.subscribe_input(producer),
                ChannelEvent::Write(_, ack) | ChannelEvent::Flush(ack) => {
                    let _ = ack.send(Err(Error::ChannelClosed));
                }
                ChannelEvent::Close {
                    reply: Some(reply), ..
                } => self.close_replies.push(reply),
                _ => {}
            }
        }

        for reply in self.close_replies.drain(..) {
            let _ = reply.send(Ok(()));
        }

        self.transport_events.emit(
            &info,
            TransportEvent::CloseSuccess {
                duration: started.elapsed(),
            },
        );
        log::debug!("[{info:?}] channel closed");
    }
}
