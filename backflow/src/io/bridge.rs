//! # Connection to channel bridge
//!
//! State machine installed into every channel event loop. It emits the [`Connection`] exactly once,
//! keeps at most one active input subscriber and routes decoded items, errors and channel closure
//! to whoever is subscribed at the moment.
//!
//! All methods are called from the event loop that owns the channel, the bridge itself is never
//! shared.

use std::sync::Arc;

use crate::io::channel::{ChannelHandle, ConnectionSubscriber};
use crate::io::producer::{Delivery, InputId, ReadProducer, UNBOUNDED};
use crate::io::Input;

use crate::prelude::*;

/// Observable state of a [`ConnectionBridge`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum BridgeState {
    AwaitingConnectionSubscriber,
    ConnectionEmitted,
    AwaitingInputSubscriber,
    InputActive,
    Closed,
}

pub(crate) struct ConnectionBridge<R, W> {
    handle: ChannelHandle<R, W>,
    connection_subscriber: Option<ConnectionSubscriber<R, W>>,
    subscriber_registered: bool,
    emitted: bool,
    input: Option<Arc<ReadProducer<R>>>,
    input_seen: bool,
    raise_error_on_input_subscription: bool,
    discard_input: bool,
    unsubscribe_pending: bool,
    unregistered: bool,
    close_requested: bool,
}

impl<R: Send + 'static, W: Send + 'static> ConnectionBridge<R, W> {
    pub(crate) fn new(handle: ChannelHandle<R, W>) -> Self {
        Self {
            handle,
            connection_subscriber: None,
            subscriber_registered: false,
            emitted: false,
            input: None,
            input_seen: false,
            raise_error_on_input_subscription: false,
            discard_input: false,
            unsubscribe_pending: false,
            unregistered: false,
            close_requested: false,
        }
    }

    pub(crate) fn state(&self) -> BridgeState {
        if self.unregistered || self.close_requested {
            BridgeState::Closed
        } else if !self.emitted {
            BridgeState::AwaitingConnectionSubscriber
        } else if self.input.is_some() {
            BridgeState::InputActive
        } else if self.input_seen {
            BridgeState::AwaitingInputSubscriber
        } else {
            BridgeState::ConnectionEmitted
        }
    }

    /// Returns `true` once the channel should be closed by its event loop.
    pub(crate) fn close_requested(&self) -> bool {
        self.close_requested
    }

    /// Registers the receiver of the connection.
    ///
    /// Only one registration is accepted, later registrants receive
    /// [`Error::OnlyOneConnectionSubscriber`].
    pub(crate) fn subscribe_connection(&mut self, subscriber: ConnectionSubscriber<R, W>) {
        if self.unregistered {
            let _ = subscriber.send(Err(Error::ChannelClosed));
            return;
        }
        if self.subscriber_registered {
            log::debug!(
                "[{:?}] rejecting second connection subscriber",
                self.handle.info()
            );
            let _ = subscriber.send(Err(Error::OnlyOneConnectionSubscriber));
            return;
        }

        self.subscriber_registered = true;
        self.connection_subscriber = Some(subscriber);
    }

    /// Emits the connection to its subscriber. Runs once.
    pub(crate) fn emit_connection(&mut self) {
        if self.emitted {
            return;
        }
        self.emitted = true;
        let info = self.handle.info().clone();

        let subscriber = match self.connection_subscriber.take() {
            Some(subscriber) if !subscriber.is_closed() => subscriber,
            _ => {
                log::debug!("[{info:?}] no connection subscriber, closing channel");
                self.close_requested = true;
                return;
            }
        };

        let eager_input = self.register_eager_input();
        let connection = match self.handle.connection(eager_input) {
            Some(connection) => connection,
            None => {
                self.close_requested = true;
                let _ = subscriber.send(Err(Error::ChannelClosed));
                return;
            }
        };

        if subscriber.send(Ok(connection)).is_err() {
            log::debug!("[{info:?}] connection subscriber went away, closing channel");
            self.close_requested = true;
            return;
        }
        log::trace!("[{info:?}] connection emitted");

        self.check_eager_subscription();
    }

    /// Fails the pending connection subscriber.
    pub(crate) fn connection_failed(&mut self, err: Error) {
        if let Some(subscriber) = self.connection_subscriber.take() {
            let _ = subscriber.send(Err(err));
        }
        self.emitted = true;
        self.close_requested = true;
    }

    /// Registers an input subscriber.
    ///
    /// A terminated incumbent is replaced, an active one causes the newcomer to be rejected.
    pub(crate) fn subscribe_input(&mut self, producer: Arc<ReadProducer<R>>) {
        if self.unregistered {
            producer.send_on_complete();
            return;
        }
        if self.raise_error_on_input_subscription {
            producer.send_on_error(Error::LazyInputSubscription);
            return;
        }
        if matches!(&self.input, Some(incumbent) if incumbent.is_active()) {
            producer.send_on_error(Error::OnlyOneInputSubscriber);
            return;
        }

        log::trace!(
            "[{:?}] input subscriber #{} registered",
            self.handle.info(),
            producer.id()
        );
        self.input = Some(producer);
        self.input_seen = true;
        self.unsubscribe_pending = false;
    }

    /// Completes the active input and prepares the bridge for the next holder of the connection.
    ///
    /// Returns a fresh eager input if the channel is configured to register one.
    pub(crate) fn reset_input(&mut self) -> Option<Input<R>> {
        if let Some(previous) = self.input.take() {
            previous.send_on_complete();
        }
        self.raise_error_on_input_subscription = false;
        self.discard_input = false;
        self.unsubscribe_pending = false;
        self.input_seen = true;

        if self.unregistered {
            return None;
        }
        let eager_input = self.register_eager_input();
        self.check_eager_subscription();
        eager_input
    }

    /// Handles a dropped input. Stale identifiers are ignored.
    pub(crate) fn input_unsubscribed(&mut self, id: InputId) {
        let is_active = matches!(&self.input, Some(producer) if producer.id() == id);
        if !is_active {
            return;
        }

        log::trace!(
            "[{:?}] input subscriber #{id} unsubscribed",
            self.handle.info()
        );
        self.input = None;
        self.unsubscribe_pending = true;
    }

    /// Called after a batch of events was processed.
    ///
    /// A non-pooled channel is closed when its input was dropped and no replacement subscribed.
    pub(crate) fn end_of_turn(&mut self) {
        if !self.unsubscribe_pending {
            return;
        }
        self.unsubscribe_pending = false;

        if self.input.is_none() && !self.handle.attributes().is_pooled() {
            log::debug!(
                "[{:?}] input unsubscribed without replacement, closing channel",
                self.handle.info()
            );
            self.close_requested = true;
        }
    }

    /// Routes a decoded item or a decoding error.
    pub(crate) fn on_read(&mut self, item: Result<R>) {
        let info = self.handle.info();

        match (item, &self.input) {
            (Ok(item), Some(producer)) => match producer.deliver(item) {
                Delivery::Delivered => {}
                Delivery::Violation => {
                    log::debug!("[{info:?}] input subscriber exceeded demand, item discarded");
                }
                Delivery::Inactive => {
                    log::trace!("[{info:?}] input subscriber is inactive, item discarded");
                }
            },
            (Ok(_), None) if self.discard_input => {
                log::trace!("[{info:?}] discarding data on auto-read channel without input");
            }
            (Ok(_), None) => {
                log::warn!(
                    "[{info:?}] data received on channel, but no subscriber registered, discarding data"
                );
            }
            (Err(err), Some(producer)) => {
                log::debug!("[{info:?}] decoding failed: {err}");
                producer.send_on_error(err);
            }
            (Err(err), None) => {
                log::warn!("[{info:?}] decoding failed without input subscriber: {err}");
            }
        }
    }

    /// Returns `true` if the active input wants more items.
    pub(crate) fn should_read_more(&self) -> bool {
        match &self.input {
            Some(producer) => producer.should_read_more(),
            None => false,
        }
    }

    /// Routes a channel error.
    ///
    /// Returns the error back if nobody was subscribed to receive it.
    pub(crate) fn on_exception(&mut self, err: Error) -> Option<Error> {
        if !self.emitted {
            self.connection_failed(err);
            return None;
        }

        match &self.input {
            Some(producer) if producer.is_active() => {
                producer.send_on_error(err);
                None
            }
            _ => Some(err),
        }
    }

    /// Channel is closed for good.
    pub(crate) fn on_unregistered(&mut self) {
        self.unregistered = true;

        if let Some(subscriber) = self.connection_subscriber.take() {
            let _ = subscriber.send(Err(Error::ChannelClosed));
        }
        if let Some(producer) = self.input.take() {
            producer.send_on_complete();
        }
    }

    fn register_eager_input(&mut self) -> Option<Input<R>> {
        let config = self.handle.config();
        if !config.eager_input() {
            return None;
        }

        let auto_read = config.auto_read();
        let (input, producer) = Input::subscribe(auto_read, self.handle.control());
        if auto_read {
            producer.request(UNBOUNDED);
        }
        self.input = Some(producer);
        self.input_seen = true;
        Some(input)
    }

    fn check_eager_subscription(&mut self) {
        if self.handle.config().auto_read() && self.input.is_none() {
            self.discard_input = true;
            self.raise_error_on_input_subscription = true;
        }
    }
}

#[cfg(test)]
mod bridge_tests {
    use super::*;
    use crate::io::channel::ChannelEvent;
    use crate::io::{ChannelAttributes, ChannelConfig, Connection, ConnectionDetails, ConnectionInfo};
    use crate::utils::test::RecordingControl;
    use crate::utils::Closer;
    use tokio::sync::{mpsc, oneshot};
    use tokio_stream::StreamExt;

    type TestEvents = mpsc::UnboundedReceiver<ChannelEvent<u32, u32>>;

    struct Fixture {
        bridge: ConnectionBridge<u32, u32>,
        attributes: Arc<ChannelAttributes>,
        _events_tx: mpsc::UnboundedSender<ChannelEvent<u32, u32>>,
        _events_rx: TestEvents,
        _state: Closer,
    }

    fn make_bridge(config: ChannelConfig) -> Fixture {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let attributes = Arc::new(ChannelAttributes::default());
        let state = Closer::new();
        let handle = ChannelHandle::new(
            ConnectionInfo::new(ConnectionDetails::Memory { seq: 0 }),
            config,
            events_tx.downgrade(),
            attributes.clone(),
            state.to_closable(),
        );

        Fixture {
            bridge: ConnectionBridge::new(handle),
            attributes,
            _events_tx: events_tx,
            _events_rx: events_rx,
            _state: state,
        }
    }

    fn emit(bridge: &mut ConnectionBridge<u32, u32>) -> Connection<u32, u32> {
        let (tx, mut rx) = oneshot::channel();
        bridge.subscribe_connection(tx);
        bridge.emit_connection();
        rx.try_recv().unwrap().unwrap()
    }

    fn lazy_input(
        auto_read: bool,
    ) -> (Input<u32>, Arc<ReadProducer<u32>>, Arc<RecordingControl>) {
        let control = Arc::new(RecordingControl::default());
        let (input, producer) = Input::subscribe(auto_read, control.clone());
        (input, producer, control)
    }

    #[tokio::test]
    async fn delivers_demanded_items_then_fails_on_excess() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let _connection = emit(&mut fixture.bridge);
        assert_eq!(fixture.bridge.state(), BridgeState::ConnectionEmitted);

        let (mut input, producer, control) = lazy_input(false);
        fixture.bridge.subscribe_input(producer);
        assert_eq!(fixture.bridge.state(), BridgeState::InputActive);

        input.request(2);
        assert_eq!(control.reads(), 1);
        for item in 1..=3 {
            fixture.bridge.on_read(Ok(item));
        }

        assert_eq!(input.next().await.unwrap().unwrap(), 1);
        assert_eq!(input.next().await.unwrap().unwrap(), 2);
        assert!(matches!(
            input.next().await,
            Some(Err(Error::MissingBackpressure))
        ));
        assert!(input.next().await.is_none());
        assert!(!fixture.bridge.should_read_more());
    }

    #[tokio::test]
    async fn lazy_subscription_on_auto_read_channel_fails() {
        let mut fixture = make_bridge(ChannelConfig::default().with_auto_read(true));
        let _connection = emit(&mut fixture.bridge);

        // Data is discarded silently while nobody is subscribed.
        fixture.bridge.on_read(Ok(1));

        let (mut input, producer, _) = lazy_input(true);
        fixture.bridge.subscribe_input(producer);

        assert!(matches!(
            input.next().await,
            Some(Err(Error::LazyInputSubscription))
        ));
        assert!(input.next().await.is_none());
    }

    #[tokio::test]
    async fn eager_input_on_auto_read_channel_is_unbounded() {
        let config = ChannelConfig::default()
            .with_auto_read(true)
            .with_eager_input(true);
        let mut fixture = make_bridge(config);
        let mut connection = emit(&mut fixture.bridge);
        assert_eq!(fixture.bridge.state(), BridgeState::InputActive);

        let mut input = connection.input();
        assert_eq!(input.requested(), u64::MAX);

        for item in 0..100 {
            fixture.bridge.on_read(Ok(item));
        }
        for item in 0..100 {
            assert_eq!(input.next().await.unwrap().unwrap(), item);
        }
    }

    #[tokio::test]
    async fn second_input_subscriber_is_rejected() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let _connection = emit(&mut fixture.bridge);

        let (mut first, first_producer, _) = lazy_input(false);
        let (mut second, second_producer, _) = lazy_input(false);
        fixture.bridge.subscribe_input(first_producer);
        fixture.bridge.subscribe_input(second_producer);

        assert!(matches!(
            second.next().await,
            Some(Err(Error::OnlyOneInputSubscriber))
        ));

        // Incumbent is unaffected.
        first.request(1);
        fixture.bridge.on_read(Ok(5));
        assert_eq!(first.next().await.unwrap().unwrap(), 5);
    }

    #[tokio::test]
    async fn terminated_input_is_replaced_by_next_subscriber() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let _connection = emit(&mut fixture.bridge);

        let (mut first, producer, _) = lazy_input(false);
        let first_id = producer.id();
        fixture.bridge.subscribe_input(producer);
        first.request(1);
        fixture.bridge.on_read(Ok(1));
        fixture.bridge.on_read(Ok(2));
        assert_eq!(first.next().await.unwrap().unwrap(), 1);
        assert!(matches!(
            first.next().await,
            Some(Err(Error::MissingBackpressure))
        ));

        // The terminated input is still held by its consumer.
        let (mut second, producer, _) = lazy_input(false);
        fixture.bridge.subscribe_input(producer);
        assert_eq!(fixture.bridge.state(), BridgeState::InputActive);

        second.request(1);
        fixture.bridge.on_read(Ok(3));
        assert_eq!(second.next().await.unwrap().unwrap(), 3);

        // A late unsubscribe of the replaced input does not detach the new one.
        fixture.bridge.input_unsubscribed(first_id);
        fixture.bridge.end_of_turn();
        assert!(!fixture.bridge.close_requested());
        assert_eq!(fixture.bridge.state(), BridgeState::InputActive);
    }

    #[tokio::test]
    async fn second_connection_subscriber_is_rejected() {
        let mut fixture = make_bridge(ChannelConfig::default());

        let (first_tx, mut first_rx) = oneshot::channel();
        let (second_tx, mut second_rx) = oneshot::channel();
        fixture.bridge.subscribe_connection(first_tx);
        fixture.bridge.subscribe_connection(second_tx);

        assert!(matches!(
            second_rx.try_recv().unwrap(),
            Err(Error::OnlyOneConnectionSubscriber)
        ));

        fixture.bridge.emit_connection();
        assert!(first_rx.try_recv().unwrap().is_ok());
        assert!(!fixture.bridge.close_requested());
    }

    #[test]
    fn emission_without_subscriber_closes_channel() {
        let mut fixture = make_bridge(ChannelConfig::default());
        fixture.bridge.emit_connection();

        assert!(fixture.bridge.close_requested());
        assert_eq!(fixture.bridge.state(), BridgeState::Closed);
    }

    #[test]
    fn error_before_emission_fails_connection_subscriber() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let (tx, mut rx) = oneshot::channel();
        fixture.bridge.subscribe_connection(tx);

        let unhandled = fixture.bridge.on_exception(Error::ChannelClosed);
        assert!(unhandled.is_none());
        assert!(matches!(rx.try_recv().unwrap(), Err(Error::ChannelClosed)));
        assert!(fixture.bridge.close_requested());
    }

    #[tokio::test]
    async fn reset_completes_previous_input() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let _connection = emit(&mut fixture.bridge);

        let (mut first, producer, _) = lazy_input(false);
        fixture.bridge.subscribe_input(producer);
        assert!(fixture.bridge.reset_input().is_none());
        assert_eq!(fixture.bridge.state(), BridgeState::AwaitingInputSubscriber);
        assert!(first.next().await.is_none());

        let (mut second, producer, _) = lazy_input(false);
        fixture.bridge.subscribe_input(producer);
        second.request(1);
        fixture.bridge.on_read(Ok(9));
        assert_eq!(second.next().await.unwrap().unwrap(), 9);
    }

    #[tokio::test]
    async fn unsubscribed_input_closes_only_non_pooled_channels() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let _connection = emit(&mut fixture.bridge);
        let (_input, producer, _) = lazy_input(false);
        let id = producer.id();
        fixture.bridge.subscribe_input(producer);

        fixture.bridge.input_unsubscribed(id + 1_000);
        fixture.bridge.end_of_turn();
        assert!(!fixture.bridge.close_requested());

        fixture.bridge.input_unsubscribed(id);
        fixture.bridge.end_of_turn();
        assert!(fixture.bridge.close_requested());

        let mut fixture = make_bridge(ChannelConfig::default());
        fixture.attributes.set_pooled(true);
        let _connection = emit(&mut fixture.bridge);
        let (_input, producer, _) = lazy_input(false);
        let id = producer.id();
        fixture.bridge.subscribe_input(producer);

        fixture.bridge.input_unsubscribed(id);
        fixture.bridge.end_of_turn();
        assert!(!fixture.bridge.close_requested());
    }

    #[tokio::test]
    async fn replacement_in_same_turn_keeps_channel_open() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let _connection = emit(&mut fixture.bridge);
        let (_first, producer, _) = lazy_input(false);
        let id = producer.id();
        fixture.bridge.subscribe_input(producer);

        let (_second, producer, _) = lazy_input(false);
        fixture.bridge.input_unsubscribed(id);
        fixture.bridge.subscribe_input(producer);
        fixture.bridge.end_of_turn();

        assert!(!fixture.bridge.close_requested());
        assert_eq!(fixture.bridge.state(), BridgeState::InputActive);
    }

    #[tokio::test]
    async fn unregistered_channel_completes_input() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let _connection = emit(&mut fixture.bridge);
        let (mut input, producer, _) = lazy_input(false);
        fixture.bridge.subscribe_input(producer);

        fixture.bridge.on_unregistered();
        assert!(input.next().await.is_none());

        let (mut late, producer, _) = lazy_input(false);
        fixture.bridge.subscribe_input(producer);
        assert!(late.next().await.is_none());
    }

    #[tokio::test]
    async fn decoding_error_is_delivered_to_input() {
        let mut fixture = make_bridge(ChannelConfig::default());
        let _connection = emit(&mut fixture.bridge);
        let (mut input, producer, _) = lazy_input(false);
        fixture.bridge.subscribe_input(producer);

        fixture
            .bridge
            .on_read(Err(Error::Codec("unexpected frame".into())));
        assert!(matches!(input.next().await, Some(Err(Error::Codec(_)))));
    }
}
