//! # Connections and channels
//!
//! A channel is a single socket served by its own event loop task. The event loop owns the socket
//! and a bridge which hands out exactly one [`Connection`]. All interaction with the channel goes
//! through the connection handle:
//!
//! * reading happens through an [`Input`] stream that never receives more items than it
//!   requested;
//! * writes are encoded into a buffer by [`Connection::write`] and sent by [`Connection::flush`];
//! * closing is explicit with [`Connection::close`] or implicit when the connection is dropped.
//!
//! Channels are created by a [`ChannelFactory`] ([`TcpChannelFactory`],
//! [`MemoryChannelFactory`]) or accepted by a [`TcpServer`]. Codecs and channel options are
//! chosen by a [`PipelineConfigurator`].

mod attributes;
pub(crate) mod bridge;
pub(crate) mod channel;
mod config;
mod connection;
mod events;
mod factory;
mod info;
mod input;
mod pipeline;
pub(crate) mod producer;
mod transport;

pub use attributes::ChannelAttributes;
pub use config::ChannelConfig;
pub use connection::{Connection, WriteCompletion};
pub use events::{TransportEvent, TransportEventListener, TransportEvents};
pub use factory::ChannelFactory;
pub use info::{ConnectionDetails, ConnectionId, ConnectionInfo};
pub use input::Input;
pub use pipeline::{LineCodec, Lines, PipelineConfigurator, Raw, RawCodec};
pub use transport::{MemoryChannelFactory, MemoryPeer, MemoryPeers, TcpChannelFactory, TcpServer};

#[cfg(feature = "unstable")]
/// <sup>`unstable`</sup>
#[doc(inline)]
pub use channel::{Channel, EmissionTrigger};
