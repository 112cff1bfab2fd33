//! # Connection identity

use std::fmt::{Debug, Display, Formatter};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// <sup>[`serde`](https://serde.rs)</sup>
/// Connection identifier.
///
/// Guaranteed to be unique during the program run and monotonically increasing, so identifiers
/// of connections created later compare greater.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Generates a new unique identifier.
    pub fn new() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Numeric value of this identifier.
    pub fn value(&self) -> u64 {
        self.0
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Debug for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl Display for ConnectionId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// <sup>[`serde`](https://serde.rs)</sup>
/// Information about a connection.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone)]
pub struct ConnectionInfo {
    id: ConnectionId,
    details: ConnectionDetails,
}

/// <sup>[`serde`](https://serde.rs)</sup>
/// Transport-specific details of a connection.
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[derive(Clone, Debug)]
pub enum ConnectionDetails {
    /// Outgoing TCP connection.
    TcpClient {
        /// Server address.
        remote_addr: SocketAddr,
    },
    /// TCP connection accepted by a server.
    TcpServer {
        /// Server address.
        bind_addr: SocketAddr,
        /// Peer address.
        peer_addr: SocketAddr,
    },
    /// In-memory duplex transport.
    Memory {
        /// Sequence number of the transport within its factory.
        seq: u64,
    },
    /// Custom transport.
    Custom {
        /// Name of the custom transport.
        name: String,
    },
}

impl ConnectionInfo {
    /// Creates information for a new connection with a fresh identifier.
    pub fn new(details: ConnectionDetails) -> Self {
        Self {
            id: ConnectionId::new(),
            details,
        }
    }

    /// Connection `ID`.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Connection details.
    pub fn details(&self) -> &ConnectionDetails {
        &self.details
    }
}

impl Debug for ConnectionInfo {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match &self.details {
            ConnectionDetails::TcpClient { remote_addr } => {
                write!(f, "{} tcp-client -> {remote_addr}", self.id)
            }
            ConnectionDetails::TcpServer {
                bind_addr,
                peer_addr,
            } => write!(f, "{} tcp-server {bind_addr} <- {peer_addr}", self.id),
            ConnectionDetails::Memory { seq } => write!(f, "{} memory:{seq}", self.id),
            ConnectionDetails::Custom { name } => write!(f, "{} {name}", self.id),
        }
    }
}

#[cfg(test)]
mod info_tests {
    use super::*;

    #[test]
    fn connection_ids_are_unique_and_ordered() {
        let id_0 = ConnectionId::new();
        let id_1 = ConnectionId::new();

        assert_eq!(id_0, id_0);
        assert_ne!(id_0, id_1);
        assert!(id_0 < id_1);
    }

    #[test]
    fn debug_output_carries_id_and_transport() {
        let info = ConnectionInfo::new(ConnectionDetails::Memory { seq: 3 });
        let output = format!("{info:?}");

        assert!(output.starts_with(&format!("{}", info.id())));
        assert!(output.ends_with("memory:3"));
    }
}
