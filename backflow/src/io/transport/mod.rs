//! # Transports

mod memory;
mod tcp;

pub use memory::{MemoryChannelFactory, MemoryPeer, MemoryPeers};
pub use tcp::{TcpChannelFactory, TcpServer};
