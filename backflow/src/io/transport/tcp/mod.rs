//! # TCP transport

mod client;
mod server;

pub use client::TcpChannelFactory;
pub use server::TcpServer;
