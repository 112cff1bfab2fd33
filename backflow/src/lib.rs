//! # Backflow
//!
//! Demand-driven connections and bounded connection pooling for [Tokio](https://tokio.rs)
//! transports.
//!
//! Each socket is served by a dedicated event loop task which hands out exactly one
//! [`Connection`](io::Connection). Inbound items reach the caller through an
//! [`Input`](io::Input) stream that never receives more than it asked for: the channel stops
//! reading from the socket until demand is signalled, and a producer that outruns demand fails
//! the stream with [`Error::MissingBackpressure`] instead of buffering. Writes are buffered by
//! the codec and acknowledged in submission order once the flush carrying them completes.
//!
//! On top of that, a [`ConnectionPool`](pool::ConnectionPool) reuses idle connections, limits
//! the number of physical connections with a permit strategy, evicts expired idle connections
//! and publishes its state changes to any number of observers.
//!
//! ```rust,no_run
//! # #[tokio::main] async fn main() -> backflow::Result<()> {
//! use backflow::io::{Lines, TcpChannelFactory};
//! use backflow::pool::{ConnectionPool, PoolConfig};
//! use tokio_stream::StreamExt;
//!
//! let factory = TcpChannelFactory::new("127.0.0.1:5600", Lines::new())?;
//! let pool = ConnectionPool::new(factory, PoolConfig::builder().max_connections(8).build()?)?;
//!
//! let mut connection = pool.acquire().await?;
//! connection.write_and_flush("hello".to_string()).await?;
//! if let Some(reply) = connection.input().next().await {
//!     println!("{}", reply?);
//! }
//! connection.close(true).await?;
//! # Ok(()) }
//! ```
//!
//! # Features
#![doc = document_features::document_features!()]
#![warn(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod consts;
pub mod errors;
pub mod io;
pub mod pool;
pub mod prelude;
pub mod runtime;
pub mod utils;

#[doc(inline)]
pub use errors::{Error, Result};
