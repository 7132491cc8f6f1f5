//! Client connections
//!
//! Connection state and write path, the read loop that feeds the dispatcher,
//! the transport seam, and the free list connections are recycled through.

mod client;
mod pool;
mod read_loop;
mod transport;

pub use client::{Connection, ConnectionHooks, SdkType, SessionParams};
pub use pool::ConnectionPool;
pub use read_loop::ReadLoop;
pub use transport::{Frame, FrameSink, TransportError, WsSink};

#[cfg(test)]
pub(crate) use client::test_support;
#[cfg(test)]
pub(crate) use transport::ChannelSink;
