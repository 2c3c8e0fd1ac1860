//! Client library that tunnels socket operations through a relay to a
//! remote device proxy.
//!
//! A [`Session`] runs over any frame [`Transport`] and multiplexes
//! request/response exchanges with one or more proxies. From a session
//! you can:
//!
//! - [`ping`](Session::ping) an address from the proxy's network;
//! - create a [`Link`] to a remote socket, open a data stream on it, and
//!   exchange data, socket options, and close statistics;
//! - [`browse`](Session::browse) for services, resolve host names, or list
//!   directories on the proxy host.
//!
//! # Quick start
//!
//! ```no_run
//! use devproxy::{OpenOptions, Reference, Session, SessionConfig, SocketAddress, SocketInfo};
//!
//! # async fn example(transport: devproxy::MemoryTransport) -> devproxy::Result<()> {
//! let session = Session::connect(transport, SessionConfig::default())?;
//! let proxy = Reference::NULL;
//!
//! let mut link = session
//!     .link(proxy, SocketInfo::stream(SocketAddress::proxy("plc-7", 502)))
//!     .await?;
//! link.open(OpenOptions::default()).await?;
//! link.send(b"\x00\x01\x00\x00\x00\x06\x01\x03\x00\x00\x00\x01".to_vec()).await?;
//! if let Some(reply) = link.recv().await? {
//!     println!("{} bytes", reply.payload.len());
//! }
//! let stats = link.close().await?;
//! println!("open for {:?}", stats.open_for);
//! # Ok(())
//! # }
//! ```

mod browse;
mod config;
mod error;
mod link;
mod pending;
mod session;
mod transport;

pub use browse::{BrowseEvent, BrowseStream, Browser};
pub use config::SessionConfig;
pub use devproxy_proto::{
    BrowseFlags, BrowseResponse, BrowseType, CloseResponse, CodecKind, Content, DataMessage,
    Message, PingResponse, Property, Reference, SocketAddress, SocketInfo, SocketOption,
};
pub use error::{Error, Result};
pub use link::{CloseReason, CloseStats, Link, LinkStats, OpenOptions};
pub use pending::{CorrelationKey, PendingGuard, PendingTable, SequenceCounter};
pub use session::{CallOptions, Session};
pub use transport::{
    FrameRead, FrameWrite, MemoryReader, MemoryTransport, MemoryWriter, StreamReader,
    StreamTransport, StreamWriter, Transport,
};
