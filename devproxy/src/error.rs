//! Error types for devproxy operations.

use std::time::Duration;

use devproxy_proto::{DecodeError, EncodeError, Reference};

/// Alias for `Result<T, devproxy::Error>`.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors returned by session, link, and browse operations.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
    /// A received message could not be decoded.
    #[error(transparent)]
    Decode(#[from] DecodeError),

    /// An outgoing message could not be encoded.
    #[error(transparent)]
    Encode(#[from] EncodeError),

    /// The proxy answered with a nonzero error code.
    #[error("remote proxy returned error code {code}")]
    Remote {
        /// The error code from the response envelope.
        code: i32,
    },

    /// No response arrived within the request timeout.
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// The caller's cancellation token fired.
    #[error("request cancelled")]
    Cancelled,

    /// The session or link was closed.
    #[error("session closed")]
    Closed,

    /// [`Link::open`](crate::Link::open) was called on a link whose stream
    /// is already open.
    #[error("link already has stream {0} open")]
    AlreadyOpen(Reference),

    /// The response carried a payload of the wrong kind.
    #[error("unexpected payload: expected {expected}, got {found}")]
    UnexpectedContent {
        /// The payload type the request expects.
        expected: &'static str,
        /// What actually arrived.
        found: &'static str,
    },

    /// An encoded message exceeds the configured frame limit.
    #[error("frame of {size} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Encoded size.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Invalid session configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// An I/O error from the transport or a config file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
