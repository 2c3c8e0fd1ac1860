//! Request and response payloads carried inside a [`Message`](crate::Message).
//!
//! Every payload is an object whose fields are written in declaration
//! order. Reordering fields here breaks compatibility with deployed
//! proxies.

use crate::address::SocketAddress;
use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::error::{DecodeError, EncodeError};
use crate::property::{Property, SocketInfo, SocketOption};
use crate::reference::Reference;

/// Link protocol version sent in every [`LinkRequest`].
pub const LINK_VERSION: u8 = 7;

/// Writes one field value according to its wire kind.
macro_rules! put {
    ($e:ident, u8, $v:expr) => {
        $e.write_u64(u64::from($v))
    };
    ($e:ident, u32, $v:expr) => {
        $e.write_u32($v)
    };
    ($e:ident, u64, $v:expr) => {
        $e.write_u64($v)
    };
    ($e:ident, i32, $v:expr) => {
        $e.write_i32($v)
    };
    ($e:ident, bool, $v:expr) => {
        $e.write_bool($v)
    };
    ($e:ident, str, $v:expr) => {
        $e.write_str(&$v)
    };
    ($e:ident, bin, $v:expr) => {
        $e.write_bin(&$v)
    };
    ($e:ident, value, $v:expr) => {
        $v.encode($e)
    };
}

/// Reads one field value according to its wire kind.
macro_rules! take {
    ($d:ident, u8) => {
        $d.read_u8()
    };
    ($d:ident, u32) => {
        $d.read_u32()
    };
    ($d:ident, u64) => {
        $d.read_u64()
    };
    ($d:ident, i32) => {
        $d.read_i32()
    };
    ($d:ident, bool) => {
        $d.read_bool()
    };
    ($d:ident, str) => {
        $d.read_str()
    };
    ($d:ident, bin) => {
        $d.read_bin()
    };
    ($d:ident, value) => {
        Decode::decode($d)
    };
}

/// Declares a payload record together with its object codec.
///
/// Each field names its wire kind after `as`; `value` defers to the
/// field type's own [`Encode`]/[`Decode`] impls.
macro_rules! record {
    (
        $(#[$meta:meta])*
        pub struct $name:ident: $what:literal {
            $(
                $(#[$fmeta:meta])*
                $field:ident: $ty:ty as $kind:ident,
            )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq)]
        pub struct $name {
            $(
                $(#[$fmeta])*
                pub $field: $ty,
            )*
        }

        impl Encode for $name {
            fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
                e.begin_object(record!(@count $($field)*))?;
                $(
                    e.field(stringify!($field))?;
                    put!(e, $kind, self.$field)?;
                )*
                e.end_object()
            }
        }

        impl Decode for $name {
            fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
                d.begin_object($what, record!(@count $($field)*))?;
                $(
                    d.field(stringify!($field))?;
                    let $field: $ty = take!(d, $kind)?;
                )*
                d.end_object()?;
                Ok(Self { $($field),* })
            }
        }
    };
    (@count) => { 0usize };
    (@count $head:ident $($tail:ident)*) => { 1usize + record!(@count $($tail)*) };
}

record! {
    /// Asks the proxy to create a remote socket.
    pub struct LinkRequest: "link request" {
        /// Always [`LINK_VERSION`].
        version: u8 as u8,
        /// Properties of the socket to create.
        properties: SocketInfo as value,
    }
}

impl LinkRequest {
    /// Creates a request for a socket with the given properties.
    pub const fn new(properties: SocketInfo) -> Self {
        Self {
            version: LINK_VERSION,
            properties,
        }
    }
}

record! {
    /// The proxy created a remote socket.
    pub struct LinkResponse: "link response" {
        /// Identifier of the new link.
        link_id: Reference as value,
        /// Address the remote socket is bound to.
        local_address: SocketAddress as value,
        /// Address the remote socket is connected to.
        peer_address: SocketAddress as value,
    }
}

record! {
    /// Opens a data stream over an established link.
    pub struct OpenRequest: "open request" {
        /// Client-chosen stream identifier.
        stream_id: Reference as value,
        /// Stream kind (0 = raw socket stream).
        stream_type: i32 as i32,
        /// Relay endpoint the proxy should connect the stream to.
        connection_string: String as str,
        /// Data is only delivered after a [`PollRequest`].
        is_polled: bool as bool,
        /// Largest data message the client accepts, in bytes.
        max_receive_buffer: u64 as u64,
    }
}

record! {
    /// The stream is open.
    #[derive(Default, Copy)]
    pub struct OpenResponse: "open response" {}
}

record! {
    /// Closes a link or stream.
    #[derive(Default, Copy)]
    pub struct CloseRequest: "close request" {}
}

record! {
    /// Final statistics for a closed link, also sent unsolicited when the
    /// proxy closes a link on its own.
    #[derive(Default, Copy)]
    pub struct CloseResponse: "close response" {
        /// How long the link was open, in milliseconds.
        time_open_ms: u64 as u64,
        /// Bytes the proxy sent on the remote socket.
        bytes_sent: u64 as u64,
        /// Bytes the proxy received on the remote socket.
        bytes_received: u64 as u64,
        /// Socket error that caused the close (0 = none).
        error_code: i32 as i32,
    }
}

impl CloseResponse {
    /// Creates close statistics.
    pub const fn new(time_open_ms: u64, bytes_sent: u64, bytes_received: u64, error_code: i32) -> Self {
        Self {
            time_open_ms,
            bytes_sent,
            bytes_received,
            error_code,
        }
    }
}

record! {
    /// Reads a socket option.
    #[derive(Copy)]
    pub struct GetOptRequest: "get option request" {
        /// The option to read.
        option: SocketOption as value,
    }
}

record! {
    /// Current value of the requested option.
    pub struct GetOptResponse: "get option response" {
        /// The option and its value.
        option_value: Property as value,
    }
}

record! {
    /// Writes a socket option.
    pub struct SetOptRequest: "set option request" {
        /// The option and its new value.
        option_value: Property as value,
    }
}

record! {
    /// The option was applied.
    #[derive(Default, Copy)]
    pub struct SetOptResponse: "set option response" {}
}

record! {
    /// Asks the proxy to probe an address.
    pub struct PingRequest: "ping request" {
        /// Address to probe.
        address: SocketAddress as value,
    }
}

record! {
    /// Result of a probe.
    pub struct PingResponse: "ping response" {
        /// Address that answered.
        address: SocketAddress as value,
        /// Hardware address of the responder, zero-padded.
        physical_address: PhysicalAddress as value,
        /// Round trip time in milliseconds.
        time_ms: u32 as u32,
    }
}

record! {
    /// Grants the proxy one round of data on a polled stream.
    #[derive(Default, Copy)]
    pub struct PollRequest: "poll request" {
        /// How long the proxy may wait for data, in milliseconds.
        timeout_ms: u64 as u64,
    }
}

record! {
    /// The poll round finished.
    #[derive(Default, Copy)]
    pub struct PollResponse: "poll response" {}
}

record! {
    /// A datagram or stream chunk travelling in either direction.
    #[derive(Default)]
    pub struct DataMessage: "data message" {
        /// Per-stream sequence number assigned by the sender.
        sequence_number: u64 as u64,
        /// Remote peer the data came from or goes to.
        source_address: SocketAddress as value,
        /// Data bytes.
        payload: Vec<u8> as bin,
        /// Ancillary control data.
        control: Vec<u8> as bin,
    }
}

impl DataMessage {
    /// Creates a data message carrying `payload`.
    pub fn new(payload: impl Into<Vec<u8>>) -> Self {
        Self {
            payload: payload.into(),
            ..Self::default()
        }
    }
}

/// An 8-byte hardware address, zero-padded for shorter link layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PhysicalAddress(pub [u8; 8]);

impl Encode for PhysicalAddress {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        e.write_bin(&self.0)
    }
}

impl Decode for PhysicalAddress {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        let bytes = d.read_bin()?;
        bytes
            .as_slice()
            .try_into()
            .map(Self)
            .map_err(|_| DecodeError::length("physical address", 8, bytes.len()))
    }
}
