//! Socket options, typed property values, and link socket properties.

use crate::address::{AddressFamily, SocketAddress};
use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::error::{DecodeError, EncodeError};

/// Declares a `u32`-coded wire enumeration with lookup and codec impls.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident: $what:literal {
            $($(#[$vmeta:meta])* $variant:ident = $value:literal,)+
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u32)]
        pub enum $name {
            $($(#[$vmeta])* $variant = $value,)+
        }

        impl $name {
            /// Maps a wire value to a variant.
            pub const fn from_u32(v: u32) -> Option<Self> {
                match v {
                    $($value => Some(Self::$variant),)+
                    _ => None,
                }
            }

            /// Returns the wire value.
            pub const fn code(self) -> u32 {
                self as u32
            }
        }

        impl Encode for $name {
            fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
                e.write_u32(self.code())
            }
        }

        impl Decode for $name {
            fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
                let v = d.read_u32()?;
                Self::from_u32(v).ok_or_else(|| DecodeError::unknown($what, v))
            }
        }
    };
}

pub(crate) use wire_enum;

wire_enum! {
    /// Socket option identifiers understood by the remote proxy.
    SocketOption: "socket option" {
        /// Non-blocking mode.
        Nonblocking = 1,
        /// Bytes available to read.
        Available = 2,
        /// Shutdown direction.
        Shutdown = 3,
        /// `SO_DEBUG`.
        Debug = 4,
        /// `SO_ACCEPTCONN`.
        AcceptConn = 5,
        /// `SO_REUSEADDR`.
        ReuseAddr = 6,
        /// `SO_KEEPALIVE`.
        KeepAlive = 7,
        /// `SO_LINGER`; carries a [`Property::Linger`] value.
        Linger = 8,
        /// `SO_OOBINLINE`.
        OobInline = 9,
        /// `SO_SNDBUF`.
        SndBuf = 10,
        /// `SO_RCVBUF`.
        RcvBuf = 11,
        /// `SO_SNDLOWAT`.
        SndLoWat = 12,
        /// `SO_RCVLOWAT`.
        RcvLoWat = 13,
        /// `SO_SNDTIMEO`.
        SndTimeo = 14,
        /// `SO_RCVTIMEO`.
        RcvTimeo = 15,
        /// `SO_ERROR`.
        Error = 16,
        /// `SO_TYPE`.
        Type = 17,
        /// `SO_BROADCAST`.
        Broadcast = 18,
        /// Join a multicast group; carries a [`Property::Multicast`] value.
        IpMulticastJoin = 19,
        /// Leave a multicast group; carries a [`Property::Multicast`] value.
        IpMulticastLeave = 20,
        /// `IP_MULTICAST_LOOP`.
        IpMulticastLoop = 21,
        /// `IP_MULTICAST_TTL`.
        IpMulticastTtl = 22,
        /// `IP_TTL`.
        IpTtl = 23,
        /// `TCP_NODELAY`.
        TcpNodelay = 24,
    }
}

impl SocketOption {
    /// Returns `true` if the option's value is a plain integer.
    pub const fn is_scalar(self) -> bool {
        !matches!(
            self,
            Self::Linger | Self::IpMulticastJoin | Self::IpMulticastLeave
        )
    }
}

wire_enum! {
    /// Socket type requested for a link.
    SocketType: "socket type" {
        /// Connection-oriented byte stream.
        Stream = 1,
        /// Datagrams.
        Dgram = 2,
        /// Raw sockets.
        Raw = 3,
        /// Sequenced packets.
        SeqPacket = 5,
    }
}

wire_enum! {
    /// Transport protocol requested for a link.
    ProtocolType: "protocol type" {
        /// Let the proxy choose.
        Unspecified = 0,
        /// ICMP.
        Icmp = 1,
        /// TCP.
        Tcp = 6,
        /// UDP.
        Udp = 17,
        /// ICMPv6.
        Icmpv6 = 58,
    }
}

/// Property type codes outside the socket option range.
const ADDRESS_INFO: u32 = 0x100;
const KEY_VALUE: u32 = 0x101;
const FILE_INFO: u32 = 0x102;

/// A typed property: a socket option value or a browse result attribute.
///
/// The type code is written first and selects the shape of the value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Property {
    /// An integer-valued socket option.
    Option {
        /// The option; must satisfy [`SocketOption::is_scalar`].
        option: SocketOption,
        /// Its value.
        value: u64,
    },
    /// `SO_LINGER`.
    Linger {
        /// Whether lingering is enabled.
        on: bool,
        /// Linger timeout in seconds.
        linger: i32,
    },
    /// Multicast group membership change.
    Multicast {
        /// [`SocketOption::IpMulticastJoin`] or [`SocketOption::IpMulticastLeave`].
        option: SocketOption,
        /// Interface index (0 = any).
        interface_index: i32,
        /// Group address.
        address: SocketAddress,
    },
    /// A resolved address returned by a resolve browse.
    AddressInfo {
        /// The resolved address.
        address: SocketAddress,
        /// Canonical host name.
        canonical_name: String,
    },
    /// A service TXT record entry.
    KeyValue {
        /// Entry key.
        key: String,
        /// Raw entry value.
        value: Vec<u8>,
    },
    /// A directory entry returned by a dirpath browse.
    FileInfo {
        /// Entry path.
        path: String,
        /// Size in bytes.
        size: u64,
        /// Entry kind as reported by the proxy's platform.
        kind: i32,
    },
}

impl Property {
    /// Creates a scalar option property.
    pub const fn option(option: SocketOption, value: u64) -> Self {
        Self::Option { option, value }
    }

    /// Returns the wire type code.
    pub const fn code(&self) -> u32 {
        match self {
            Self::Option { option, .. } | Self::Multicast { option, .. } => option.code(),
            Self::Linger { .. } => SocketOption::Linger.code(),
            Self::AddressInfo { .. } => ADDRESS_INFO,
            Self::KeyValue { .. } => KEY_VALUE,
            Self::FileInfo { .. } => FILE_INFO,
        }
    }

    /// Returns the socket option this property sets, if any.
    pub const fn socket_option(&self) -> Option<SocketOption> {
        match self {
            Self::Option { option, .. } | Self::Multicast { option, .. } => Some(*option),
            Self::Linger { .. } => Some(SocketOption::Linger),
            _ => None,
        }
    }
}

impl Encode for Property {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        match self {
            Self::Option { option, value } => {
                if !option.is_scalar() {
                    return Err(EncodeError::InvalidProperty(option.code()));
                }
                e.begin_union("type", u64::from(self.code()), 1)?;
                e.field("value")?;
                e.write_u64(*value)?;
            }
            Self::Linger { on, linger } => {
                e.begin_union("type", u64::from(self.code()), 2)?;
                e.field("on")?;
                e.write_bool(*on)?;
                e.field("linger")?;
                e.write_i32(*linger)?;
            }
            Self::Multicast {
                option,
                interface_index,
                address,
            } => {
                if option.is_scalar() || *option == SocketOption::Linger {
                    return Err(EncodeError::InvalidProperty(option.code()));
                }
                e.begin_union("type", u64::from(self.code()), 2)?;
                e.field("interface_index")?;
                e.write_i32(*interface_index)?;
                e.field("address")?;
                address.encode(e)?;
            }
            Self::AddressInfo {
                address,
                canonical_name,
            } => {
                e.begin_union("type", u64::from(ADDRESS_INFO), 2)?;
                e.field("address")?;
                address.encode(e)?;
                e.field("canonical_name")?;
                e.write_str(canonical_name)?;
            }
            Self::KeyValue { key, value } => {
                e.begin_union("type", u64::from(KEY_VALUE), 2)?;
                e.field("key")?;
                e.write_str(key)?;
                e.field("value")?;
                e.write_bin(value)?;
            }
            Self::FileInfo { path, size, kind } => {
                e.begin_union("type", u64::from(FILE_INFO), 3)?;
                e.field("path")?;
                e.write_str(path)?;
                e.field("size")?;
                e.write_u64(*size)?;
                e.field("kind")?;
                e.write_i32(*kind)?;
            }
        }
        e.end_object()
    }
}

impl Decode for Property {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        let (tag, fields) = d.begin_union("type")?;
        let code = u32::try_from(tag).map_err(|_| DecodeError::unknown("property type", tag))?;
        let expect = |n: usize| {
            if fields == n {
                Ok(())
            } else {
                Err(DecodeError::length("property", n + 1, fields + 1))
            }
        };
        let prop = match code {
            ADDRESS_INFO => {
                expect(2)?;
                d.field("address")?;
                let address = SocketAddress::decode(d)?;
                d.field("canonical_name")?;
                let canonical_name = d.read_str()?;
                Self::AddressInfo {
                    address,
                    canonical_name,
                }
            }
            KEY_VALUE => {
                expect(2)?;
                d.field("key")?;
                let key = d.read_str()?;
                d.field("value")?;
                let value = d.read_bin()?;
                Self::KeyValue { key, value }
            }
            FILE_INFO => {
                expect(3)?;
                d.field("path")?;
                let path = d.read_str()?;
                d.field("size")?;
                let size = d.read_u64()?;
                d.field("kind")?;
                let kind = d.read_i32()?;
                Self::FileInfo { path, size, kind }
            }
            _ => match SocketOption::from_u32(code) {
                Some(SocketOption::Linger) => {
                    expect(2)?;
                    d.field("on")?;
                    let on = d.read_bool()?;
                    d.field("linger")?;
                    let linger = d.read_i32()?;
                    Self::Linger { on, linger }
                }
                Some(option @ (SocketOption::IpMulticastJoin | SocketOption::IpMulticastLeave)) => {
                    expect(2)?;
                    d.field("interface_index")?;
                    let interface_index = d.read_i32()?;
                    d.field("address")?;
                    let address = SocketAddress::decode(d)?;
                    Self::Multicast {
                        option,
                        interface_index,
                        address,
                    }
                }
                Some(option) => {
                    expect(1)?;
                    d.field("value")?;
                    Self::Option {
                        option,
                        value: d.read_u64()?,
                    }
                }
                None => return Err(DecodeError::unknown("property type", code)),
            },
        };
        d.end_object()?;
        Ok(prop)
    }
}

/// Socket properties requested when creating a link.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketInfo {
    /// Address family of the remote socket.
    pub family: AddressFamily,
    /// Socket type.
    pub sock_type: SocketType,
    /// Transport protocol.
    pub protocol: ProtocolType,
    /// Bit flags, see [`SocketInfo::PASSIVE`].
    pub flags: u32,
    /// Address to connect (or bind, when passive) the remote socket to.
    pub address: SocketAddress,
    /// Options applied before connecting.
    pub options: Vec<Property>,
    /// Connect timeout in milliseconds (0 = proxy default).
    pub timeout_ms: u32,
}

impl SocketInfo {
    /// The remote socket listens instead of connecting.
    pub const PASSIVE: u32 = 0x1;

    /// Properties for a TCP stream connected to `address`.
    pub fn stream(address: SocketAddress) -> Self {
        Self {
            family: address.family(),
            sock_type: SocketType::Stream,
            protocol: ProtocolType::Tcp,
            flags: 0,
            address,
            options: Vec::new(),
            timeout_ms: 0,
        }
    }

    /// Properties for a UDP socket addressed to `address`.
    pub fn datagram(address: SocketAddress) -> Self {
        Self {
            sock_type: SocketType::Dgram,
            protocol: ProtocolType::Udp,
            ..Self::stream(address)
        }
    }

    /// Adds an option applied before connecting.
    #[must_use]
    pub fn with_option(mut self, option: Property) -> Self {
        self.options.push(option);
        self
    }
}

impl Encode for SocketInfo {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        e.begin_object(7)?;
        e.field("family")?;
        self.family.encode(e)?;
        e.field("sock_type")?;
        self.sock_type.encode(e)?;
        e.field("protocol")?;
        self.protocol.encode(e)?;
        e.field("flags")?;
        e.write_u32(self.flags)?;
        e.field("address")?;
        self.address.encode(e)?;
        e.field("options")?;
        self.options.encode(e)?;
        e.field("timeout_ms")?;
        e.write_u32(self.timeout_ms)?;
        e.end_object()
    }
}

impl Decode for SocketInfo {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        d.begin_object("socket info", 7)?;
        d.field("family")?;
        let family = AddressFamily::decode(d)?;
        d.field("sock_type")?;
        let sock_type = SocketType::decode(d)?;
        d.field("protocol")?;
        let protocol = ProtocolType::decode(d)?;
        d.field("flags")?;
        let flags = d.read_u32()?;
        d.field("address")?;
        let address = SocketAddress::decode(d)?;
        d.field("options")?;
        let options = Vec::decode(d)?;
        d.field("timeout_ms")?;
        let timeout_ms = d.read_u32()?;
        d.end_object()?;
        Ok(Self {
            family,
            sock_type,
            protocol,
            flags,
            address,
            options,
            timeout_ms,
        })
    }
}
