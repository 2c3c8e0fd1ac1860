//! Socket addresses as carried on the wire.
//!
//! An address is a tagged union whose family is written first; the family
//! decides how many fields follow and of what type, so it has its own
//! reader/writer pair rather than a fixed record layout.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6};

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::error::{DecodeError, EncodeError};

/// Address family discriminator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum AddressFamily {
    /// No address.
    Unspecified = 0,
    /// Unix domain socket path.
    Unix = 1,
    /// IPv4.
    Inet4 = 2,
    /// IPv6.
    Inet6 = 3,
    /// Host name and port resolved by the remote proxy.
    Proxy = 4,
}

impl AddressFamily {
    /// Maps a wire value to a family.
    pub const fn from_u64(v: u64) -> Option<Self> {
        match v {
            0 => Some(Self::Unspecified),
            1 => Some(Self::Unix),
            2 => Some(Self::Inet4),
            3 => Some(Self::Inet6),
            4 => Some(Self::Proxy),
            _ => None,
        }
    }

    /// Number of fields following the discriminator.
    const fn field_count(self) -> usize {
        match self {
            Self::Unspecified => 0,
            Self::Unix => 1,
            Self::Inet4 | Self::Proxy => 3,
            Self::Inet6 => 4,
        }
    }
}

impl Encode for AddressFamily {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        e.write_u64(*self as u64)
    }
}

impl Decode for AddressFamily {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        let v = d.read_u64()?;
        Self::from_u64(v).ok_or_else(|| DecodeError::unknown("address family", v))
    }
}

/// A socket address of any supported family.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum SocketAddress {
    /// No address.
    #[default]
    Unspecified,
    /// Unix domain socket.
    Unix {
        /// Filesystem path.
        path: String,
    },
    /// IPv4 endpoint.
    Inet4 {
        /// Address octets.
        address: [u8; 4],
        /// Port number.
        port: u16,
        /// Flow label (unused by IPv4 peers, carried for symmetry).
        flow: u32,
    },
    /// IPv6 endpoint.
    Inet6 {
        /// Address octets.
        address: [u8; 16],
        /// Port number.
        port: u16,
        /// Flow information.
        flow: u32,
        /// Scope (interface) id.
        scope_id: u32,
    },
    /// Host name and port for the proxy to resolve.
    Proxy {
        /// Host name or literal address.
        host: String,
        /// Port number.
        port: u16,
        /// Flow label.
        flow: u32,
    },
}

impl SocketAddress {
    /// Creates a proxy-resolved `host:port` address.
    pub fn proxy(host: impl Into<String>, port: u16) -> Self {
        Self::Proxy {
            host: host.into(),
            port,
            flow: 0,
        }
    }

    /// Returns the address family.
    pub const fn family(&self) -> AddressFamily {
        match self {
            Self::Unspecified => AddressFamily::Unspecified,
            Self::Unix { .. } => AddressFamily::Unix,
            Self::Inet4 { .. } => AddressFamily::Inet4,
            Self::Inet6 { .. } => AddressFamily::Inet6,
            Self::Proxy { .. } => AddressFamily::Proxy,
        }
    }

    /// Returns the port, if the family has one.
    pub const fn port(&self) -> Option<u16> {
        match self {
            Self::Inet4 { port, .. } | Self::Inet6 { port, .. } | Self::Proxy { port, .. } => {
                Some(*port)
            }
            Self::Unspecified | Self::Unix { .. } => None,
        }
    }

    /// Converts an IP address to a standard library socket address.
    pub fn to_socket_addr(&self) -> Option<SocketAddr> {
        match *self {
            Self::Inet4 { address, port, .. } => {
                Some(SocketAddrV4::new(Ipv4Addr::from(address), port).into())
            }
            Self::Inet6 {
                address,
                port,
                flow,
                scope_id,
            } => Some(SocketAddrV6::new(Ipv6Addr::from(address), port, flow, scope_id).into()),
            _ => None,
        }
    }
}

impl From<SocketAddr> for SocketAddress {
    fn from(addr: SocketAddr) -> Self {
        match addr {
            SocketAddr::V4(v4) => Self::Inet4 {
                address: v4.ip().octets(),
                port: v4.port(),
                flow: 0,
            },
            SocketAddr::V6(v6) => Self::Inet6 {
                address: v6.ip().octets(),
                port: v6.port(),
                flow: v6.flowinfo(),
                scope_id: v6.scope_id(),
            },
        }
    }
}

impl fmt::Display for SocketAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unspecified => f.write_str("unspecified"),
            Self::Unix { path } => write!(f, "unix:{path}"),
            Self::Proxy { host, port, .. } => write!(f, "{host}:{port}"),
            Self::Inet4 { .. } | Self::Inet6 { .. } => match self.to_socket_addr() {
                Some(addr) => fmt::Display::fmt(&addr, f),
                None => f.write_str("?"),
            },
        }
    }
}

impl Encode for SocketAddress {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        let family = self.family();
        e.begin_union("family", family as u64, family.field_count())?;
        match self {
            Self::Unspecified => {}
            Self::Unix { path } => {
                e.field("path")?;
                e.write_str(path)?;
            }
            Self::Inet4 {
                address,
                port,
                flow,
            } => {
                e.field("flow")?;
                e.write_u32(*flow)?;
                e.field("port")?;
                e.write_u64(u64::from(*port))?;
                e.field("address")?;
                e.write_bin(address)?;
            }
            Self::Inet6 {
                address,
                port,
                flow,
                scope_id,
            } => {
                e.field("flow")?;
                e.write_u32(*flow)?;
                e.field("port")?;
                e.write_u64(u64::from(*port))?;
                e.field("address")?;
                e.write_bin(address)?;
                e.field("scope_id")?;
                e.write_u32(*scope_id)?;
            }
            Self::Proxy { host, port, flow } => {
                e.field("flow")?;
                e.write_u32(*flow)?;
                e.field("port")?;
                e.write_u64(u64::from(*port))?;
                e.field("host")?;
                e.write_str(host)?;
            }
        }
        e.end_object()
    }
}

impl Decode for SocketAddress {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        let (tag, fields) = d.begin_union("family")?;
        let family =
            AddressFamily::from_u64(tag).ok_or_else(|| DecodeError::unknown("address family", tag))?;
        if fields != family.field_count() {
            return Err(DecodeError::length(
                "socket address",
                family.field_count() + 1,
                fields + 1,
            ));
        }
        let addr = match family {
            AddressFamily::Unspecified => Self::Unspecified,
            AddressFamily::Unix => {
                d.field("path")?;
                Self::Unix {
                    path: d.read_str()?,
                }
            }
            AddressFamily::Inet4 => {
                d.field("flow")?;
                let flow = d.read_u32()?;
                d.field("port")?;
                let port = d.read_u16()?;
                d.field("address")?;
                let address = fixed_bytes(d, "inet4 address")?;
                Self::Inet4 {
                    address,
                    port,
                    flow,
                }
            }
            AddressFamily::Inet6 => {
                d.field("flow")?;
                let flow = d.read_u32()?;
                d.field("port")?;
                let port = d.read_u16()?;
                d.field("address")?;
                let address = fixed_bytes(d, "inet6 address")?;
                d.field("scope_id")?;
                let scope_id = d.read_u32()?;
                Self::Inet6 {
                    address,
                    port,
                    flow,
                    scope_id,
                }
            }
            AddressFamily::Proxy => {
                d.field("flow")?;
                let flow = d.read_u32()?;
                d.field("port")?;
                let port = d.read_u16()?;
                d.field("host")?;
                let host = d.read_str()?;
                Self::Proxy { host, port, flow }
            }
        };
        d.end_object()?;
        Ok(addr)
    }
}

/// Reads a blob that must be exactly `N` bytes long.
fn fixed_bytes<const N: usize, D: Decoder + ?Sized>(
    d: &mut D,
    what: &'static str,
) -> Result<[u8; N], DecodeError> {
    let bytes = d.read_bin()?;
    bytes
        .as_slice()
        .try_into()
        .map_err(|_| DecodeError::length(what, N, bytes.len()))
}

/// Maps an IP address to the matching wire family with port zero.
impl From<IpAddr> for SocketAddress {
    fn from(ip: IpAddr) -> Self {
        SocketAddr::new(ip, 0).into()
    }
}
