//! Browse service messages.
//!
//! Browse requests and responses are not envelope content. They travel as
//! back-to-back encoded objects inside the [`DataMessage`] payloads of a
//! stream opened to the proxy's browse service at [`BROWSE_PORT`], so a
//! single object may span several payloads.
//!
//! [`DataMessage`]: crate::DataMessage

use std::fmt;

use crate::address::SocketAddress;
use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::error::{DecodeError, EncodeError};
use crate::property::{Property, wire_enum};
use crate::reference::Reference;

/// Browse protocol version sent in every [`BrowseRequest`].
pub const BROWSE_VERSION: u8 = 1;

/// Proxy-local port of the browse service.
pub const BROWSE_PORT: u16 = 1;

/// Address of the browse service on any proxy.
pub fn browse_service() -> SocketAddress {
    SocketAddress::proxy("", BROWSE_PORT)
}

wire_enum! {
    /// What a browse request asks for.
    BrowseType: "browse type" {
        /// Stops the browse identified by the request handle.
        Cancel = 0,
        /// Resolves a host name to addresses.
        Resolve = 1,
        /// Enumerates service instances.
        Service = 2,
        /// Lists a directory on the proxy host.
        Dirpath = 3,
    }
}

/// Flags carried by a [`BrowseResponse`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BrowseFlags(u32);

impl BrowseFlags {
    /// No further results will ever arrive.
    pub const EOS: Self = Self(0x1);
    /// The item was removed rather than added.
    pub const REMOVED: Self = Self(0x2);
    /// All currently known results have been delivered.
    pub const ALL_FOR_NOW: Self = Self(0x4);
    /// The response carries no item.
    pub const EMPTY: Self = Self(0x8);

    /// Wraps raw flag bits.
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Returns the raw flag bits.
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns `true` if every flag in `other` is set.
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if the response ends the current batch of results.
    pub const fn is_terminal(self) -> bool {
        self.0 & (Self::EOS.0 | Self::ALL_FOR_NOW.0) != 0
    }
}

impl std::ops::BitOr for BrowseFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl fmt::Debug for BrowseFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (Self::EOS, "EOS"),
            (Self::REMOVED, "REMOVED"),
            (Self::ALL_FOR_NOW, "ALL_FOR_NOW"),
            (Self::EMPTY, "EMPTY"),
        ];
        let set: Vec<_> = names
            .iter()
            .filter(|(flag, _)| self.contains(*flag))
            .map(|(_, name)| *name)
            .collect();
        write!(f, "BrowseFlags({:#x}: {})", self.0, set.join(" | "))
    }
}

/// Starts or cancels a browse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseRequest {
    /// Client-chosen handle echoed in every response.
    pub handle: Reference,
    /// Always [`BROWSE_VERSION`].
    pub version: u8,
    /// What to browse for.
    pub browse_type: BrowseType,
    /// Request flags (currently unused by proxies).
    pub flags: u32,
    /// Name, service type, or directory to browse.
    pub item: SocketAddress,
}

impl BrowseRequest {
    /// Creates a request with a fresh handle.
    pub fn new(browse_type: BrowseType, item: SocketAddress) -> Self {
        Self {
            handle: Reference::new(),
            version: BROWSE_VERSION,
            browse_type,
            flags: 0,
            item,
        }
    }

    /// Creates the request that stops the browse `handle`.
    pub const fn cancel(handle: Reference) -> Self {
        Self {
            handle,
            version: BROWSE_VERSION,
            browse_type: BrowseType::Cancel,
            flags: 0,
            item: SocketAddress::Unspecified,
        }
    }
}

impl Encode for BrowseRequest {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        e.begin_object(5)?;
        e.field("handle")?;
        self.handle.encode(e)?;
        e.field("version")?;
        e.write_u64(u64::from(self.version))?;
        e.field("browse_type")?;
        self.browse_type.encode(e)?;
        e.field("flags")?;
        e.write_u32(self.flags)?;
        e.field("item")?;
        self.item.encode(e)?;
        e.end_object()
    }
}

impl Decode for BrowseRequest {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        d.begin_object("browse request", 5)?;
        d.field("handle")?;
        let handle = Reference::decode(d)?;
        d.field("version")?;
        let version = d.read_u8()?;
        d.field("browse_type")?;
        let browse_type = BrowseType::decode(d)?;
        d.field("flags")?;
        let flags = d.read_u32()?;
        d.field("item")?;
        let item = SocketAddress::decode(d)?;
        d.end_object()?;
        Ok(Self {
            handle,
            version,
            browse_type,
            flags,
            item,
        })
    }
}

/// One browse result, or the end of a batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrowseResponse {
    /// Handle of the request this answers.
    pub handle: Reference,
    /// Result flags.
    pub flags: BrowseFlags,
    /// Error code (0 = success).
    pub error: i32,
    /// The result item, [`SocketAddress::Unspecified`] when `EMPTY`.
    pub item: SocketAddress,
    /// Attributes of the item.
    pub properties: Vec<Property>,
    /// Interface index the item was found on.
    pub interface: i32,
}

impl BrowseResponse {
    /// Creates an item result.
    pub const fn item(handle: Reference, item: SocketAddress) -> Self {
        Self {
            handle,
            flags: BrowseFlags(0),
            error: 0,
            item,
            properties: Vec::new(),
            interface: 0,
        }
    }

    /// Creates an item-less response carrying only `flags`.
    pub const fn marker(handle: Reference, flags: BrowseFlags) -> Self {
        Self {
            handle,
            flags: BrowseFlags(flags.0 | BrowseFlags::EMPTY.0),
            error: 0,
            item: SocketAddress::Unspecified,
            properties: Vec::new(),
            interface: 0,
        }
    }

    /// Returns `true` if the response carries an item.
    pub const fn has_item(&self) -> bool {
        !self.flags.contains(BrowseFlags::EMPTY)
    }
}

impl Encode for BrowseResponse {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        e.begin_object(6)?;
        e.field("handle")?;
        self.handle.encode(e)?;
        e.field("flags")?;
        e.write_u32(self.flags.0)?;
        e.field("error")?;
        e.write_i32(self.error)?;
        e.field("item")?;
        self.item.encode(e)?;
        e.field("properties")?;
        self.properties.encode(e)?;
        e.field("interface")?;
        e.write_i32(self.interface)?;
        e.end_object()
    }
}

impl Decode for BrowseResponse {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        d.begin_object("browse response", 6)?;
        d.field("handle")?;
        let handle = Reference::decode(d)?;
        d.field("flags")?;
        let flags = BrowseFlags(d.read_u32()?);
        d.field("error")?;
        let error = d.read_i32()?;
        d.field("item")?;
        let item = SocketAddress::decode(d)?;
        d.field("properties")?;
        let properties = Vec::decode(d)?;
        d.field("interface")?;
        let interface = d.read_i32()?;
        d.end_object()?;
        Ok(Self {
            handle,
            flags,
            error,
            item,
            properties,
            interface,
        })
    }
}
