//! Wire protocol for devproxy socket tunnelling.
//!
//! A client talks to a remote proxy through a relay by exchanging
//! [`Message`] envelopes. Each envelope carries routing references, a
//! sequence id for request/response correlation, and one typed
//! [`Content`] payload selected by `(type_id, is_response)`.
//!
//! Envelopes are encoded with either of two interchangeable codecs (see
//! [`codec`]): a compact MessagePack-compatible binary form, and a JSON
//! form for debugging and text transports. Byte-stream transports frame
//! each envelope with a 4-byte big-endian length prefix (see [`frame`]).

pub mod address;
pub mod browse;
pub mod codec;
pub mod content;
mod error;
pub mod frame;
mod message;
pub mod property;
mod reference;
pub mod registry;

pub use address::{AddressFamily, SocketAddress};
pub use browse::{
    BROWSE_PORT, BROWSE_VERSION, BrowseFlags, BrowseRequest, BrowseResponse, BrowseType,
    browse_service,
};
pub use codec::{CodecKind, Decode, Decoder, Encode, Encoder};
pub use content::{
    CloseRequest, CloseResponse, DataMessage, GetOptRequest, GetOptResponse, LINK_VERSION,
    LinkRequest, LinkResponse, OpenRequest, OpenResponse, PhysicalAddress, PingRequest,
    PingResponse, PollRequest, PollResponse, SetOptRequest, SetOptResponse,
};
pub use error::{DecodeError, EncodeError};
pub use frame::{FrameBuffer, MAX_FRAME, ObjectBuffer};
pub use message::{Message, VERSION};
pub use property::{Property, ProtocolType, SocketInfo, SocketOption, SocketType};
pub use reference::Reference;
pub use registry::{Content, MessageType};
