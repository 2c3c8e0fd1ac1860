//! Message type tags and content dispatch.
//!
//! An envelope's `(type_id, is_response)` pair selects its payload shape.
//! [`Content::message_type`] and [`Content::is_response`] map a payload to
//! its pair; [`decode_content`] is the inverse table. The two are kept in
//! lockstep by the `tags_match_decode_table` test.

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::content::{
    CloseRequest, CloseResponse, DataMessage, GetOptRequest, GetOptResponse, LinkRequest,
    LinkResponse, OpenRequest, OpenResponse, PingRequest, PingResponse, PollRequest, PollResponse,
    SetOptRequest, SetOptResponse,
};
use crate::error::{DecodeError, EncodeError};

/// Stable message type tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
#[non_exhaustive]
pub enum MessageType {
    /// Application-defined content outside the catalog.
    Custom = 0,
    /// Address probe.
    Ping = 10,
    /// Remote socket creation.
    Link = 12,
    /// Socket option write.
    SetOpt = 13,
    /// Socket option read.
    GetOpt = 14,
    /// Stream open.
    Open = 20,
    /// Link or stream close.
    Close = 21,
    /// Data transfer.
    Data = 30,
    /// Credit grant for polled streams.
    Poll = 31,
}

impl MessageType {
    /// Maps a wire tag to a message type.
    pub const fn from_u32(v: u32) -> Option<Self> {
        Some(match v {
            0 => Self::Custom,
            10 => Self::Ping,
            12 => Self::Link,
            13 => Self::SetOpt,
            14 => Self::GetOpt,
            20 => Self::Open,
            21 => Self::Close,
            30 => Self::Data,
            31 => Self::Poll,
            _ => return None,
        })
    }

    /// Returns the wire tag.
    pub const fn code(self) -> u32 {
        self as u32
    }

    /// Lowercase name used in logs and the CLI.
    pub const fn name(self) -> &'static str {
        match self {
            Self::Custom => "custom",
            Self::Ping => "ping",
            Self::Link => "link",
            Self::SetOpt => "setopt",
            Self::GetOpt => "getopt",
            Self::Open => "open",
            Self::Close => "close",
            Self::Data => "data",
            Self::Poll => "poll",
        }
    }
}

/// Every payload an envelope can carry.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum Content {
    /// See [`PingRequest`].
    PingRequest(PingRequest),
    /// See [`PingResponse`].
    PingResponse(PingResponse),
    /// See [`LinkRequest`].
    LinkRequest(LinkRequest),
    /// See [`LinkResponse`].
    LinkResponse(LinkResponse),
    /// See [`SetOptRequest`].
    SetOptRequest(SetOptRequest),
    /// See [`SetOptResponse`].
    SetOptResponse(SetOptResponse),
    /// See [`GetOptRequest`].
    GetOptRequest(GetOptRequest),
    /// See [`GetOptResponse`].
    GetOptResponse(GetOptResponse),
    /// See [`OpenRequest`].
    OpenRequest(OpenRequest),
    /// See [`OpenResponse`].
    OpenResponse(OpenResponse),
    /// See [`CloseRequest`].
    CloseRequest(CloseRequest),
    /// See [`CloseResponse`].
    CloseResponse(CloseResponse),
    /// See [`DataMessage`].
    Data(DataMessage),
    /// See [`PollRequest`].
    PollRequest(PollRequest),
    /// See [`PollResponse`].
    PollResponse(PollResponse),
}

impl Content {
    /// Returns the envelope type tag for this payload.
    pub const fn message_type(&self) -> MessageType {
        match self {
            Self::PingRequest(_) | Self::PingResponse(_) => MessageType::Ping,
            Self::LinkRequest(_) | Self::LinkResponse(_) => MessageType::Link,
            Self::SetOptRequest(_) | Self::SetOptResponse(_) => MessageType::SetOpt,
            Self::GetOptRequest(_) | Self::GetOptResponse(_) => MessageType::GetOpt,
            Self::OpenRequest(_) | Self::OpenResponse(_) => MessageType::Open,
            Self::CloseRequest(_) | Self::CloseResponse(_) => MessageType::Close,
            Self::Data(_) => MessageType::Data,
            Self::PollRequest(_) | Self::PollResponse(_) => MessageType::Poll,
        }
    }

    /// Returns the envelope response flag for this payload.
    ///
    /// Data messages flow in both directions and are always sent as
    /// non-responses.
    pub const fn is_response(&self) -> bool {
        match self {
            Self::PingResponse(_)
            | Self::LinkResponse(_)
            | Self::SetOptResponse(_)
            | Self::GetOptResponse(_)
            | Self::OpenResponse(_)
            | Self::CloseResponse(_)
            | Self::PollResponse(_) => true,
            Self::PingRequest(_)
            | Self::LinkRequest(_)
            | Self::SetOptRequest(_)
            | Self::GetOptRequest(_)
            | Self::OpenRequest(_)
            | Self::CloseRequest(_)
            | Self::Data(_)
            | Self::PollRequest(_) => false,
        }
    }

    /// Returns the variant name, for diagnostics.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PingRequest(_) => "PingRequest",
            Self::PingResponse(_) => "PingResponse",
            Self::LinkRequest(_) => "LinkRequest",
            Self::LinkResponse(_) => "LinkResponse",
            Self::SetOptRequest(_) => "SetOptRequest",
            Self::SetOptResponse(_) => "SetOptResponse",
            Self::GetOptRequest(_) => "GetOptRequest",
            Self::GetOptResponse(_) => "GetOptResponse",
            Self::OpenRequest(_) => "OpenRequest",
            Self::OpenResponse(_) => "OpenResponse",
            Self::CloseRequest(_) => "CloseRequest",
            Self::CloseResponse(_) => "CloseResponse",
            Self::Data(_) => "DataMessage",
            Self::PollRequest(_) => "PollRequest",
            Self::PollResponse(_) => "PollResponse",
        }
    }

    /// Returns `true` if an envelope tagged `(type_id, is_response)` may
    /// carry this payload.
    pub const fn matches(&self, type_id: u32, is_response: bool) -> bool {
        if self.message_type().code() != type_id {
            return false;
        }
        matches!(self, Self::Data(_)) || self.is_response() == is_response
    }
}

impl Encode for Content {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        match self {
            Self::PingRequest(c) => c.encode(e),
            Self::PingResponse(c) => c.encode(e),
            Self::LinkRequest(c) => c.encode(e),
            Self::LinkResponse(c) => c.encode(e),
            Self::SetOptRequest(c) => c.encode(e),
            Self::SetOptResponse(c) => c.encode(e),
            Self::GetOptRequest(c) => c.encode(e),
            Self::GetOptResponse(c) => c.encode(e),
            Self::OpenRequest(c) => c.encode(e),
            Self::OpenResponse(c) => c.encode(e),
            Self::CloseRequest(c) => c.encode(e),
            Self::CloseResponse(c) => c.encode(e),
            Self::Data(c) => c.encode(e),
            Self::PollRequest(c) => c.encode(e),
            Self::PollResponse(c) => c.encode(e),
        }
    }
}

/// Decodes the payload for `(type_id, is_response)`.
///
/// Unknown pairs, and [`MessageType::Custom`], consume and discard the
/// value and return `None`.
pub fn decode_content<D: Decoder + ?Sized>(
    type_id: u32,
    is_response: bool,
    d: &mut D,
) -> Result<Option<Content>, DecodeError> {
    let Some(ty) = MessageType::from_u32(type_id) else {
        d.skip()?;
        return Ok(None);
    };
    let content = match (ty, is_response) {
        (MessageType::Ping, false) => Content::PingRequest(Decode::decode(d)?),
        (MessageType::Ping, true) => Content::PingResponse(Decode::decode(d)?),
        (MessageType::Link, false) => Content::LinkRequest(Decode::decode(d)?),
        (MessageType::Link, true) => Content::LinkResponse(Decode::decode(d)?),
        (MessageType::SetOpt, false) => Content::SetOptRequest(Decode::decode(d)?),
        (MessageType::SetOpt, true) => Content::SetOptResponse(Decode::decode(d)?),
        (MessageType::GetOpt, false) => Content::GetOptRequest(Decode::decode(d)?),
        (MessageType::GetOpt, true) => Content::GetOptResponse(Decode::decode(d)?),
        (MessageType::Open, false) => Content::OpenRequest(Decode::decode(d)?),
        (MessageType::Open, true) => Content::OpenResponse(Decode::decode(d)?),
        (MessageType::Close, false) => Content::CloseRequest(Decode::decode(d)?),
        (MessageType::Close, true) => Content::CloseResponse(Decode::decode(d)?),
        (MessageType::Data, _) => Content::Data(Decode::decode(d)?),
        (MessageType::Poll, false) => Content::PollRequest(Decode::decode(d)?),
        (MessageType::Poll, true) => Content::PollResponse(Decode::decode(d)?),
        (MessageType::Custom, _) => {
            d.skip()?;
            return Ok(None);
        }
    };
    Ok(Some(content))
}

/// Conversions between [`Content`] and each payload type.
macro_rules! content_conversions {
    ($($variant:ident($ty:ty)),+ $(,)?) => {
        $(
            impl From<$ty> for Content {
                fn from(c: $ty) -> Self {
                    Self::$variant(c)
                }
            }

            impl TryFrom<Content> for $ty {
                type Error = Content;

                fn try_from(c: Content) -> Result<Self, Content> {
                    match c {
                        Content::$variant(inner) => Ok(inner),
                        other => Err(other),
                    }
                }
            }
        )+
    };
}

content_conversions! {
    PingRequest(PingRequest),
    PingResponse(PingResponse),
    LinkRequest(LinkRequest),
    LinkResponse(LinkResponse),
    SetOptRequest(SetOptRequest),
    SetOptResponse(SetOptResponse),
    GetOptRequest(GetOptRequest),
    GetOptResponse(GetOptResponse),
    OpenRequest(OpenRequest),
    OpenResponse(OpenResponse),
    CloseRequest(CloseRequest),
    CloseResponse(CloseResponse),
    Data(DataMessage),
    PollRequest(PollRequest),
    PollResponse(PollResponse),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::SocketAddress;
    use crate::codec::pack::{PackReader, PackWriter};
    use crate::content::PhysicalAddress;
    use crate::property::{Property, SocketInfo, SocketOption};
    use crate::reference::Reference;

    fn catalog() -> Vec<Content> {
        let addr = SocketAddress::proxy("dev", 7);
        vec![
            PingRequest { address: addr.clone() }.into(),
            PingResponse {
                address: addr.clone(),
                physical_address: PhysicalAddress::default(),
                time_ms: 1,
            }
            .into(),
            LinkRequest::new(SocketInfo::stream(addr.clone())).into(),
            LinkResponse {
                link_id: Reference::new(),
                local_address: SocketAddress::Unspecified,
                peer_address: addr,
            }
            .into(),
            SetOptRequest {
                option_value: Property::option(SocketOption::IpTtl, 64),
            }
            .into(),
            SetOptResponse {}.into(),
            GetOptRequest {
                option: SocketOption::IpTtl,
            }
            .into(),
            GetOptResponse {
                option_value: Property::option(SocketOption::IpTtl, 64),
            }
            .into(),
            OpenRequest {
                stream_id: Reference::new(),
                stream_type: 0,
                connection_string: String::new(),
                is_polled: false,
                max_receive_buffer: 0,
            }
            .into(),
            OpenResponse {}.into(),
            CloseRequest {}.into(),
            CloseResponse::new(1, 2, 3, 4).into(),
            DataMessage::new(b"x".to_vec()).into(),
            PollRequest { timeout_ms: 1 }.into(),
            PollResponse {}.into(),
        ]
    }

    #[test]
    fn tags_match_decode_table() {
        for content in catalog() {
            let mut w = PackWriter::new();
            content.encode(&mut w).unwrap();
            let bytes = w.into_inner();
            let mut r = PackReader::new(&bytes);
            let decoded = decode_content(
                content.message_type().code(),
                content.is_response(),
                &mut r,
            )
            .unwrap();
            assert_eq!(decoded.as_ref(), Some(&content), "{}", content.name());
        }
    }

    #[test]
    fn data_accepts_either_flag() {
        let content = Content::from(DataMessage::new(b"abc".to_vec()));
        assert!(content.matches(30, true));
        assert!(content.matches(30, false));
        let mut w = PackWriter::new();
        content.encode(&mut w).unwrap();
        let bytes = w.into_inner();
        let decoded = decode_content(30, true, &mut PackReader::new(&bytes)).unwrap();
        assert_eq!(decoded, Some(content));
    }

    #[test]
    fn unknown_and_custom_are_skipped() {
        let mut w = PackWriter::new();
        CloseResponse::new(1, 2, 3, 4).encode(&mut w).unwrap();
        let bytes = w.into_inner();
        for type_id in [0, 99] {
            let mut r = PackReader::new(&bytes);
            assert_eq!(decode_content(type_id, true, &mut r).unwrap(), None);
            assert_eq!(r.remaining(), 0);
        }
    }

    #[test]
    fn try_from_returns_other_variant() {
        let content = Content::from(PollResponse {});
        let err = CloseResponse::try_from(content.clone()).unwrap_err();
        assert_eq!(err, content);
        assert!(PollResponse::try_from(content).is_ok());
    }

    #[test]
    fn response_flag_mismatch_is_rejected() {
        let content = Content::from(CloseRequest {});
        assert!(content.matches(21, false));
        assert!(!content.matches(21, true));
        assert!(!content.matches(20, false));
    }
}
