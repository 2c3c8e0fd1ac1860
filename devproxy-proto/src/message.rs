//! The message envelope.

use crate::codec::{self, CodecKind, Decode, Decoder, Encode, Encoder};
use crate::error::{DecodeError, EncodeError};
use crate::reference::Reference;
use crate::registry::{Content, decode_content};

/// Protocol version of this build: `major << 24 | minor << 16 | patch`.
///
/// Peers reject envelopes carrying any other version.
pub const VERSION: u32 = version(
    env!("CARGO_PKG_VERSION_MAJOR"),
    env!("CARGO_PKG_VERSION_MINOR"),
    env!("CARGO_PKG_VERSION_PATCH"),
);

/// Packs a semantic version into the wire representation.
const fn version(major: &str, minor: &str, patch: &str) -> u32 {
    parse(major) << 24 | parse(minor) << 16 | parse(patch)
}

/// Parses a decimal version component at compile time.
const fn parse(s: &str) -> u32 {
    let bytes = s.as_bytes();
    let mut value = 0u32;
    let mut i = 0;
    while i < bytes.len() {
        value = value * 10 + (bytes[i] - b'0') as u32;
        i += 1;
    }
    value
}

/// A protocol envelope: routing header plus one payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Protocol version, always [`VERSION`] for locally built messages.
    pub version: u32,
    /// Sender.
    pub source: Reference,
    /// Proxy the message is routed through.
    pub proxy: Reference,
    /// Receiver: a link, stream, or [`Reference::NULL`] for the proxy itself.
    pub target: Reference,
    /// Correlates a response with its request.
    pub sequence_id: u32,
    /// Remote error code; nonzero means the request failed.
    pub error: i32,
    /// Whether this is a response.
    pub is_response: bool,
    /// Payload type tag.
    pub type_id: u32,
    /// Payload. `None` only for decoded envelopes of unknown type.
    pub content: Option<Content>,
}

impl Message {
    /// Creates an envelope whose tag and response flag follow `content`.
    pub fn new(source: Reference, target: Reference, content: impl Into<Content>) -> Self {
        let content = content.into();
        Self {
            version: VERSION,
            source,
            proxy: Reference::NULL,
            target,
            sequence_id: 0,
            error: 0,
            is_response: content.is_response(),
            type_id: content.message_type().code(),
            content: Some(content),
        }
    }

    /// Creates the response to `request`, swapping source and target and
    /// keeping its sequence id.
    pub fn response_to(request: &Self, content: impl Into<Content>) -> Self {
        let mut msg = Self::new(request.target, request.source, content);
        msg.proxy = request.proxy;
        msg.sequence_id = request.sequence_id;
        msg.is_response = true;
        msg
    }

    /// Sets the proxy reference.
    #[must_use]
    pub const fn with_proxy(mut self, proxy: Reference) -> Self {
        self.proxy = proxy;
        self
    }

    /// Sets the sequence id.
    #[must_use]
    pub const fn with_sequence(mut self, sequence_id: u32) -> Self {
        self.sequence_id = sequence_id;
        self
    }

    /// Sets the remote error code.
    #[must_use]
    pub const fn with_error(mut self, error: i32) -> Self {
        self.error = error;
        self
    }

    /// Takes the payload out of the envelope.
    pub fn into_content(self) -> Option<Content> {
        self.content
    }

    /// Encodes the envelope with the selected codec.
    pub fn to_vec(&self, kind: CodecKind) -> Result<Vec<u8>, EncodeError> {
        codec::to_vec(kind, self)
    }

    /// Decodes an envelope occupying all of `bytes`.
    pub fn from_slice(kind: CodecKind, bytes: &[u8]) -> Result<Self, DecodeError> {
        codec::from_slice(kind, bytes)
    }
}

impl Encode for Message {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        let content = self.content.as_ref().ok_or(EncodeError::MissingContent)?;
        if !content.matches(self.type_id, self.is_response) {
            return Err(EncodeError::TagMismatch {
                type_id: self.type_id,
                is_response: self.is_response,
                content: content.name(),
            });
        }
        e.begin_object(9)?;
        e.field("version")?;
        e.write_u32(self.version)?;
        e.field("source")?;
        self.source.encode(e)?;
        e.field("proxy")?;
        self.proxy.encode(e)?;
        e.field("target")?;
        self.target.encode(e)?;
        e.field("sequence_id")?;
        e.write_u32(self.sequence_id)?;
        e.field("error")?;
        e.write_i32(self.error)?;
        e.field("is_response")?;
        e.write_bool(self.is_response)?;
        e.field("type")?;
        e.write_u32(self.type_id)?;
        e.field("content")?;
        content.encode(e)?;
        e.end_object()
    }
}

impl Decode for Message {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        d.begin_object("message", 9)?;
        d.field("version")?;
        let version = d.read_u32()?;
        if version != VERSION {
            return Err(DecodeError::VersionMismatch {
                expected: VERSION,
                actual: version,
            });
        }
        d.field("source")?;
        let source = Reference::decode(d)?;
        d.field("proxy")?;
        let proxy = Reference::decode(d)?;
        d.field("target")?;
        let target = Reference::decode(d)?;
        d.field("sequence_id")?;
        let sequence_id = d.read_u32()?;
        d.field("error")?;
        let error = d.read_i32()?;
        d.field("is_response")?;
        let is_response = d.read_bool()?;
        d.field("type")?;
        let type_id = d.read_u32()?;
        d.field("content")?;
        let content = decode_content(type_id, is_response, d)?;
        d.end_object()?;
        Ok(Self {
            version,
            source,
            proxy,
            target,
            sequence_id,
            error,
            is_response,
            type_id,
            content,
        })
    }
}
