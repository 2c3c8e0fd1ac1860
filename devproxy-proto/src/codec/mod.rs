//! Primitive value codecs.
//!
//! Two interchangeable wire formats implement the same [`Encoder`] /
//! [`Decoder`] pair:
//!
//! - [`pack`]: MessagePack-compatible binary, the format native peers speak.
//! - [`json`]: a structurally equivalent JSON rendering for debugging and
//!   text transports.
//!
//! Every protocol type implements [`Encode`] and [`Decode`] once, against
//! the traits, and is therefore available in both formats.
//!
//! # Objects
//!
//! A record is written as an *object*: in the binary format this is an
//! array of `fields + 1` elements whose first element is a discriminator
//! slot (nil for plain records) followed by the fields in declared order.
//! Field order is part of the wire contract. Tagged unions (socket
//! addresses, properties) put their discriminator in that first slot.

pub mod json;
pub mod pack;

use serde::{Deserialize, Serialize};

use crate::error::{DecodeError, EncodeError};
use crate::reference::Reference;

/// Wire format selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CodecKind {
    /// MessagePack-compatible binary encoding.
    #[default]
    Pack,
    /// JSON encoding.
    Json,
}

impl std::fmt::Display for CodecKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Pack => "pack",
            Self::Json => "json",
        })
    }
}

impl std::str::FromStr for CodecKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pack" | "msgpack" => Ok(Self::Pack),
            "json" => Ok(Self::Json),
            _ => Err(format!("unknown codec: {s}")),
        }
    }
}

/// Sink for primitive values.
pub trait Encoder {
    /// Writes a nil value.
    fn write_nil(&mut self) -> Result<(), EncodeError>;
    /// Writes a boolean.
    fn write_bool(&mut self, v: bool) -> Result<(), EncodeError>;
    /// Writes an unsigned integer in its smallest representation.
    fn write_u64(&mut self, v: u64) -> Result<(), EncodeError>;
    /// Writes a signed integer in its smallest representation.
    fn write_i64(&mut self, v: i64) -> Result<(), EncodeError>;
    /// Writes a double precision float.
    fn write_f64(&mut self, v: f64) -> Result<(), EncodeError>;
    /// Writes a UTF-8 string.
    fn write_str(&mut self, v: &str) -> Result<(), EncodeError>;
    /// Writes an opaque byte blob.
    fn write_bin(&mut self, v: &[u8]) -> Result<(), EncodeError>;
    /// Starts an array of `len` elements.
    fn begin_array(&mut self, len: usize) -> Result<(), EncodeError>;
    /// Ends the innermost array.
    fn end_array(&mut self) -> Result<(), EncodeError>;
    /// Starts a record with `fields` fields and an empty discriminator slot.
    fn begin_object(&mut self, fields: usize) -> Result<(), EncodeError>;
    /// Starts a tagged union whose discriminator `tag` is written first.
    fn begin_union(&mut self, tag_name: &'static str, tag: u64, fields: usize)
    -> Result<(), EncodeError>;
    /// Names the next value inside the innermost object.
    fn field(&mut self, name: &'static str) -> Result<(), EncodeError>;
    /// Ends the innermost object or union.
    fn end_object(&mut self) -> Result<(), EncodeError>;

    /// Writes a peer/link/stream reference.
    fn write_reference(&mut self, r: &Reference) -> Result<(), EncodeError> {
        self.write_bin(r.as_bytes())
    }

    /// Writes a `u32`.
    fn write_u32(&mut self, v: u32) -> Result<(), EncodeError> {
        self.write_u64(u64::from(v))
    }

    /// Writes an `i32`.
    fn write_i32(&mut self, v: i32) -> Result<(), EncodeError> {
        self.write_i64(i64::from(v))
    }
}

/// Source of primitive values.
pub trait Decoder {
    /// Reads a nil value.
    fn read_nil(&mut self) -> Result<(), DecodeError>;
    /// Reads a boolean.
    fn read_bool(&mut self) -> Result<bool, DecodeError>;
    /// Reads an unsigned integer of any wire width.
    fn read_u64(&mut self) -> Result<u64, DecodeError>;
    /// Reads a signed integer of any wire width.
    fn read_i64(&mut self) -> Result<i64, DecodeError>;
    /// Reads a float.
    fn read_f64(&mut self) -> Result<f64, DecodeError>;
    /// Reads a UTF-8 string.
    fn read_str(&mut self) -> Result<String, DecodeError>;
    /// Reads an opaque byte blob.
    fn read_bin(&mut self) -> Result<Vec<u8>, DecodeError>;
    /// Starts an array and returns its element count.
    fn begin_array(&mut self) -> Result<usize, DecodeError>;
    /// Ends the innermost array.
    fn end_array(&mut self) -> Result<(), DecodeError>;
    /// Starts a record, checking it holds exactly `fields` fields.
    fn begin_object(&mut self, what: &'static str, fields: usize) -> Result<(), DecodeError>;
    /// Starts a tagged union and returns `(tag, remaining field count)`.
    fn begin_union(&mut self, tag_name: &'static str) -> Result<(u64, usize), DecodeError>;
    /// Positions the reader on the named field of the innermost object.
    fn field(&mut self, name: &'static str) -> Result<(), DecodeError>;
    /// Ends the innermost object or union.
    fn end_object(&mut self) -> Result<(), DecodeError>;
    /// Consumes and discards one value of any shape.
    fn skip(&mut self) -> Result<(), DecodeError>;

    /// Reads a peer/link/stream reference.
    fn read_reference(&mut self) -> Result<Reference, DecodeError> {
        let bytes = self.read_bin()?;
        let id: [u8; 16] = bytes
            .as_slice()
            .try_into()
            .map_err(|_| DecodeError::length("reference", 16, bytes.len()))?;
        Ok(Reference::from_bytes(id))
    }

    /// Reads a `u32`.
    fn read_u32(&mut self) -> Result<u32, DecodeError> {
        narrow(self.read_u64()?, "u32")
    }

    /// Reads a `u16`.
    fn read_u16(&mut self) -> Result<u16, DecodeError> {
        narrow(self.read_u64()?, "u16")
    }

    /// Reads a `u8`.
    fn read_u8(&mut self) -> Result<u8, DecodeError> {
        narrow(self.read_u64()?, "u8")
    }

    /// Reads an `i32`.
    fn read_i32(&mut self) -> Result<i32, DecodeError> {
        narrow(self.read_i64()?, "i32")
    }
}

/// Converts between integer widths, reporting overflow with context.
fn narrow<T, U>(v: U, target: &'static str) -> Result<T, DecodeError>
where
    T: TryFrom<U>,
    U: Into<i128> + Copy,
{
    T::try_from(v).map_err(|_| DecodeError::IntegerOverflow {
        value: v.into(),
        target,
    })
}

/// A value that can be written with any [`Encoder`].
pub trait Encode {
    /// Writes `self` to `e`.
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError>;
}

/// A value that can be read from any [`Decoder`].
pub trait Decode: Sized {
    /// Reads one value from `d`.
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError>;
}

impl<T: Encode> Encode for Vec<T> {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        e.begin_array(self.len())?;
        for item in self {
            item.encode(e)?;
        }
        e.end_array()
    }
}

impl<T: Decode> Decode for Vec<T> {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        let len = d.begin_array()?;
        // Cap the preallocation: the length prefix is untrusted input.
        let mut items = Self::with_capacity(len.min(64));
        for _ in 0..len {
            items.push(T::decode(d)?);
        }
        d.end_array()?;
        Ok(items)
    }
}

/// Encodes `value` with the selected codec.
pub fn to_vec<T: Encode + ?Sized>(kind: CodecKind, value: &T) -> Result<Vec<u8>, EncodeError> {
    match kind {
        CodecKind::Pack => {
            let mut w = pack::PackWriter::new();
            value.encode(&mut w)?;
            Ok(w.into_inner())
        }
        CodecKind::Json => {
            let mut w = json::JsonWriter::new();
            value.encode(&mut w)?;
            Ok(serde_json::to_vec(&w.finish()?)?)
        }
    }
}

/// Decodes exactly one value occupying all of `bytes`.
pub fn from_slice<T: Decode>(kind: CodecKind, bytes: &[u8]) -> Result<T, DecodeError> {
    let (value, used) = decode_prefix(kind, bytes)?;
    let rest = bytes.len() - used;
    // JSON documents may legitimately end in whitespace.
    let trailing = match kind {
        CodecKind::Pack => rest,
        CodecKind::Json => bytes[used..]
            .iter()
            .filter(|b| !b.is_ascii_whitespace())
            .count(),
    };
    if trailing == 0 {
        Ok(value)
    } else {
        Err(DecodeError::TrailingBytes(rest))
    }
}

/// Decodes one value from the front of `bytes`.
///
/// Returns the value and the number of bytes consumed. Both formats are
/// self-delimiting, so back-to-back values can be read without framing;
/// an incomplete value yields [`DecodeError::Truncated`].
pub fn decode_prefix<T: Decode>(kind: CodecKind, bytes: &[u8]) -> Result<(T, usize), DecodeError> {
    match kind {
        CodecKind::Pack => {
            let mut r = pack::PackReader::new(bytes);
            let value = T::decode(&mut r)?;
            Ok((value, r.position()))
        }
        CodecKind::Json => {
            let mut stream = serde_json::Deserializer::from_slice(bytes).into_iter();
            let doc = match stream.next() {
                Some(Ok(doc)) => doc,
                Some(Err(e)) if e.is_eof() => return Err(DecodeError::Truncated { needed: 1 }),
                Some(Err(e)) => return Err(e.into()),
                None => return Err(DecodeError::Truncated { needed: 1 }),
            };
            let used = stream.byte_offset();
            let mut r = json::JsonReader::new(doc);
            Ok((T::decode(&mut r)?, used))
        }
    }
}
