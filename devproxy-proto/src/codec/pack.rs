//! MessagePack binary codec.
//!
//! Values go through `rmp` one at a time; this module only adds the record
//! layout on top (an array whose first slot is nil for plain records or the
//! discriminator for unions). Integers are written in the smallest form that
//! holds them; readers accept any integer form and range-check into the
//! requested type.

use rmp::Marker;
use rmp::decode::{self as read, NumValueReadError, ValueReadError};
use rmp::encode::{self as write, ValueWriteError};

use crate::codec::{Decoder, Encoder};
use crate::error::{DecodeError, EncodeError};

/// Nesting limit for [`PackReader::skip`].
const MAX_DEPTH: usize = 64;

/// Binary encoder writing into an owned buffer.
#[derive(Debug, Default)]
pub struct PackWriter {
    /// Encoded bytes so far.
    buf: Vec<u8>,
}

impl PackWriter {
    /// Creates an empty writer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the encoded bytes.
    pub fn into_inner(self) -> Vec<u8> {
        self.buf
    }
}

/// Checks that a length fits the 32-bit MessagePack headers.
fn wire_len(what: &'static str, len: usize) -> Result<u32, EncodeError> {
    u32::try_from(len).map_err(|_| EncodeError::TooLong { what, len })
}

/// Wraps a marker write failure.
fn marker_write(e: std::io::Error) -> EncodeError {
    EncodeError::Write(ValueWriteError::InvalidMarkerWrite(e))
}

impl Encoder for PackWriter {
    fn write_nil(&mut self) -> Result<(), EncodeError> {
        write::write_nil(&mut self.buf).map_err(marker_write)
    }

    fn write_bool(&mut self, v: bool) -> Result<(), EncodeError> {
        write::write_bool(&mut self.buf, v).map_err(marker_write)
    }

    fn write_u64(&mut self, v: u64) -> Result<(), EncodeError> {
        write::write_uint(&mut self.buf, v)?;
        Ok(())
    }

    fn write_i64(&mut self, v: i64) -> Result<(), EncodeError> {
        match u64::try_from(v) {
            Ok(u) => self.write_u64(u),
            Err(_) => {
                write::write_sint(&mut self.buf, v)?;
                Ok(())
            }
        }
    }

    fn write_f64(&mut self, v: f64) -> Result<(), EncodeError> {
        write::write_f64(&mut self.buf, v)?;
        Ok(())
    }

    fn write_str(&mut self, v: &str) -> Result<(), EncodeError> {
        wire_len("string", v.len())?;
        write::write_str(&mut self.buf, v)?;
        Ok(())
    }

    fn write_bin(&mut self, v: &[u8]) -> Result<(), EncodeError> {
        wire_len("binary", v.len())?;
        write::write_bin(&mut self.buf, v)?;
        Ok(())
    }

    fn begin_array(&mut self, len: usize) -> Result<(), EncodeError> {
        write::write_array_len(&mut self.buf, wire_len("array", len)?)?;
        Ok(())
    }

    fn end_array(&mut self) -> Result<(), EncodeError> {
        Ok(())
    }

    fn begin_object(&mut self, fields: usize) -> Result<(), EncodeError> {
        self.begin_array(fields + 1)?;
        self.write_nil()
    }

    fn begin_union(
        &mut self,
        _tag_name: &'static str,
        tag: u64,
        fields: usize,
    ) -> Result<(), EncodeError> {
        self.begin_array(fields + 1)?;
        self.write_u64(tag)
    }

    fn field(&mut self, _name: &'static str) -> Result<(), EncodeError> {
        Ok(())
    }

    fn end_object(&mut self) -> Result<(), EncodeError> {
        Ok(())
    }
}

/// Binary decoder over a borrowed buffer.
#[derive(Debug)]
pub struct PackReader<'a> {
    /// Whole input.
    buf: &'a [u8],
    /// Unread tail of `buf`.
    rest: &'a [u8],
}

impl<'a> PackReader<'a> {
    /// Creates a reader positioned at the start of `buf`.
    pub const fn new(buf: &'a [u8]) -> Self {
        Self { buf, rest: buf }
    }

    /// Number of bytes consumed so far.
    pub const fn position(&self) -> usize {
        self.buf.len() - self.rest.len()
    }

    /// Number of bytes not yet consumed.
    pub const fn remaining(&self) -> usize {
        self.rest.len()
    }

    /// Consumes `n` payload bytes.
    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.rest.len() < n {
            return Err(DecodeError::Truncated {
                needed: n - self.rest.len(),
            });
        }
        let (out, rest) = self.rest.split_at(n);
        self.rest = rest;
        Ok(out)
    }

    /// Returns the marker of the next value without consuming it.
    fn peek(&self) -> Result<Marker, DecodeError> {
        let mut rd = self.rest;
        read::read_marker(&mut rd).map_err(|_| DecodeError::Truncated { needed: 1 })
    }

    /// Reads an integer of any width, restoring the position on failure.
    fn int(&mut self) -> Result<i128, DecodeError> {
        let start = self.rest;
        read_wide(&mut self.rest).inspect_err(|_| self.rest = start)
    }

    /// Skips one value, bounding recursion at [`MAX_DEPTH`].
    fn skip_value(&mut self, depth: usize) -> Result<(), DecodeError> {
        if depth > MAX_DEPTH {
            return Err(DecodeError::Structure("value nested too deeply"));
        }
        let marker = self.peek()?;
        let rd = &mut self.rest;
        let (bytes, children) = match marker {
            Marker::Null => {
                read::read_nil(rd).map_err(|e| value_err("nil", e))?;
                (0, 0)
            }
            Marker::True | Marker::False => {
                read::read_bool(rd).map_err(|e| value_err("bool", e))?;
                (0, 0)
            }
            Marker::FixPos(_)
            | Marker::FixNeg(_)
            | Marker::U8
            | Marker::U16
            | Marker::U32
            | Marker::U64
            | Marker::I8
            | Marker::I16
            | Marker::I32
            | Marker::I64 => {
                read_wide(rd)?;
                (0, 0)
            }
            Marker::F32 => {
                read::read_f32(rd).map_err(|e| value_err("float", e))?;
                (0, 0)
            }
            Marker::F64 => {
                read::read_f64(rd).map_err(|e| value_err("float", e))?;
                (0, 0)
            }
            Marker::FixStr(_) | Marker::Str8 | Marker::Str16 | Marker::Str32 => {
                (read::read_str_len(rd).map_err(|e| value_err("string", e))?, 0)
            }
            Marker::Bin8 | Marker::Bin16 | Marker::Bin32 => {
                (read::read_bin_len(rd).map_err(|e| value_err("binary", e))?, 0)
            }
            Marker::FixArray(_) | Marker::Array16 | Marker::Array32 => {
                (0, read::read_array_len(rd).map_err(|e| value_err("array", e))?)
            }
            Marker::FixMap(_) | Marker::Map16 | Marker::Map32 => {
                let pairs = read::read_map_len(rd).map_err(|e| value_err("map", e))?;
                (0, pairs.saturating_mul(2))
            }
            Marker::FixExt1
            | Marker::FixExt2
            | Marker::FixExt4
            | Marker::FixExt8
            | Marker::FixExt16
            | Marker::Ext8
            | Marker::Ext16
            | Marker::Ext32 => {
                let meta = read::read_ext_meta(rd).map_err(|e| value_err("extension", e))?;
                (meta.size, 0)
            }
            Marker::Reserved => {
                return Err(DecodeError::Unexpected {
                    expected: "value",
                    found: "reserved marker 0xc1".into(),
                });
            }
        };
        self.take(bytes as usize)?;
        for _ in 0..children {
            self.skip_value(depth + 1)?;
        }
        Ok(())
    }
}

impl Decoder for PackReader<'_> {
    fn read_nil(&mut self) -> Result<(), DecodeError> {
        read::read_nil(&mut self.rest).map_err(|e| value_err("nil", e))
    }

    fn read_bool(&mut self) -> Result<bool, DecodeError> {
        read::read_bool(&mut self.rest).map_err(|e| value_err("bool", e))
    }

    fn read_u64(&mut self) -> Result<u64, DecodeError> {
        let value = self.int()?;
        u64::try_from(value).map_err(|_| DecodeError::IntegerOverflow {
            value,
            target: "u64",
        })
    }

    fn read_i64(&mut self) -> Result<i64, DecodeError> {
        let value = self.int()?;
        i64::try_from(value).map_err(|_| DecodeError::IntegerOverflow {
            value,
            target: "i64",
        })
    }

    fn read_f64(&mut self) -> Result<f64, DecodeError> {
        if self.peek()? == Marker::F32 {
            return read::read_f32(&mut self.rest)
                .map(f64::from)
                .map_err(|e| value_err("float", e));
        }
        read::read_f64(&mut self.rest).map_err(|e| value_err("float", e))
    }

    fn read_str(&mut self) -> Result<String, DecodeError> {
        let len = read::read_str_len(&mut self.rest).map_err(|e| value_err("string", e))?;
        let bytes = self.take(len as usize)?;
        Ok(std::str::from_utf8(bytes)?.to_owned())
    }

    fn read_bin(&mut self) -> Result<Vec<u8>, DecodeError> {
        let len = read::read_bin_len(&mut self.rest).map_err(|e| value_err("binary", e))?;
        Ok(self.take(len as usize)?.to_vec())
    }

    fn begin_array(&mut self) -> Result<usize, DecodeError> {
        let len = read::read_array_len(&mut self.rest).map_err(|e| value_err("array", e))?;
        Ok(len as usize)
    }

    fn end_array(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn begin_object(&mut self, what: &'static str, fields: usize) -> Result<(), DecodeError> {
        let len = self.begin_array()?;
        if len != fields + 1 {
            return Err(DecodeError::length(what, fields + 1, len));
        }
        self.read_nil()
    }

    fn begin_union(&mut self, tag_name: &'static str) -> Result<(u64, usize), DecodeError> {
        let len = self.begin_array()?;
        if len == 0 {
            return Err(DecodeError::length(tag_name, 1, 0));
        }
        let tag = self.read_u64()?;
        Ok((tag, len - 1))
    }

    fn field(&mut self, _name: &'static str) -> Result<(), DecodeError> {
        Ok(())
    }

    fn end_object(&mut self) -> Result<(), DecodeError> {
        Ok(())
    }

    fn skip(&mut self) -> Result<(), DecodeError> {
        self.skip_value(0)
    }
}

/// Maps an `rmp` read failure. Reads from a slice only fail at its end.
fn value_err(expected: &'static str, e: ValueReadError) -> DecodeError {
    match e {
        ValueReadError::InvalidMarkerRead(_) | ValueReadError::InvalidDataRead(_) => {
            DecodeError::Truncated { needed: 1 }
        }
        ValueReadError::TypeMismatch(m) => DecodeError::Unexpected {
            expected,
            found: format!("{m:?}"),
        },
    }
}

/// Reads any integer marker as `i64`, or as `u64` when it is above
/// `i64::MAX`.
fn read_wide(rd: &mut &[u8]) -> Result<i128, DecodeError> {
    let start = *rd;
    match read::read_int::<i64, _>(rd) {
        Ok(v) => Ok(v.into()),
        Err(NumValueReadError::OutOfRange) => {
            *rd = start;
            read::read_int::<u64, _>(rd)
                .map(i128::from)
                .map_err(num_err)
        }
        Err(e) => Err(num_err(e)),
    }
}

/// Maps an `rmp` integer read failure.
fn num_err(e: NumValueReadError) -> DecodeError {
    match e {
        NumValueReadError::InvalidMarkerRead(_) | NumValueReadError::InvalidDataRead(_) => {
            DecodeError::Truncated { needed: 1 }
        }
        NumValueReadError::TypeMismatch(m) => DecodeError::Unexpected {
            expected: "integer",
            found: format!("{m:?}"),
        },
        NumValueReadError::OutOfRange => DecodeError::Structure("integer out of range"),
    }
}
