//! Length-prefixed framing for byte-stream transports.
//!
//! Each frame is: `[u32 big-endian length][encoded envelope]`.
//! Message-oriented transports carry one envelope per message and skip
//! this layer.

use std::io;
use std::marker::PhantomData;

use crate::codec::{self, CodecKind, Decode};
use crate::error::DecodeError;

/// Maximum allowed frame payload (16 MiB).
pub const MAX_FRAME: usize = 16 * 1024 * 1024;

/// Size of the length prefix.
const HEADER: usize = 4;

/// Returns the length prefix for a payload of `len` bytes.
pub fn header(len: usize) -> io::Result<[u8; HEADER]> {
    u32::try_from(len)
        .map(u32::to_be_bytes)
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidData, "frame exceeds u32::MAX"))
}

/// Reassembles frames from arbitrarily split chunks of a byte stream.
#[derive(Debug)]
pub struct FrameBuffer {
    /// Bytes received but not yet returned as frames.
    buf: Vec<u8>,
    /// Largest accepted payload.
    max: usize,
}

impl FrameBuffer {
    /// Creates an empty buffer accepting payloads up to `max` bytes.
    pub const fn new(max: usize) -> Self {
        Self {
            buf: Vec::new(),
            max,
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Removes and returns the next complete frame payload, if any.
    pub fn next_frame(&mut self) -> Result<Option<Vec<u8>>, DecodeError> {
        let Some(prefix) = self.buf.first_chunk::<HEADER>() else {
            return Ok(None);
        };
        let len = u32::from_be_bytes(*prefix) as usize;
        if len > self.max {
            return Err(DecodeError::FrameTooLarge {
                size: len,
                max: self.max,
            });
        }
        if self.buf.len() < HEADER + len {
            return Ok(None);
        }
        let payload = self.buf[HEADER..HEADER + len].to_vec();
        self.buf.drain(..HEADER + len);
        Ok(Some(payload))
    }

    /// Number of buffered bytes not yet returned.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

/// Reassembles self-delimiting encoded objects split across payloads.
///
/// Used for browse streams, whose results arrive as back-to-back
/// objects with no framing of their own.
#[derive(Debug)]
pub struct ObjectBuffer<T> {
    /// Wire format of the objects.
    kind: CodecKind,
    /// Bytes received but not yet decoded.
    buf: Vec<u8>,
    /// Decoded type.
    _marker: PhantomData<fn() -> T>,
}

impl<T: Decode> ObjectBuffer<T> {
    /// Creates an empty buffer for objects encoded with `kind`.
    pub const fn new(kind: CodecKind) -> Self {
        Self {
            kind,
            buf: Vec::new(),
            _marker: PhantomData,
        }
    }

    /// Appends received bytes.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Removes and returns the next complete object, if any.
    ///
    /// An incomplete object stays buffered; a malformed one is an error
    /// and clears the buffer, since the stream cannot be resynchronised.
    pub fn next_object(&mut self) -> Result<Option<T>, DecodeError> {
        if self.kind == CodecKind::Json && self.buf.iter().all(u8::is_ascii_whitespace) {
            self.buf.clear();
        }
        if self.buf.is_empty() {
            return Ok(None);
        }
        match codec::decode_prefix::<T>(self.kind, &self.buf) {
            Ok((value, used)) => {
                self.buf.drain(..used);
                Ok(Some(value))
            }
            Err(e) if e.is_truncated() => Ok(None),
            Err(e) => {
                self.buf.clear();
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::CloseResponse;
    use crate::reference::Reference;

    fn framed(payload: &[u8]) -> Vec<u8> {
        let mut out = header(payload.len()).unwrap().to_vec();
        out.extend_from_slice(payload);
        out
    }

    #[test]
    fn header_is_big_endian_length() {
        assert_eq!(framed(b"hello")[..4], [0, 0, 0, 5]);
        assert_eq!(header(0x0102_0304).unwrap(), [1, 2, 3, 4]);
    }

    #[test]
    fn rejects_oversized_frame() {
        let header = (32u32 * 1024 * 1024).to_be_bytes();
        let mut fb = FrameBuffer::new(MAX_FRAME);
        fb.extend(&header);
        assert!(matches!(
            fb.next_frame(),
            Err(DecodeError::FrameTooLarge { max: MAX_FRAME, .. })
        ));
    }

    #[test]
    fn frame_buffer_reassembles_partial_chunks() {
        let mut wire = framed(b"first");
        wire.extend(framed(b""));
        wire.extend(framed(b"third"));

        let mut fb = FrameBuffer::new(MAX_FRAME);
        let mut frames = Vec::new();
        for byte in &wire {
            fb.extend(std::slice::from_ref(byte));
            while let Some(frame) = fb.next_frame().unwrap() {
                frames.push(frame);
            }
        }
        assert_eq!(frames, [b"first".to_vec(), Vec::new(), b"third".to_vec()]);
        assert_eq!(fb.buffered(), 0);
    }

    #[test]
    fn object_buffer_waits_for_complete_objects() {
        for kind in [CodecKind::Pack, CodecKind::Json] {
            let a = CloseResponse::new(1, 2, 3, 0);
            let b = CloseResponse::new(4, 5, 6, 7);
            let mut wire = codec::to_vec(kind, &a).unwrap();
            wire.extend(codec::to_vec(kind, &b).unwrap());

            let mut ob = ObjectBuffer::<CloseResponse>::new(kind);
            let (head, tail) = wire.split_at(wire.len() - 3);
            ob.extend(head);
            assert_eq!(ob.next_object().unwrap(), Some(a));
            assert_eq!(ob.next_object().unwrap(), None);
            ob.extend(tail);
            assert_eq!(ob.next_object().unwrap(), Some(b));
            assert_eq!(ob.next_object().unwrap(), None);
        }
    }

    #[test]
    fn object_buffer_rejects_garbage() {
        let mut ob = ObjectBuffer::<Reference>::new(CodecKind::Pack);
        ob.extend(&[0xc3]);
        assert!(ob.next_object().is_err());
        assert_eq!(ob.next_object().unwrap(), None);
    }
}
