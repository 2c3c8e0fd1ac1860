//! Opaque peer, link, and stream identifiers.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::codec::{Decode, Decoder, Encode, Encoder};
use crate::error::{DecodeError, EncodeError};

/// A 16-byte identifier naming a peer, link, or stream.
///
/// References compare and hash by value. [`Reference::NULL`] (all zero,
/// also the [`Default`]) means "no target".
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Reference([u8; 16]);

impl Reference {
    /// The null reference.
    pub const NULL: Self = Self([0; 16]);

    /// Generates a new random reference.
    pub fn new() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    /// Wraps raw identifier bytes.
    pub const fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(bytes)
    }

    /// Returns the raw identifier bytes.
    pub const fn as_bytes(&self) -> &[u8; 16] {
        &self.0
    }

    /// Returns `true` for [`Reference::NULL`].
    pub fn is_null(&self) -> bool {
        *self == Self::NULL
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&Uuid::from_bytes(self.0).hyphenated(), f)
    }
}

impl fmt::Debug for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Reference({self})")
    }
}

impl FromStr for Reference {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s)
            .map(|id| Self(id.into_bytes()))
            .map_err(|e| DecodeError::InvalidReference(format!("{s:?}: {e}")))
    }
}

impl Encode for Reference {
    fn encode<E: Encoder + ?Sized>(&self, e: &mut E) -> Result<(), EncodeError> {
        e.write_reference(self)
    }
}

impl Decode for Reference {
    fn decode<D: Decoder + ?Sized>(d: &mut D) -> Result<Self, DecodeError> {
        d.read_reference()
    }
}

impl Serialize for Reference {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Reference {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{self, CodecKind};

    #[test]
    fn new_references_are_distinct() {
        let a = Reference::new();
        let b = Reference::new();
        assert_ne!(a, b);
        assert!(!a.is_null());
        assert!(Reference::default().is_null());
    }

    #[test]
    fn display_parses_back() {
        let r = Reference::new();
        assert_eq!(r.to_string().parse::<Reference>().unwrap(), r);
        assert!("not-a-uuid".parse::<Reference>().is_err());
    }

    #[test]
    fn pack_form_is_sixteen_byte_blob() {
        let r = Reference::from_bytes([7; 16]);
        let bytes = codec::to_vec(CodecKind::Pack, &r).unwrap();
        assert_eq!(&bytes[..2], &[0xc4, 16]);
        assert_eq!(codec::from_slice::<Reference>(CodecKind::Pack, &bytes).unwrap(), r);
    }

    #[test]
    fn short_blob_is_rejected() {
        let bytes = [0xc4, 3, 1, 2, 3];
        let err = codec::from_slice::<Reference>(CodecKind::Pack, &bytes).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::LengthMismatch {
                expected: 16,
                actual: 3,
                ..
            }
        ));
    }

    #[test]
    fn json_form_is_uuid_string() {
        let r = Reference::new();
        let bytes = codec::to_vec(CodecKind::Json, &r).unwrap();
        assert_eq!(bytes, format!("\"{r}\"").into_bytes());
        assert_eq!(codec::from_slice::<Reference>(CodecKind::Json, &bytes).unwrap(), r);
    }
}
